//! precache - warm the page cache for a list of files, reading data in
//! physical-disk order for minimum seek time.
//!
//! Usage:
//!   precache <file>...
//!
//! Additional file paths may be appended by piping them in on stdin (one per
//! line); this lets callers do `find . -type f | precache`.

use clap::Parser;
use precache::config::Config;
use precache::engine;
use precache::progress::Progress;
use precache::resolver::OverlayResolver;
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "precache")]
#[command(author = "precache Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Warm the page cache for a list of files in physical disk order")]
struct Cli {
    /// Files to precache. If stdin is not a terminal, additional paths are
    /// read from it, one per line, and appended to this list.
    files: Vec<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set subscriber");

    let mut files = cli.files;
    if !std::io::stdin().is_terminal() {
        for line in std::io::stdin().lines().map_while(Result::ok) {
            if !line.is_empty() {
                files.push(PathBuf::from(line));
            }
        }
    }

    let config = Config::from_env();
    let resolver = OverlayResolver::new(&config.overlay_daemon_name, config.mount_refresh_interval);
    resolver.force_refresh_mounts();

    let total_bytes_read = run(&files, &resolver, &config);
    println!("total data read: {} MiB ({} B)", (total_bytes_read + 1024 * 1024 - 1) / (1024 * 1024), total_bytes_read);
}

fn run(files: &[PathBuf], resolver: &OverlayResolver, config: &Config) -> u64 {
    let mut progress = Progress::new();
    let file_count = files.len() as u64;

    let mut segments = Vec::new();
    for (idx, file) in files.iter().enumerate() {
        progress.report("mapping", idx as u64, file_count.max(1));
        segments.extend(engine::enumerate(file, resolver, config.extent_buffer_elements));
    }
    progress.finish("mapping", file_count.max(1));

    engine::sort_segments(&mut segments);

    let mut buf = vec![0u8; config.read_buffer_size];
    let mut total_bytes_read = 0u64;
    let segment_count = segments.len() as u64;

    for (idx, segment) in segments.iter().enumerate() {
        progress.report("reading", idx as u64 + 1, segment_count.max(1));
        total_bytes_read += engine::read_segment(segment, &mut buf);
    }
    progress.finish("reading", segment_count.max(1));

    total_bytes_read
}
