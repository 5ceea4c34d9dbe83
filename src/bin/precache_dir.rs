//! precache-dir - breadth-first prefetch of an entire directory tree,
//! reading straight from a raw block device at physical offsets.
//!
//! Usage:
//!   precache-dir <root-dir> [raw-device]
//!
//! If `raw-device` is omitted, it is guessed from `/proc/mounts` by longest
//! matching mount-point prefix of `root-dir`. The walk proceeds one tree
//! level at a time: every directory at the current level is mapped and read
//! before any of their children are even listed, so each level finishes with
//! its data already warm in the page cache.

use precache::config::Config;
use precache::engine;
use precache::error::{Error, Result};
use precache::progress::Progress;
use precache::resolver::OverlayResolver;
use precache::sys::dirent::scan_dir;
use std::fs::File;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    match run(&args) {
        Ok(total_bytes_read) => {
            let one_mib = 1024 * 1024;
            println!(
                "total data read: {} MiB ({} B)",
                (total_bytes_read + one_mib - 1) / one_mib,
                total_bytes_read
            );
        }
        Err(Error::InvalidArgument(msg)) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn run(args: &[String]) -> Result<u64> {
    if args.len() < 2 {
        return Err(Error::InvalidArgument(
            "Usage: precache-dir <root-dir> [raw-device]".to_string(),
        ));
    }

    let root_dir = PathBuf::from(&args[1]);
    let raw_device_path = if args.len() >= 3 {
        PathBuf::from(&args[2])
    } else {
        let dev = guess_device_for_path(&root_dir).ok_or_else(|| {
            Error::MountDetection(format!("could not guess a raw device for {}", root_dir.display()))
        })?;
        println!("Raw device guessed by examining /proc/mounts: {}", dev.display());
        dev
    };

    let raw_device_file =
        File::open(&raw_device_path).map_err(|_| Error::PathNotFound(raw_device_path.clone()))?;

    let root_dev = std::fs::symlink_metadata(&root_dir)
        .map_err(|_| Error::PathNotFound(root_dir.clone()))?
        .dev();

    let config = Config::from_env();
    let resolver = OverlayResolver::new(&config.overlay_daemon_name, config.mount_refresh_interval);
    resolver.force_refresh_mounts();

    Ok(walk(&root_dir, root_dev, &raw_device_file, &resolver, &config))
}

fn walk(root_dir: &Path, root_dev: u64, raw_device: &File, resolver: &OverlayResolver, config: &Config) -> u64 {
    let mut progress = Progress::new();
    let mut current_tasks = vec![root_dir.to_path_buf()];
    let mut total_bytes_read = 0u64;

    while !current_tasks.is_empty() {
        let task_count = current_tasks.len() as u64;

        let mut segments = Vec::new();
        for (idx, task) in current_tasks.iter().enumerate() {
            progress.report("mapping directories", idx as u64 + 1, task_count);
            segments.extend(engine::enumerate(task, resolver, config.extent_buffer_elements));
        }
        progress.finish("mapping directories", task_count);

        engine::sort_segments(&mut segments);

        let segment_count = segments.len() as u64;
        let mut buf = vec![0u8; config.read_buffer_size];
        for (idx, segment) in segments.iter().enumerate() {
            progress.report("reading raw device", idx as u64 + 1, segment_count.max(1));
            total_bytes_read += engine::read_segment_raw(raw_device.as_raw_fd(), segment, &mut buf);
        }
        progress.finish("reading raw device", segment_count.max(1));

        let mut next_tasks = Vec::new();
        for (idx, task) in current_tasks.iter().enumerate() {
            progress.report("deriving new tasks", idx as u64 + 1, task_count);
            next_tasks.extend(derive_new_tasks(task, root_dev));
        }
        progress.finish("deriving new tasks", task_count);

        current_tasks = next_tasks;
    }

    total_bytes_read
}

/// Subdirectories of `dir_name` on the same filesystem as the walk's root,
/// skipping `.`/`..`. Crosses mount boundaries never: a subdirectory on a
/// different device is silently excluded.
fn derive_new_tasks(dir_name: &Path, root_dev: u64) -> Vec<PathBuf> {
    let Ok(entries) = scan_dir(dir_name) else {
        eprintln!("Error: can't open directory \"{}\"", dir_name.display());
        return Vec::new();
    };

    entries
        .into_iter()
        .filter(|e| e.is_dir() && !e.is_dot_or_dotdot())
        .filter_map(|e| {
            let child = dir_name.join(&e.name);
            let meta = std::fs::symlink_metadata(&child).ok()?;
            (meta.dev() == root_dev).then_some(child)
        })
        .collect()
}

/// Longest-matching-prefix search of `/proc/mounts` for the device backing
/// `path`, the way `guess_device_for_path` does in the original.
fn guess_device_for_path(path: &Path) -> Option<PathBuf> {
    let contents = std::fs::read_to_string("/proc/mounts").ok()?;
    let path = path.to_string_lossy();

    let mut best: Option<(usize, &str)> = None;
    for line in contents.lines() {
        let mut fields = line.split(' ');
        let (Some(device), Some(mount_point)) = (fields.next(), fields.next()) else {
            continue;
        };

        if !device.starts_with('/') {
            continue;
        }

        let common_len = common_prefix_length(mount_point, &path);
        if best.map(|(len, _)| common_len > len).unwrap_or(true) {
            best = Some((common_len, device));
        }
    }

    best.map(|(_, device)| PathBuf::from(device))
}

fn common_prefix_length(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}
