//! Extent-sorted prefetch engine.
//!
//! Resolves paths to their backing files, queries the kernel's extent map,
//! sorts by physical offset, and reads each segment sequentially to warm the
//! page cache. Ports `segments.c`/`precache.c`'s core loop.

pub mod fiemap;
pub mod segment;

pub use segment::{sort_segments, Segment};

use crate::config::Config;
use crate::resolver::OverlayResolver;
use std::fs::File;
use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Enumerate every extent of `path` (resolved through `resolver` first) and
/// append one `Segment` per mapped extent, clipping any extent whose logical
/// start plus length overruns the file's size down to the file's exact
/// length.
pub fn enumerate(path: &Path, resolver: &OverlayResolver, extent_buffer_elements: u32) -> Vec<Segment> {
    let resolved = resolver.resolve(path);

    let file = match File::open(&resolved) {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };

    let file_size = match file.metadata() {
        Ok(m) => m.size(),
        Err(_) => return Vec::new(),
    };

    let extents = fiemap::query_extents(file.as_raw_fd(), file_size, extent_buffer_elements);

    extents
        .into_iter()
        .map(|ext| {
            let length = if ext.logical <= file_size && ext.logical + ext.length > file_size {
                file_size - ext.logical
            } else {
                ext.length
            };
            Segment::new(resolved.clone(), ext.physical, ext.logical, length)
        })
        .collect()
}

/// Enumerate extents for a sequence of paths, stopping as soon as adding the
/// next file's size would exceed `limit`. `running_total` lets callers share
/// a budget across multiple
/// calls (e.g. one call per directory entry) instead of resetting per call.
pub fn enumerate_with_budget<'a>(
    paths: impl Iterator<Item = &'a Path>,
    resolver: &OverlayResolver,
    extent_buffer_elements: u32,
    limit: u64,
    running_total: &mut u64,
) -> Vec<Segment> {
    let mut segments = Vec::new();

    for path in paths {
        let resolved = resolver.resolve(path);
        let size = match std::fs::metadata(&resolved) {
            Ok(m) => m.size(),
            Err(_) => continue,
        };

        if *running_total + size > limit {
            break;
        }
        *running_total += size;

        segments.extend(enumerate(path, resolver, extent_buffer_elements));
    }

    segments
}

/// Read one segment's bytes via `pread` on its own backing file, at its
/// logical file offset. Retries on `EINTR`, treats short reads/EOF as done.
/// `buf` is a caller-owned scratch buffer reused across segments rather than
/// reallocated per call.
pub fn read_segment(segment: &Segment, buf: &mut [u8]) -> u64 {
    let Ok(file) = File::open(&segment.file_name) else {
        return 0;
    };
    pread_loop(file.as_raw_fd(), segment.file_offset, segment.length, buf)
}

/// Read one segment's bytes via `pread` against a single shared raw
/// block-device file descriptor, at its *physical* offset — the variant
/// `precache-dir` uses.
pub fn read_segment_raw(device_fd: std::os::unix::io::RawFd, segment: &Segment, buf: &mut [u8]) -> u64 {
    pread_loop(device_fd, segment.physical_pos, segment.length, buf)
}

fn pread_loop(fd: std::os::unix::io::RawFd, mut offset: u64, mut to_read: u64, buf: &mut [u8]) -> u64 {
    let mut total_read: u64 = 0;
    while to_read > 0 {
        let chunk_size = std::cmp::min(to_read as usize, buf.len());
        let res = unsafe {
            libc::pread(
                fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                chunk_size,
                offset as libc::off_t,
            )
        };

        if res < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            break;
        }
        if res == 0 {
            break;
        }

        let bytes_read = res as u64;
        to_read -= bytes_read;
        offset += bytes_read;
        total_read += bytes_read;
    }
    total_read
}

/// Invoke `sync(1)` before a precache burst, unless disabled via config
/// (`PRECACHE_SYNC=0`). Library mode only.
pub fn maybe_sync(config: &Config) {
    if !config.sync_before_precache {
        return;
    }
    let _ = std::process::Command::new("sync").status();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn enumerate_returns_empty_for_missing_file() {
        let resolver = OverlayResolver::new("encfs", Duration::from_secs(1));
        let segments = enumerate(Path::new("/nonexistent/path/xyz"), &resolver, 1000);
        assert!(segments.is_empty());
    }

    #[test]
    fn enumerate_clips_segments_to_file_size_and_reads_are_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("f.bin");
        std::fs::write(&file_path, vec![7u8; 4096]).unwrap();

        let resolver = OverlayResolver::new("encfs", Duration::from_secs(1));
        let segments = enumerate(&file_path, &resolver, 1000);

        let file_size = std::fs::metadata(&file_path).unwrap().size();
        for seg in &segments {
            assert!(seg.file_offset + seg.length <= file_size);
        }

        let mut buf = vec![0u8; 512 * 1024];
        for seg in &segments {
            read_segment(seg, &mut buf);
        }
    }

    #[test]
    fn budget_enforcement_stops_before_exceeding_limit() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, vec![0u8; 100]).unwrap();
        std::fs::write(&b, vec![0u8; 100]).unwrap();

        let resolver = OverlayResolver::new("encfs", Duration::from_secs(1));
        let mut running_total = 0u64;
        let paths = vec![a.clone(), b.clone()];
        let _ = enumerate_with_budget(
            paths.iter().map(|p| p.as_path()),
            &resolver,
            1000,
            150,
            &mut running_total,
        );
        assert!(running_total <= 150);
    }
}
