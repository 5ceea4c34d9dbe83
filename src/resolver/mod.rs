//! Overlay-to-backing path resolver.
//!
//! Reconstructs, without any cooperation from the overlay daemon, the
//! mapping from overlay-visible paths to the ciphertext files whose extents
//! actually map to physical storage. A near-line-for-line Rust port of
//! `encfs_mapper.c`.

mod inode_cache;
mod inode_trace;
mod mount_table;

pub use inode_cache::InodeCache;
pub use mount_table::{trim_trailing_slashes, MountEntry, MountTable};

use crate::error::Error;
use crate::sys::dirent::scan_dir;
use crate::sys::is_fuse_mount;
use parking_lot::Mutex;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

struct State {
    mounts: MountTable,
    inodes: InodeCache,
    last_refresh: Option<SystemTime>,
}

/// Overlay path resolver. Holds the mount table and inode cache behind a
/// single mutex; see DESIGN.md for why this is a separate lock from the
/// interposer's per-handle table rather than one shared mutex.
pub struct OverlayResolver {
    state: Mutex<State>,
    overlay_daemon_name: String,
    refresh_interval: Duration,
}

impl OverlayResolver {
    pub fn new(overlay_daemon_name: impl Into<String>, refresh_interval: Duration) -> Self {
        OverlayResolver {
            state: Mutex::new(State {
                mounts: MountTable::new(),
                inodes: InodeCache::new(),
                last_refresh: None,
            }),
            overlay_daemon_name: overlay_daemon_name.into(),
            refresh_interval,
        }
    }

    /// Unconditionally rescan `/proc` for overlay-daemon processes.
    pub fn force_refresh_mounts(&self) {
        self.do_refresh_mounts();
    }

    /// Throttled refresh: skip entirely if `context_path` is not on the
    /// overlay filesystem family, and rescan at most once per configured
    /// interval otherwise.
    pub fn maybe_refresh_mounts(&self, context_path: &Path) {
        if !is_fuse_mount(context_path) {
            return;
        }

        let now = SystemTime::now();
        {
            let mut state = self.state.lock();
            if let Some(last) = state.last_refresh {
                if now.duration_since(last).unwrap_or(Duration::ZERO) < self.refresh_interval {
                    return;
                }
            }
            state.last_refresh = Some(now);
        }

        self.do_refresh_mounts();
    }

    fn do_refresh_mounts(&self) {
        let mut state = self.state.lock();
        state.mounts.mark_all_pending();

        for pid in list_numeric_pids() {
            let Some(cmdline) = read_cmdline(pid) else {
                continue;
            };
            if cmdline.first().map(String::as_str) != Some(self.overlay_daemon_name.as_str()) {
                continue;
            }

            let Some((backing, overlay)) = parse_backing_and_overlay(&cmdline[1..]) else {
                continue;
            };

            let backing_root = trim_trailing_slashes(Path::new(&backing));
            let overlay_root = trim_trailing_slashes(Path::new(&overlay));

            if let Some(replaced_backing_root) =
                state.mounts.observe(overlay_root, backing_root, pid)
            {
                state.inodes.invalidate_prefix(&replaced_backing_root);
            }
        }

        let removed_backing_roots = state.mounts.sweep_pending();
        for backing_root in removed_backing_roots {
            state.inodes.invalidate_prefix(&backing_root);
        }
    }

    /// Resolve `path` to a backing path. Never fails loudly: returns a copy
    /// of the input whenever translation doesn't apply or falls through.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if !is_fuse_mount(path) {
            return path.to_path_buf();
        }

        let mut state = self.state.lock();

        let mount = match state.mounts.find_containing(path) {
            Some(m) => m.clone(),
            None => return path.to_path_buf(),
        };

        let meta = match std::fs::symlink_metadata(path) {
            Ok(m) if m.file_type().is_file() && !m.file_type().is_symlink() => m,
            _ => return path.to_path_buf(),
        };
        let target_inode = meta.ino();

        if let Some(cached) = state.inodes.get(target_inode) {
            return cached.to_path_buf();
        }

        let Some(trace) = inode_trace::build_inode_trace(path, &mount.overlay_root) else {
            return path.to_path_buf();
        };

        match inode_trace::follow_inode_trace(&trace, &mount.backing_root, &mut state.inodes) {
            Some(backing_path) => backing_path,
            None => path.to_path_buf(),
        }
    }

    /// Destroy both tables. Also runs automatically on `Drop`.
    pub fn cleanup(&self) {
        let mut state = self.state.lock();
        state.mounts.clear();
        state.inodes.clear();
    }

    #[cfg(test)]
    pub(crate) fn inject_mount(&self, overlay_root: PathBuf, backing_root: PathBuf, pid: u64) {
        let mut state = self.state.lock();
        state.mounts.observe(overlay_root, backing_root, pid);
    }

    #[cfg(test)]
    pub(crate) fn mount_count(&self) -> usize {
        self.state.lock().mounts.len()
    }

    #[cfg(test)]
    pub(crate) fn inode_cache_len(&self) -> usize {
        self.state.lock().inodes.len()
    }
}

impl Drop for OverlayResolver {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn list_numeric_pids() -> Vec<u64> {
    let entries = match scan_dir(Path::new("/proc")) {
        Ok(entries) => entries,
        Err(e) => {
            let err = Error::MountDetection(format!("can't scan /proc: {e}"));
            tracing::warn!(%err, "mount-table refresh will see no overlay daemons this round");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter(|e| e.is_dir())
        .filter_map(|e| e.name.to_string_lossy().parse::<u64>().ok())
        .collect()
}

/// Read and split `/proc/<pid>/cmdline`'s NUL-separated argument list.
fn read_cmdline(pid: u64) -> Option<Vec<String>> {
    let content = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    if content.is_empty() {
        return None;
    }
    Some(
        content
            .split(|&b| b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect(),
    )
}

/// Find the first two non-option (`-`-prefixed) arguments: in order, the
/// backing directory then the overlay directory.
fn parse_backing_and_overlay(args: &[String]) -> Option<(String, String)> {
    let mut dirs = args.iter().filter(|a| !a.starts_with('-'));
    let backing = dirs.next()?.clone();
    let overlay = dirs.next()?.clone();
    Some((backing, overlay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn resolver() -> OverlayResolver {
        OverlayResolver::new("encfs", Duration::from_secs(1))
    }

    #[test]
    fn resolve_is_transparent_for_non_overlay_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, b"hi").unwrap();

        let r = resolver();
        // A tmpfs/tempdir path is not FUSE, so resolve must be a no-op.
        assert_eq!(r.resolve(&file), file);
    }

    #[test]
    fn resolve_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, b"hi").unwrap();

        let r = resolver();
        let a = r.resolve(&file);
        let b = r.resolve(&file);
        assert_eq!(a, b);
    }

    #[test]
    fn parse_backing_and_overlay_skips_options() {
        let args = vec!["-f".to_string(), "/back".to_string(), "/front".to_string()];
        assert_eq!(
            parse_backing_and_overlay(&args),
            Some(("/back".to_string(), "/front".to_string()))
        );
    }

    #[test]
    fn parse_backing_and_overlay_requires_two_positional_args() {
        let args = vec!["-f".to_string(), "/back".to_string()];
        assert_eq!(parse_backing_and_overlay(&args), None);
    }

    #[test]
    fn cleanup_empties_both_tables() {
        let r = resolver();
        r.inject_mount(PathBuf::from("/m"), PathBuf::from("/b"), 1);
        assert_eq!(r.mount_count(), 1);
        r.cleanup();
        assert_eq!(r.mount_count(), 0);
        assert_eq!(r.inode_cache_len(), 0);
    }
}
