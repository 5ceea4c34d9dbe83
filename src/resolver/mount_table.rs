//! Overlay mount table: overlay-root -> backing-root, keyed uniquely by
//! overlay root. Grounded on `encfs_mapper.c`'s `struct front_to_back_mapping`
//! / `front_to_back_map` hash table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One recognized overlay mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub overlay_root: PathBuf,
    pub backing_root: PathBuf,
    pub pid: u64,
    pub pending_removal: bool,
}

/// Strip trailing slashes, matching `strdup_and_trim_slashes` in the
/// original. Paths are stored without a trailing slash so prefix matches in
/// `resolve` can rely on a `/`-or-end-of-string boundary check.
pub fn trim_trailing_slashes(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() {
        PathBuf::from("/")
    } else {
        PathBuf::from(trimmed)
    }
}

#[derive(Debug, Default)]
pub struct MountTable {
    entries: HashMap<PathBuf, MountEntry>,
}

impl MountTable {
    pub fn new() -> Self {
        MountTable {
            entries: HashMap::new(),
        }
    }

    pub fn mark_all_pending(&mut self) {
        for entry in self.entries.values_mut() {
            entry.pending_removal = true;
        }
    }

    /// Observe a mount candidate discovered during a refresh scan. Returns
    /// the backing root of any entry that was replaced (different pid under
    /// the same overlay root), whose inode-cache entries must be invalidated
    /// by the caller.
    pub fn observe(
        &mut self,
        overlay_root: PathBuf,
        backing_root: PathBuf,
        pid: u64,
    ) -> Option<PathBuf> {
        if let Some(existing) = self.entries.get_mut(&overlay_root) {
            if existing.pid == pid {
                existing.pending_removal = false;
                return None;
            }

            let old_backing_root = existing.backing_root.clone();
            self.entries.insert(
                overlay_root.clone(),
                MountEntry {
                    overlay_root,
                    backing_root,
                    pid,
                    pending_removal: false,
                },
            );
            return Some(old_backing_root);
        }

        self.entries.insert(
            overlay_root.clone(),
            MountEntry {
                overlay_root,
                backing_root,
                pid,
                pending_removal: false,
            },
        );
        None
    }

    /// Remove every entry still marked pending-removal, returning their
    /// backing roots so the caller can invalidate dependent inode-cache
    /// entries.
    pub fn sweep_pending(&mut self) -> Vec<PathBuf> {
        let stale: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|(_, e)| e.pending_removal)
            .map(|(k, _)| k.clone())
            .collect();

        let mut removed_backing_roots = Vec::with_capacity(stale.len());
        for key in stale {
            if let Some(entry) = self.entries.remove(&key) {
                removed_backing_roots.push(entry.backing_root);
            }
        }
        removed_backing_roots
    }

    /// Find the mount entry whose overlay root is a path-prefix of `path`,
    /// with the boundary falling on `/` or end-of-string.
    pub fn find_containing(&self, path: &Path) -> Option<&MountEntry> {
        let path_str = path.to_string_lossy();
        self.entries.values().find(|entry| {
            let root_str = entry.overlay_root.to_string_lossy();
            if !path_str.starts_with(root_str.as_ref()) {
                return false;
            }
            match path_str.as_bytes().get(root_str.len()) {
                None => true,
                Some(b'/') => true,
                _ => false,
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub fn get(&self, overlay_root: &Path) -> Option<&MountEntry> {
        self.entries.get(overlay_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slashes() {
        assert_eq!(trim_trailing_slashes(Path::new("/a/b/")), PathBuf::from("/a/b"));
        assert_eq!(trim_trailing_slashes(Path::new("/a/b")), PathBuf::from("/a/b"));
        assert_eq!(trim_trailing_slashes(Path::new("/")), PathBuf::from("/"));
    }

    #[test]
    fn observe_same_pid_clears_pending_flag() {
        let mut table = MountTable::new();
        table.observe(PathBuf::from("/m"), PathBuf::from("/b"), 42);
        table.mark_all_pending();
        let replaced = table.observe(PathBuf::from("/m"), PathBuf::from("/b"), 42);
        assert!(replaced.is_none());
        assert!(!table.get(Path::new("/m")).unwrap().pending_removal);
    }

    #[test]
    fn observe_different_pid_replaces_entry() {
        let mut table = MountTable::new();
        table.observe(PathBuf::from("/m"), PathBuf::from("/old"), 1);
        let replaced = table.observe(PathBuf::from("/m"), PathBuf::from("/new"), 2);
        assert_eq!(replaced, Some(PathBuf::from("/old")));
        assert_eq!(table.get(Path::new("/m")).unwrap().backing_root, PathBuf::from("/new"));
    }

    #[test]
    fn sweep_removes_only_pending_entries() {
        let mut table = MountTable::new();
        table.observe(PathBuf::from("/m1"), PathBuf::from("/b1"), 1);
        table.observe(PathBuf::from("/m2"), PathBuf::from("/b2"), 2);
        table.mark_all_pending();
        table.observe(PathBuf::from("/m1"), PathBuf::from("/b1"), 1);

        let removed = table.sweep_pending();
        assert_eq!(removed, vec![PathBuf::from("/b2")]);
        assert_eq!(table.len(), 1);
        assert!(table.get(Path::new("/m1")).is_some());
    }

    #[test]
    fn find_containing_respects_boundary() {
        let mut table = MountTable::new();
        table.observe(PathBuf::from("/m"), PathBuf::from("/b"), 1);

        assert!(table.find_containing(Path::new("/m/foo")).is_some());
        assert!(table.find_containing(Path::new("/m")).is_some());
        assert!(table.find_containing(Path::new("/mfoo")).is_none());
    }

    #[test]
    fn refresh_idempotence() {
        let mut table = MountTable::new();
        for _ in 0..2 {
            table.mark_all_pending();
            table.observe(PathBuf::from("/m"), PathBuf::from("/b"), 7);
            table.sweep_pending();
        }
        assert_eq!(table.len(), 1);
    }
}
