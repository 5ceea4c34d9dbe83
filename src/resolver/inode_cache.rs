//! Inode-number -> backing-path cache, populated opportunistically during
//! directory walks. Grounded on `encfs_mapper.c`'s `struct
//! inode_to_path_mapping` / `inode_to_path_map` and
//! `remove_inode_to_path_mappings_for_path`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct InodeCache {
    entries: HashMap<u64, PathBuf>,
}

impl InodeCache {
    pub fn new() -> Self {
        InodeCache {
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, inode: u64) -> Option<&Path> {
        self.entries.get(&inode).map(|p| p.as_path())
    }

    /// Insert an inode->path mapping, but never overwrite an existing entry:
    /// first writer wins. Returns `true` if the entry was newly inserted.
    pub fn insert_if_absent(&mut self, inode: u64, path: PathBuf) -> bool {
        if self.entries.contains_key(&inode) {
            return false;
        }
        self.entries.insert(inode, path);
        true
    }

    /// Remove every entry whose stored path is inside `backing_root`
    /// (prefix match on the cached path).
    pub fn invalidate_prefix(&mut self, backing_root: &Path) {
        let root_str = backing_root.to_string_lossy().into_owned();
        self.entries.retain(|_, path| {
            let path_str = path.to_string_lossy();
            if !path_str.starts_with(root_str.as_str()) {
                return true;
            }
            match path_str.as_bytes().get(root_str.len()) {
                None | Some(b'/') => false,
                _ => true,
            }
        });
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_writer_wins() {
        let mut cache = InodeCache::new();
        assert!(cache.insert_if_absent(1, PathBuf::from("/b/a")));
        assert!(!cache.insert_if_absent(1, PathBuf::from("/b/other")));
        assert_eq!(cache.get(1), Some(Path::new("/b/a")));
    }

    #[test]
    fn invalidate_prefix_removes_only_matching_entries() {
        let mut cache = InodeCache::new();
        cache.insert_if_absent(1, PathBuf::from("/b/sub/x"));
        cache.insert_if_absent(2, PathBuf::from("/other/y"));
        cache.insert_if_absent(3, PathBuf::from("/b2/z"));

        cache.invalidate_prefix(Path::new("/b"));

        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
        assert!(cache.get(3).is_some(), "/b2 should not match prefix /b");
    }
}
