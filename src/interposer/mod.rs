//! Library-injection directory-listing state machine.
//!
//! Decides, from a sequence of directory-traversal and file-open calls
//! intercepted from a host process, whether that host is "about to
//! enumerate and open files" and, if so, eagerly prefetches the remaining
//! unread entries of the current listing. Ports the `dirp_to_state_mapping`
//! table and its `opendir`/`readdir`/`closedir`/`rewinddir`/`openat` handlers
//! from `libprecache.c`.

pub mod dir_state;
pub mod fsm;

pub use dir_state::DirState;
pub use fsm::State;

use crate::config::Config;
use crate::engine::{self, Segment};
use crate::resolver::OverlayResolver;
use crate::sys::dirent::{scan_dir, RawDirent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;

/// Result of an intercepted `readdir` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaddirOutcome {
    /// A materialized entry is available; the real `readdir` should be
    /// called too, so the host sees a genuine `struct dirent*`.
    Entry(RawDirent),
    /// This handle is tracked and its listing is exhausted.
    Exhausted,
    /// This handle was never registered via `on_opendir` (e.g. the `DIR*`
    /// came from `fdopendir`, which isn't in the intercepted set). The
    /// caller must forward straight to the real `readdir` rather than
    /// treat this as end-of-directory.
    Untracked,
}

/// Tracks every open directory handle and drives the precache FSM for each.
/// The per-handle table is guarded by its own mutex, held only across each
/// intercepted call's critical section; the resolver guards its own tables
/// the same way, so no call ever needs to hold more than one lock.
pub struct Interposer {
    handles: Mutex<HashMap<usize, DirState>>,
    resolver: OverlayResolver,
    config: Config,
}

impl Interposer {
    pub fn new(resolver: OverlayResolver, config: Config) -> Self {
        Interposer {
            handles: Mutex::new(HashMap::new()),
            resolver,
            config,
        }
    }

    pub fn resolver(&self) -> &OverlayResolver {
        &self.resolver
    }

    /// Handle an `opendir` event: materialize every entry up front and
    /// register a fresh `DirState`.
    pub fn on_opendir(&self, handle_id: usize, dirname: PathBuf) {
        self.resolver.maybe_refresh_mounts(&dirname);

        let entries = scan_dir(&dirname).unwrap_or_default();
        let state = DirState::new(handle_id, dirname, entries);

        let mut handles = self.handles.lock();
        handles.insert(handle_id, state);
    }

    /// Handle a `readdir` event: surface the next materialized entry,
    /// triggering a precache burst the first time the FSM reaches `Precache`.
    /// A `.`/`..` entry only advances the cursor: it never triggers a
    /// precache burst, decrements `cached_files_count`, or advances the FSM,
    /// matching `handle_readdir`'s early `goto done` for dot entries.
    pub fn on_readdir(&self, handle_id: usize) -> ReaddirOutcome {
        let mut handles = self.handles.lock();
        let Some(state) = handles.get_mut(&handle_id) else {
            return ReaddirOutcome::Untracked;
        };

        let Some(peeked) = state.peek_entry() else {
            return ReaddirOutcome::Exhausted;
        };
        let is_dot = peeked.is_dot_or_dotdot();

        if !is_dot {
            let is_precache_entry = state.fsm_state.is_precache() && state.cached_files_count == 0;
            if is_precache_entry {
                self.cache_remaining(state);
            }
        }

        let entry = state.next_entry().expect("peeked entry must still be present").clone();

        if !is_dot {
            if state.cached_files_count > 0 {
                state.cached_files_count -= 1;
            }
            state.fsm_state = state.fsm_state.on_read_entry();
        }

        ReaddirOutcome::Entry(entry)
    }

    /// Handle a `closedir` event: drop the handle's state entirely.
    pub fn on_closedir(&self, handle_id: usize) {
        self.handles.lock().remove(&handle_id);
    }

    /// Handle a `rewinddir` event.
    pub fn on_rewinddir(&self, handle_id: usize) {
        if let Some(state) = self.handles.lock().get_mut(&handle_id) {
            state.rewind();
        }
    }

    /// Handle an `open`/`openat(AT_FDCWD, ...)` event. An open counts as
    /// "matching" a tracked directory only if its path begins with that
    /// directory's name and contains no further `/` beyond it. When more
    /// than one handle is open on the same directory path, only the first
    /// match found advances, matching `handle_openat` in the original C
    /// shim (see DESIGN.md).
    pub fn on_open(&self, path: &str, at_cwd: bool) {
        if !at_cwd {
            return;
        }

        let mut handles = self.handles.lock();
        for state in handles.values_mut() {
            let dirname = state.dirname.to_string_lossy();
            let matches = path.len() > dirname.len() + 1
                && path.starts_with(dirname.as_ref())
                && !path[dirname.len() + 1..].contains('/');

            if !matches {
                continue;
            }

            state.fsm_state = state.fsm_state.on_matching_open();
            // Only the first matching handle advances; see doc comment above.
            break;
        }
    }

    /// Walk from the cursor to the end of the materialized list, resolve
    /// each non-dot entry, enumerate and size-limit its extents, sort
    /// globally, then read them through the page cache.
    fn cache_remaining(&self, state: &mut DirState) {
        engine::maybe_sync(&self.config);

        let dirname = state.dirname.clone();
        let names: Vec<PathBuf> = state
            .remaining_from_cursor()
            .iter()
            .filter(|e| !e.is_dot_or_dotdot())
            .map(|e| dirname.join(&e.name))
            .collect();

        let mut running_total = 0u64;
        let mut segments: Vec<Segment> = engine::enumerate_with_budget(
            names.iter().map(|p| p.as_path()),
            &self.resolver,
            self.config.extent_buffer_elements,
            self.config.cache_limit_bytes,
            &mut running_total,
        );

        engine::sort_segments(&mut segments);

        let mut buf = vec![0u8; self.config.read_buffer_size];
        for segment in &segments {
            engine::read_segment(segment, &mut buf);
        }

        state.cached_files_count = names.len();
    }

    #[cfg(test)]
    pub(crate) fn handle_count(&self) -> usize {
        self.handles.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn interposer() -> Interposer {
        let resolver = OverlayResolver::new("encfs", Duration::from_secs(1));
        Interposer::new(resolver, Config::default())
    }

    #[test]
    fn opendir_materializes_entries_and_readdir_surfaces_them() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), b"1").unwrap();
        fs::write(dir.path().join("b"), b"2").unwrap();

        let ip = interposer();
        ip.on_opendir(1, dir.path().to_path_buf());
        assert_eq!(ip.handle_count(), 1);

        let mut names = Vec::new();
        loop {
            match ip.on_readdir(1) {
                ReaddirOutcome::Entry(entry) => names.push(entry.name.to_string_lossy().into_owned()),
                ReaddirOutcome::Exhausted => break,
                ReaddirOutcome::Untracked => panic!("handle was registered via on_opendir"),
            }
        }
        assert!(names.contains(&"a".to_string()));
        assert!(names.contains(&"b".to_string()));
    }

    #[test]
    fn untracked_handle_is_reported_as_untracked() {
        let ip = interposer();
        assert_eq!(ip.on_readdir(999), ReaddirOutcome::Untracked);
    }

    #[test]
    fn dot_and_dotdot_entries_do_not_advance_the_fsm_or_decrement_the_cache_count() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), b"1").unwrap();

        let ip = interposer();
        ip.on_opendir(1, dir.path().to_path_buf());

        {
            let mut handles = ip.handles.lock();
            let state = handles.get_mut(&1).unwrap();
            state.fsm_state = fsm::State::Precache;
            state.cached_files_count = 5;
        }

        // The materialized list always starts with "." and "..": reading
        // past them must not touch the FSM state or the cache counter.
        let first = ip.on_readdir(1);
        assert!(matches!(first, ReaddirOutcome::Entry(ref e) if e.is_dot_or_dotdot()));

        let handles = ip.handles.lock();
        let state = handles.get(&1).unwrap();
        assert_eq!(state.fsm_state, fsm::State::Precache);
        assert_eq!(state.cached_files_count, 5);
    }

    #[test]
    fn closedir_removes_handle() {
        let dir = tempfile::tempdir().unwrap();
        let ip = interposer();
        ip.on_opendir(1, dir.path().to_path_buf());
        ip.on_closedir(1);
        assert_eq!(ip.handle_count(), 0);
    }

    #[test]
    fn list_open_sequence_drives_fsm_to_precache_and_then_rewind_resets() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["e0", "e1", "e2", "e3", "e4"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let ip = interposer();
        ip.on_opendir(1, dir.path().to_path_buf());

        // list, open, list, open, list, open -- three reads interleaved
        // with three matching opens should reach Precache.
        for _ in 0..3 {
            let entry = loop {
                match ip.on_readdir(1) {
                    ReaddirOutcome::Entry(e) if !e.is_dot_or_dotdot() => break e,
                    ReaddirOutcome::Entry(_) => continue,
                    other => panic!("unexpected {other:?}"),
                }
            };
            let path = dir.path().join(&entry.name);
            ip.on_open(path.to_str().unwrap(), true);
        }

        let state_is_precache = {
            let handles = ip.handles.lock();
            handles.get(&1).unwrap().fsm_state == fsm::State::Precache
        };
        assert!(state_is_precache);

        ip.on_rewinddir(1);
        let state_is_start = {
            let handles = ip.handles.lock();
            handles.get(&1).unwrap().fsm_state == fsm::State::Start
        };
        assert!(state_is_start);
    }
}
