//! Per-directory-handle state tracked from `opendir` to `closedir`.

use crate::interposer::fsm::State;
use crate::sys::dirent::RawDirent;
use std::path::PathBuf;

/// State tracked for one open directory handle, from open to close.
pub struct DirState {
    pub handle_id: usize,
    pub dirname: PathBuf,
    entries: Vec<RawDirent>,
    cursor: usize,
    pub cached_files_count: usize,
    pub fsm_state: State,
}

impl DirState {
    pub fn new(handle_id: usize, dirname: PathBuf, entries: Vec<RawDirent>) -> Self {
        DirState {
            handle_id,
            dirname,
            entries,
            cursor: 0,
            cached_files_count: 0,
            fsm_state: State::Start,
        }
    }

    /// Surface the next materialized entry and advance the cursor. The
    /// cursor never advances past the end of the list.
    pub fn next_entry(&mut self) -> Option<&RawDirent> {
        if self.cursor >= self.entries.len() {
            return None;
        }
        let entry = &self.entries[self.cursor];
        self.cursor += 1;
        Some(entry)
    }

    /// The entry `next_entry` would return, without consuming it.
    pub fn peek_entry(&self) -> Option<&RawDirent> {
        self.entries.get(self.cursor)
    }

    /// Entries from the current cursor to the end, inclusive of the cursor
    /// position — used when entering the precache state to know what's left
    /// to eagerly read.
    pub fn remaining_from_cursor(&self) -> &[RawDirent] {
        &self.entries[self.cursor..]
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Reset both FSM state and cursor, as `rewinddir` does.
    pub fn rewind(&mut self) {
        self.fsm_state = State::Start;
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> RawDirent {
        RawDirent {
            ino: 1,
            d_type: libc::DT_REG,
            name: name.into(),
        }
    }

    #[test]
    fn cursor_never_advances_past_the_list() {
        let mut state = DirState::new(0, PathBuf::from("/d"), vec![entry("a")]);
        assert!(state.next_entry().is_some());
        assert!(state.next_entry().is_none());
        assert!(state.next_entry().is_none());
    }

    #[test]
    fn rewind_resets_cursor_and_fsm() {
        let mut state = DirState::new(0, PathBuf::from("/d"), vec![entry("a"), entry("b")]);
        state.next_entry();
        state.fsm_state = State::R2O2;
        state.rewind();
        assert_eq!(state.cursor(), 0);
        assert_eq!(state.fsm_state, State::Start);
    }

    #[test]
    fn peek_entry_does_not_advance_the_cursor() {
        let mut state = DirState::new(0, PathBuf::from("/d"), vec![entry("a"), entry("b")]);
        assert_eq!(state.peek_entry().unwrap().name, "a");
        assert_eq!(state.peek_entry().unwrap().name, "a");
        assert_eq!(state.cursor(), 0);
        state.next_entry();
        assert_eq!(state.peek_entry().unwrap().name, "b");
    }

    #[test]
    fn remaining_from_cursor_excludes_consumed_entries() {
        let mut state = DirState::new(
            0,
            PathBuf::from("/d"),
            vec![entry("a"), entry("b"), entry("c")],
        );
        state.next_entry();
        assert_eq!(state.remaining_from_cursor().len(), 2);
    }
}
