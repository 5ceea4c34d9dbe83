//! Directory-listing state machine.
//!
//! Pure transition functions over the event trace; no I/O, fully unit
//! testable, and deterministic for a fixed event sequence. Ported from
//! `libprecache.c`'s `enum readdir_tracker_state`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Start,
    R1O0,
    R1O1,
    R2O1,
    R2O2,
    R3O2,
    Precache,
    Skip,
}

impl State {
    pub fn on_read_entry(self) -> State {
        match self {
            State::Start => State::R1O0,
            State::R1O0 => State::Skip,
            State::R1O1 => State::R2O1,
            State::R2O1 => State::Skip,
            State::R2O2 => State::R3O2,
            State::R3O2 => State::Skip,
            State::Precache | State::Skip => self,
        }
    }

    pub fn on_matching_open(self) -> State {
        match self {
            State::Start => State::Skip,
            State::R1O0 => State::R1O1,
            State::R1O1 => State::Skip,
            State::R2O1 => State::R2O2,
            State::R2O2 => State::Skip,
            State::R3O2 => State::Precache,
            State::Precache | State::Skip => self,
        }
    }

    pub fn is_precache(self) -> bool {
        matches!(self, State::Precache)
    }
}

impl Default for State {
    fn default() -> Self {
        State::Start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_open_list_open_list_open_reaches_precache() {
        let mut s = State::Start;
        s = s.on_read_entry(); // r1o0
        s = s.on_matching_open(); // r1o1
        s = s.on_read_entry(); // r2o1
        s = s.on_matching_open(); // r2o2
        s = s.on_read_entry(); // r3o2
        s = s.on_matching_open(); // precache
        assert_eq!(s, State::Precache);
    }

    #[test]
    fn open_before_any_read_is_skip() {
        let s = State::Start.on_matching_open();
        assert_eq!(s, State::Skip);
    }

    #[test]
    fn two_reads_in_a_row_is_skip() {
        let s = State::Start.on_read_entry().on_read_entry();
        assert_eq!(s, State::Skip);
    }

    #[test]
    fn terminal_states_hold_on_any_event() {
        assert_eq!(State::Precache.on_read_entry(), State::Precache);
        assert_eq!(State::Precache.on_matching_open(), State::Precache);
        assert_eq!(State::Skip.on_read_entry(), State::Skip);
        assert_eq!(State::Skip.on_matching_open(), State::Skip);
    }

    #[test]
    fn determinism_for_a_fixed_event_trace() {
        let events = [true, false, true, false, true, false]; // read, open, read, open, read, open
        let run = || {
            let mut s = State::Start;
            for &is_read in &events {
                s = if is_read { s.on_read_entry() } else { s.on_matching_open() };
            }
            s
        };
        assert_eq!(run(), run());
    }
}
