//! Admission sequencing.
//!
//! Every admitted record and every checkpoint draws a number from one
//! sequencer. Record numbers are drawn while the record's queue lock is
//! held, so a checkpoint numbered `s` is preceded by exactly the records
//! numbered below `s`, and all of those are already queued.

use parking_lot::Mutex;
use spillway_core::SeqNo;

#[derive(Debug)]
struct SequencerState {
    next: u64,
    records_since_global: u64,
}

/// Hands out [`SeqNo`]s and counts records between global checkpoints.
#[derive(Debug)]
pub struct Sequencer {
    state: Mutex<SequencerState>,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sequencer {
    /// Creates a sequencer starting at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(SequencerState {
                next: 1,
                records_since_global: 0,
            }),
        }
    }

    /// Numbers a data record.
    pub fn next_record(&self) -> SeqNo {
        let mut state = self.state.lock();
        state.records_since_global += 1;
        Self::advance(&mut state)
    }

    /// Numbers a stream checkpoint.
    pub fn next_checkpoint(&self) -> SeqNo {
        Self::advance(&mut self.state.lock())
    }

    /// Numbers a global checkpoint and returns how many records were
    /// numbered since the previous one.
    pub fn next_global_checkpoint(&self) -> (SeqNo, u64) {
        let mut state = self.state.lock();
        let count = std::mem::take(&mut state.records_since_global);
        (Self::advance(&mut state), count)
    }

    /// Returns the number the next admission will get.
    #[must_use]
    pub fn peek(&self) -> SeqNo {
        SeqNo::new(self.state.lock().next)
    }

    fn advance(state: &mut SequencerState) -> SeqNo {
        let seq = SeqNo::new(state.next);
        state.next += 1;
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_are_increasing() {
        let sequencer = Sequencer::new();
        let a = sequencer.next_record();
        let b = sequencer.next_checkpoint();
        let (c, _) = sequencer.next_global_checkpoint();
        assert!(a < b && b < c);
        assert_eq!(sequencer.peek(), c.next());
    }

    #[test]
    fn test_global_checkpoint_counts_records() {
        let sequencer = Sequencer::new();
        for _ in 0..3 {
            sequencer.next_record();
        }
        sequencer.next_checkpoint();
        assert_eq!(sequencer.next_global_checkpoint().1, 3);

        sequencer.next_record();
        assert_eq!(sequencer.next_global_checkpoint().1, 1);
        assert_eq!(sequencer.next_global_checkpoint().1, 0);
    }
}
