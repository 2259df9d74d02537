//! Per-sequence-number quorum counting for the prepare and commit
//! phases.
//!
//! Votes are deduplicated by `(sender, seq, phase)`: a sender that
//! resends the same `Prepare`/`Commit` envelope only ever counts once.
//! This resolves in the safety-correct direction an open question
//! about duplicate messages otherwise inflating a quorum count.
//!
//! Counters live in a sliding window indexed by offset from the
//! window's low watermark rather than by raw sequence number, so
//! memory use tracks the admission window instead of growing with
//! every sequence number the replica has ever seen.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::bft::collections::{self, HashSet};
use crate::bft::communication::NodeId;
use crate::bft::ordering::SeqNo;

struct Slot {
    seq: SeqNo,
    prepare_count: AtomicU32,
    commit_count: AtomicU32,
    prepare_voters: HashSet<NodeId>,
    commit_voters: HashSet<NodeId>,
}

impl Slot {
    fn new(seq: SeqNo) -> Self {
        Slot {
            seq,
            prepare_count: AtomicU32::new(0),
            commit_count: AtomicU32::new(0),
            prepare_voters: collections::hash_set(),
            commit_voters: collections::hash_set(),
        }
    }
}

/// Tracks `prepareCount[seq]`/`commitCount[seq]` for every sequence
/// number in the replica's current admission window.
///
/// The counts themselves are plain atomics so they may be read for
/// logging without acquiring the replica's handle-message mutex; the
/// read-modify-decide step that acts on a count reaching quorum must
/// still happen while that mutex is held.
pub struct QuorumTracker {
    window_low: SeqNo,
    slots: Vec<Slot>,
}

impl QuorumTracker {
    /// Builds a tracker covering `window_span` consecutive sequence
    /// numbers starting at `window_low`.
    pub fn new(window_low: SeqNo, window_span: usize) -> Self {
        QuorumTracker {
            window_low,
            slots: Self::fresh_slots(window_low, window_span),
        }
    }

    fn fresh_slots(window_low: SeqNo, window_span: usize) -> Vec<Slot> {
        (0..window_span)
            .map(|i| Slot::new(SeqNo::new(window_low.into_inner().wrapping_add(i as i32))))
            .collect()
    }

    fn slot_mut(&mut self, seq: SeqNo) -> Option<&mut Slot> {
        let offset = seq.into_inner().checked_sub(self.window_low.into_inner())?;
        if offset < 0 {
            return None;
        }
        self.slots.get_mut(offset as usize)
    }

    fn slot_ref(&self, seq: SeqNo) -> Option<&Slot> {
        let offset = seq.into_inner().checked_sub(self.window_low.into_inner())?;
        if offset < 0 {
            return None;
        }
        self.slots.get(offset as usize)
    }

    /// Records a `Prepare` vote from `voter` at `seq`. Returns the
    /// total distinct-sender vote count at `seq` after recording it,
    /// or `None` if `seq` falls outside the tracked window.
    pub fn record_prepare(&mut self, seq: SeqNo, voter: NodeId) -> Option<u32> {
        let slot = self.slot_mut(seq)?;
        if slot.prepare_voters.insert(voter) {
            slot.prepare_count.fetch_add(1, Ordering::Relaxed);
        }
        Some(slot.prepare_count.load(Ordering::Relaxed))
    }

    /// Records a `Commit` vote from `voter` at `seq`. Returns the
    /// total distinct-sender vote count at `seq` after recording it,
    /// or `None` if `seq` falls outside the tracked window.
    pub fn record_commit(&mut self, seq: SeqNo, voter: NodeId) -> Option<u32> {
        let slot = self.slot_mut(seq)?;
        if slot.commit_voters.insert(voter) {
            slot.commit_count.fetch_add(1, Ordering::Relaxed);
        }
        Some(slot.commit_count.load(Ordering::Relaxed))
    }

    /// Current prepare vote count at `seq`, `0` if out of window.
    pub fn prepare_count(&self, seq: SeqNo) -> u32 {
        self.slot_ref(seq)
            .map(|s| s.prepare_count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Current commit vote count at `seq`, `0` if out of window.
    pub fn commit_count(&self, seq: SeqNo) -> u32 {
        self.slot_ref(seq)
            .map(|s| s.commit_count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Slides the window so its low watermark becomes `new_low`,
    /// discarding counters below it and extending with fresh, empty
    /// slots so the span stays `window_span`. A no-op if `new_low` is
    /// not ahead of the current watermark.
    pub fn advance_window(&mut self, new_low: SeqNo, window_span: usize) {
        let shift = new_low.into_inner().wrapping_sub(self.window_low.into_inner());
        if shift <= 0 {
            return;
        }
        let shift = shift as usize;
        if shift >= self.slots.len() {
            self.slots = Self::fresh_slots(new_low, window_span);
        } else {
            self.slots.drain(0..shift);
            let next_seq = self
                .slots
                .last()
                .map(|s| s.seq.into_inner().wrapping_add(1))
                .unwrap_or_else(|| new_low.into_inner());
            for i in 0..shift {
                self.slots.push(Slot::new(SeqNo::new(next_seq.wrapping_add(i as i32))));
            }
        }
        self.window_low = new_low;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_votes_from_the_same_sender_count_once() {
        let mut q = QuorumTracker::new(SeqNo::new(0), 8);
        let voter = NodeId::from(1);
        assert_eq!(q.record_prepare(SeqNo::new(0), voter), Some(1));
        assert_eq!(q.record_prepare(SeqNo::new(0), voter), Some(1));
    }

    #[test]
    fn distinct_senders_accumulate() {
        let mut q = QuorumTracker::new(SeqNo::new(0), 8);
        assert_eq!(q.record_commit(SeqNo::new(3), NodeId::from(0)), Some(1));
        assert_eq!(q.record_commit(SeqNo::new(3), NodeId::from(1)), Some(2));
        assert_eq!(q.record_commit(SeqNo::new(3), NodeId::from(2)), Some(3));
        assert_eq!(q.commit_count(SeqNo::new(3)), 3);
    }

    #[test]
    fn out_of_window_votes_are_rejected() {
        let mut q = QuorumTracker::new(SeqNo::new(10), 4);
        assert_eq!(q.record_prepare(SeqNo::new(3), NodeId::from(0)), None);
        assert_eq!(q.record_prepare(SeqNo::new(20), NodeId::from(0)), None);
    }

    #[test]
    fn advancing_the_window_drops_old_counters_and_keeps_span() {
        let mut q = QuorumTracker::new(SeqNo::new(0), 4);
        q.record_prepare(SeqNo::new(1), NodeId::from(0));
        q.advance_window(SeqNo::new(2), 4);
        // seq 1 fell below the new low watermark and was recycled
        assert_eq!(q.prepare_count(SeqNo::new(1)), 0);
        // the new high end of the window is fresh and usable
        assert_eq!(q.record_prepare(SeqNo::new(5), NodeId::from(0)), Some(1));
    }
}
