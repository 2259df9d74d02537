//! Stable-checkpoint tracking: the bounded-log garbage-collection
//! subsystem.
//!
//! Every `checkpoint_interval`-th committed sequence number (counted
//! from `initCommitSeq`) triggers a `Checkpoint` vote broadcast to
//! every peer. Once 2f+1 matching votes are seen at a seq, it becomes
//! the new stable checkpoint, which authorizes freeing per-seq state
//! at or below it and sliding the admission window forward.

use crate::bft::collections::{self, HashMap};
use crate::bft::communication::NodeId;
use crate::bft::crypto::hash::Digest;
use crate::bft::ordering::SeqNo;

struct CheckpointSlot {
    votes: HashMap<NodeId, Digest>,
}

/// Result of recording one `Checkpoint` vote.
#[derive(Debug)]
pub enum CheckpointOutcome {
    /// The vote was recorded; quorum has not been reached yet.
    Pending,
    /// The vote disagreed with this replica's own committed digest at
    /// that seq and was rejected outright.
    DigestMismatch,
    /// `seq` is at or below the already-stable checkpoint; nothing to
    /// do.
    AlreadyStable,
    /// This vote completed a quorum of matching votes at `seq`,
    /// making it the new stable checkpoint.
    NewStableCheckpoint(SeqNo),
}

/// Checkpoint bookkeeping for one replica.
pub struct GarbageCollector {
    interval: i64,
    quorum: usize,
    last_stable: SeqNo,
    slots: HashMap<SeqNo, CheckpointSlot>,
}

impl GarbageCollector {
    /// `interval` is the configured checkpoint period `K`; `quorum` is
    /// `2f+1`.
    pub fn new(interval: i64, quorum: usize) -> Self {
        GarbageCollector {
            interval: interval.max(1),
            quorum,
            last_stable: SeqNo::UNSET,
            slots: collections::hash_map(),
        }
    }

    /// Whether committing `seq` (counted from `init_commit_seq`)
    /// should trigger a checkpoint broadcast: `(seq - init_commit_seq)
    /// mod K == 0`, taken literally, including the immediate
    /// `seq == init_commit_seq` case.
    pub fn should_checkpoint(&self, seq: SeqNo, init_commit_seq: SeqNo) -> bool {
        if init_commit_seq.is_unset() {
            return false;
        }
        let delta = seq.into_inner() as i64 - init_commit_seq.into_inner() as i64;
        delta >= 0 && delta % self.interval == 0
    }

    /// Records a `Checkpoint` vote at `seq` from `voter`, claiming
    /// `digest`. `expected` is this replica's own committed digest at
    /// `seq`; a vote whose digest disagrees is rejected rather than
    /// counted, since the checkpoint protocol requires identical
    /// state across the quorum.
    pub fn record_vote(
        &mut self,
        seq: SeqNo,
        voter: NodeId,
        digest: Digest,
        expected: Digest,
    ) -> CheckpointOutcome {
        if !self.last_stable.is_unset() && seq <= self.last_stable {
            return CheckpointOutcome::AlreadyStable;
        }
        if digest != expected {
            log::warn!("rejecting checkpoint vote from {:?} at seq {}: digest mismatch", voter, seq);
            return CheckpointOutcome::DigestMismatch;
        }

        let slot = self
            .slots
            .entry(seq)
            .or_insert_with(|| CheckpointSlot { votes: collections::hash_map() });
        slot.votes.insert(voter, digest);

        if slot.votes.len() >= self.quorum && slot.votes.values().all(|d| *d == digest) {
            self.last_stable = seq;
            self.slots.retain(|&s, _| s > seq);
            CheckpointOutcome::NewStableCheckpoint(seq)
        } else {
            CheckpointOutcome::Pending
        }
    }

    /// Number of checkpoint votes recorded so far at `seq` (including
    /// this replica's own, once it has voted).
    pub fn vote_count(&self, seq: SeqNo) -> u32 {
        self.slots.get(&seq).map(|s| s.votes.len() as u32).unwrap_or(0)
    }

    /// The highest seq with a complete, matching checkpoint quorum,
    /// or `SeqNo::UNSET` if none has stabilized yet.
    pub fn last_stable_checkpoint(&self) -> SeqNo {
        self.last_stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u32) -> NodeId {
        NodeId::from(id)
    }

    #[test]
    fn checkpoint_fires_every_k_commits_from_init() {
        let gc = GarbageCollector::new(5, 3);
        assert!(gc.should_checkpoint(SeqNo::new(10), SeqNo::new(10)));
        assert!(gc.should_checkpoint(SeqNo::new(15), SeqNo::new(10)));
        assert!(!gc.should_checkpoint(SeqNo::new(14), SeqNo::new(10)));
        assert!(!gc.should_checkpoint(SeqNo::new(12), SeqNo::UNSET));
    }

    #[test]
    fn quorum_of_matching_votes_advances_stable_checkpoint() {
        let mut gc = GarbageCollector::new(5, 3);
        let d = Digest::from_bytes(&[1u8; Digest::LENGTH]).unwrap();
        assert!(matches!(gc.record_vote(SeqNo::new(5), node(0), d, d), CheckpointOutcome::Pending));
        assert!(matches!(gc.record_vote(SeqNo::new(5), node(1), d, d), CheckpointOutcome::Pending));
        let outcome = gc.record_vote(SeqNo::new(5), node(2), d, d);
        assert!(matches!(outcome, CheckpointOutcome::NewStableCheckpoint(s) if s == SeqNo::new(5)));
        assert_eq!(gc.last_stable_checkpoint(), SeqNo::new(5));
    }

    #[test]
    fn mismatched_digest_is_rejected() {
        let mut gc = GarbageCollector::new(5, 3);
        let mine = Digest::from_bytes(&[1u8; Digest::LENGTH]).unwrap();
        let theirs = Digest::from_bytes(&[2u8; Digest::LENGTH]).unwrap();
        let outcome = gc.record_vote(SeqNo::new(5), node(0), theirs, mine);
        assert!(matches!(outcome, CheckpointOutcome::DigestMismatch));
    }

    #[test]
    fn votes_at_or_below_a_stable_checkpoint_are_ignored() {
        let mut gc = GarbageCollector::new(5, 3);
        let d = Digest::from_bytes(&[1u8; Digest::LENGTH]).unwrap();
        gc.record_vote(SeqNo::new(5), node(0), d, d);
        gc.record_vote(SeqNo::new(5), node(1), d, d);
        gc.record_vote(SeqNo::new(5), node(2), d, d);
        let outcome = gc.record_vote(SeqNo::new(5), node(3), d, d);
        assert!(matches!(outcome, CheckpointOutcome::AlreadyStable));
    }
}
