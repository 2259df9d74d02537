//! The view-change subsystem: suspends agreement once the primary is
//! suspected faulty, gathers `ViewChange` votes, and assembles the
//! `NewView` the prospective primary broadcasts.

use crate::bft::collections::{self, HashMap};
use crate::bft::communication::message::{ConsensusMessage, PreparedEntry, ViewChangeMessage};
use crate::bft::communication::NodeId;
use crate::bft::crypto::hash::Digest;
use crate::bft::ordering::{SeqNo, ViewNo};

/// A zero-filled digest used to tag a no-op filler pre-prepare
/// reconstructed during a view change, for a seq no `ViewChange` vote
/// proved was ever prepared.
fn filler_digest() -> Digest {
    Digest::from_bytes(&[0u8; Digest::LENGTH]).expect("a zero-length digest always parses")
}

/// A replica's view-change bookkeeping for one attempted transition.
pub struct ViewChanger {
    in_view_change: bool,
    pre_change_view: ViewNo,
    msgs: HashMap<NodeId, ViewChangeMessage>,
}

impl ViewChanger {
    pub fn new() -> Self {
        ViewChanger {
            in_view_change: false,
            pre_change_view: ViewNo::ZERO,
            msgs: collections::hash_map(),
        }
    }

    pub fn in_view_change(&self) -> bool {
        self.in_view_change
    }

    /// Enters view-change mode, recording the pre-change view and
    /// discarding any previously accumulated `ViewChange` votes.
    pub fn start(&mut self, pre_change_view: ViewNo) {
        self.in_view_change = true;
        self.pre_change_view = pre_change_view;
        self.msgs.clear();
    }

    /// Records a peer's `ViewChange` vote, after checking it targets
    /// `pre_change_view + 1`. Returns every vote gathered so far once
    /// `quorum` (2f+1, including this replica's own vote inserted by
    /// the caller) is reached, or `None` otherwise.
    pub fn record(&mut self, msg: ViewChangeMessage, quorum: usize) -> Option<Vec<ViewChangeMessage>> {
        if msg.view != self.pre_change_view.next() {
            return None;
        }
        self.msgs.insert(msg.from, msg);
        if self.msgs.len() >= quorum {
            Some(self.msgs.values().cloned().collect())
        } else {
            None
        }
    }

    /// Assembles the `NewView` pre-prepares from a quorum of
    /// `ViewChange` votes, following the canonical PBFT min-s/max-s
    /// rule (see DESIGN.md): `min_s` is the lowest
    /// stable checkpoint across the quorum, `max_s` the highest
    /// prepared seq referenced by any vote's `have_prepared` set.
    /// Every seq in `(min_s, max_s]` becomes either the reconstructed
    /// original pre-prepare, if some vote proves it was prepared, or a
    /// filler pre-prepare with no request, preserving contiguity.
    pub fn assemble_new_view(&self, votes: &[ViewChangeMessage], new_view: ViewNo) -> Vec<ConsensusMessage> {
        let min_s = votes
            .iter()
            .map(|v| v.last_stable_checkpoint)
            .min()
            .unwrap_or(SeqNo::UNSET);
        let max_s = votes
            .iter()
            .flat_map(|v| v.have_prepared.iter().map(|p| p.seq))
            .max()
            .unwrap_or(min_s);

        let mut by_seq: HashMap<SeqNo, &PreparedEntry> = collections::hash_map();
        for vote in votes {
            for entry in &vote.have_prepared {
                by_seq.entry(entry.seq).or_insert(entry);
            }
        }

        let (low, high) = (min_s.into_inner(), max_s.into_inner());
        let mut pre_prepares = Vec::new();
        if high <= low {
            return pre_prepares;
        }
        for raw in (low + 1)..=high {
            let seq = SeqNo::new(raw);
            let message = match by_seq.get(&seq) {
                Some(entry) => {
                    ConsensusMessage::new(new_view, seq, entry.digest, Some(entry.request.clone()))
                }
                None => ConsensusMessage::new(new_view, seq, filler_digest(), None),
            };
            pre_prepares.push(message);
        }
        pre_prepares
    }

    /// Leaves view-change mode, e.g. once a `NewView` has been
    /// installed.
    pub fn finish(&mut self) {
        self.in_view_change = false;
        self.msgs.clear();
    }
}

impl Default for ViewChanger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::communication::message::RequestMessage;

    fn node(id: u32) -> NodeId {
        NodeId::from(id)
    }

    fn prepared_entry(seq: i32, digest: Digest) -> PreparedEntry {
        PreparedEntry {
            seq: SeqNo::new(seq),
            digest,
            request: RequestMessage::new(0, node(0), node(0), vec![], 1),
        }
    }

    #[test]
    fn votes_for_the_wrong_target_view_are_ignored() {
        let mut vc = ViewChanger::new();
        vc.start(ViewNo::new(2));
        let msg = ViewChangeMessage {
            view: ViewNo::new(9),
            last_stable_checkpoint: SeqNo::UNSET,
            checkpoint_votes: 0,
            have_prepared: vec![],
            from: node(1),
        };
        assert!(vc.record(msg, 3).is_none());
    }

    #[test]
    fn quorum_is_reached_once_enough_distinct_votes_arrive() {
        let mut vc = ViewChanger::new();
        vc.start(ViewNo::new(2));
        for id in 0..2 {
            let msg = ViewChangeMessage {
                view: ViewNo::new(3),
                last_stable_checkpoint: SeqNo::UNSET,
                checkpoint_votes: 0,
                have_prepared: vec![],
                from: node(id),
            };
            assert!(vc.record(msg, 3).is_none());
        }
        let msg = ViewChangeMessage {
            view: ViewNo::new(3),
            last_stable_checkpoint: SeqNo::UNSET,
            checkpoint_votes: 0,
            have_prepared: vec![],
            from: node(2),
        };
        assert_eq!(vc.record(msg, 3).unwrap().len(), 3);
    }

    #[test]
    fn new_view_fills_gaps_between_min_s_and_max_s() {
        let vc = ViewChanger::new();
        let digest = filler_digest();
        let votes = vec![
            ViewChangeMessage {
                view: ViewNo::new(1),
                last_stable_checkpoint: SeqNo::new(10),
                checkpoint_votes: 3,
                have_prepared: vec![prepared_entry(13, digest)],
                from: node(0),
            },
            ViewChangeMessage {
                view: ViewNo::new(1),
                last_stable_checkpoint: SeqNo::new(10),
                checkpoint_votes: 3,
                have_prepared: vec![],
                from: node(1),
            },
        ];
        let pre_prepares = vc.assemble_new_view(&votes, ViewNo::new(1));
        let seqs: Vec<i32> = pre_prepares.iter().map(|m| m.seq.into_inner()).collect();
        assert_eq!(seqs, vec![11, 12, 13]);
        assert!(pre_prepares[0].request.is_none());
        assert!(pre_prepares[2].request.is_some());
    }
}
