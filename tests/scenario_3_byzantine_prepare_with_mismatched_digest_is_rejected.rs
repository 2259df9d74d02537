//! Scenario 3 (spec.md §8): a `Prepare` claiming a seq already bound to
//! a different request's digest is rejected outright rather than
//! counted toward quorum.
//!
//! The primary is the only real `Replica` here; two bare `Node`s play
//! attacker/backup at ids 1 and 2 so the test controls exactly what
//! they vote. One sends a genuinely matching `Prepare` (a control,
//! proving the wiring can reach quorum at all); the other sends a
//! `Prepare` for a different, self-consistent request at the very same
//! (view, seq). If the forged vote were ever counted, self (1) +
//! genuine (1) + forged (1) = 3 = quorum and a `Commit` would appear;
//! since it must be dropped before being counted, the primary is left
//! one vote short and never broadcasts `Commit` at all.

mod common;

use std::time::Duration;

use pbft_smr::bft::communication::message::{ConsensusMessage, RequestMessage, SystemMessage};
use pbft_smr::bft::dataset::Transaction;

use common::{recv_within, Harness};

#[test]
fn forged_prepare_for_a_different_request_never_reaches_quorum() {
    common::run(async {
        let mut h = Harness::spin_up(4, &[0], &[1, 2]).await;
        let primary = h.initial_primary();

        h.send_request(primary, vec![Transaction::new("alice", "bob", 10)], 1).await;

        // Both passive nodes observe the real pre-prepare first, so they
        // learn the (view, seq) the forged vote needs to target.
        let (genuine_cm, genuine_req) = {
            let (_node, inbound) = h.passive.get_mut(&1).unwrap();
            match recv_within(inbound, Duration::from_secs(5)).await {
                Some((_, SystemMessage::PrePrepare(cm))) => {
                    let req = cm.request.clone().unwrap();
                    (cm, req)
                }
                other => panic!("expected a PrePrepare, got {:?}", other.map(|(_, m)| m.tag())),
            }
        };
        {
            let (_node, inbound) = h.passive.get_mut(&2).unwrap();
            recv_within(inbound, Duration::from_secs(5))
                .await
                .expect("second passive node should see the pre-prepare too");
        }

        let forged_req = RequestMessage::new(0, h.client_id, primary, vec![Transaction::new("mallory", "mallory", 999)], 2);
        let forged_cm = ConsensusMessage::new(genuine_cm.view, genuine_cm.seq, forged_req.digest(), Some(forged_req));

        let honest_cm = ConsensusMessage::new(genuine_cm.view, genuine_cm.seq, genuine_cm.digest, Some(genuine_req));

        {
            let (node, _inbound) = h.passive.get(&1).unwrap();
            node.send(SystemMessage::Prepare(forged_cm), primary).await.unwrap();
        }
        {
            let (node, _inbound) = h.passive.get(&2).unwrap();
            node.send(SystemMessage::Prepare(honest_cm), primary).await.unwrap();
        }

        // One vote short of quorum (self + the one honest backup): no
        // Commit should ever reach either passive node, however long we
        // drain their inbound queues (which do still carry the primary's
        // own self-broadcast Prepare).
        let (_node1, inbound1) = h.passive.get_mut(&1).unwrap();
        let mut saw_commit = false;
        loop {
            match recv_within(inbound1, Duration::from_millis(500)).await {
                Some((_, SystemMessage::Commit(_))) => {
                    saw_commit = true;
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        assert!(!saw_commit, "a forged prepare for a mismatched request was counted toward quorum");
    });
}
