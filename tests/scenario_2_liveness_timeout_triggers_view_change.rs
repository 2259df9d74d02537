//! Scenario 2 (spec.md §8): if too few replicas are reachable for the
//! prepare phase to ever reach quorum, every live replica's request
//! timer eventually fires and it moves itself into a view change
//! rather than waiting forever.
//!
//! With N=4, f=1 (quorum=3) and only two replicas alive, the primary's
//! own pre-prepare self-vote plus the one backup's vote caps the
//! prepare count at 2: one short of quorum, exactly the ceiling the
//! `handle_prepare` bug used to silently impose on *every* deployment.
//! Here it is the intended, unavoidable consequence of running below
//! quorum strength, and the request timeout is what is supposed to
//! break the deadlock.

mod common;

use std::time::Duration;

use pbft_smr::bft::dataset::Transaction;

use common::{wait_until, Harness};

#[test]
fn replicas_below_quorum_strength_suspect_the_primary_after_timeout() {
    common::run(async {
        let h = Harness::spin_up(4, &[0, 1], &[]).await;
        let primary = h.initial_primary();

        h.send_request(primary, vec![Transaction::new("alice", "bob", 10)], 1).await;

        // expire_time is 1s in the shared test config; give it a healthy
        // margin before declaring the replicas stuck.
        let backup = h.replicas[1].clone();
        let tripped = wait_until(
            || backup.is_view_changing(),
            Duration::from_secs(5),
            Duration::from_millis(50),
        )
        .await;

        assert!(tripped, "backup replica never suspected the primary after the request timed out");
    });
}
