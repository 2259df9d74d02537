//! Scenario 6 (spec.md §8): the real `ClientDriver` reads a CSV
//! workload, injects it in fixed-size batches at one-second intervals,
//! and its `Blockchain` ends up holding exactly the transactions that
//! were committed, however many batches that took.

mod common;

use std::io::Write;

use pbft_smr::bft::core::client::ClientDriver;

use common::Harness;

#[test]
fn workload_commits_in_batches_at_the_configured_rate() {
    common::run(async {
        let h = Harness::spin_up(4, &[0, 1, 2, 3], &[]).await;

        let mut client_config = h.config.clone();
        client_config.inject_speed = 3;
        client_config.max_tx_num = 100;

        let mut csv = tempfile::NamedTempFile::new().unwrap();
        writeln!(csv, "sender,receiver,amount").unwrap();
        for i in 0..6 {
            writeln!(csv, "alice,bob,{}", i + 1).unwrap();
        }

        let mut driver = ClientDriver::new(h.client_node.clone(), client_config).unwrap();
        driver
            .run(csv.path(), h.client_inbound)
            .await
            .expect("client run should complete once the workload commits");

        let blockchain = driver.blockchain();
        assert_eq!(blockchain.committed_transaction_count(), 6);
        assert_eq!(blockchain.len(), 2, "6 transactions at inject_speed 3 should land in exactly 2 batches");
    });
}
