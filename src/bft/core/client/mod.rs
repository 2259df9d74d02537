//! The client side of the system: injects a transaction workload into
//! the replicas and assembles the committed `Blockchain` from their
//! replies.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::bft::async_runtime as rt;
use crate::bft::communication::message::{CloseMessage, RequestMessage, SystemMessage};
use crate::bft::communication::{Node, NodeId};
use crate::bft::config::Config;
use crate::bft::dataset::{self, Transaction};
use crate::bft::election::LeaderElection;
use crate::bft::error::*;
use crate::bft::ordering::{SeqNo, ViewNo};
use crate::bft::result::Reporter;

/// One committed slot of the client-observed blockchain: the
/// transactions the primary proposed at `seq`, and the set of
/// replicas that have since reported committing it.
#[derive(Debug, Clone)]
pub struct BlockEntry {
    pub seq: SeqNo,
    pub txs: Vec<Transaction>,
    pub proposed_by: NodeId,
    pub committed_by: Vec<NodeId>,
}

/// An append-only, client-side log of committed sequence numbers,
/// built up one `Reply` at a time. The first `Reply` seen for a seq
/// creates its entry; every later `Reply` for the same seq just
/// appends its sender to the existing entry's committers.
pub struct Blockchain {
    blocks: Mutex<Vec<BlockEntry>>,
}

impl Blockchain {
    pub fn new() -> Self {
        Blockchain { blocks: Mutex::new(Vec::new()) }
    }

    /// Records the first-known committer of `seq`, creating its entry.
    pub fn add_block(&self, seq: SeqNo, txs: Vec<Transaction>, proposed_by: NodeId, committed_by: NodeId) {
        let mut blocks = self.blocks.lock();
        if blocks.iter().any(|b| b.seq == seq) {
            return;
        }
        blocks.push(BlockEntry { seq, txs, proposed_by, committed_by: vec![committed_by] });
    }

    /// Appends another replica's commit of an already-known seq.
    pub fn append_committer(&self, seq: SeqNo, committed_by: NodeId) {
        let mut blocks = self.blocks.lock();
        if let Some(entry) = blocks.iter_mut().find(|b| b.seq == seq) {
            entry.committed_by.push(committed_by);
        }
    }

    pub fn has_block(&self, seq: SeqNo) -> bool {
        self.blocks.lock().iter().any(|b| b.seq == seq)
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total transactions across every distinct committed block, so
    /// the count matches what was actually injected rather than being
    /// inflated by redundant `Reply`s for the same seq.
    pub fn committed_transaction_count(&self) -> i64 {
        self.blocks.lock().iter().map(|b| b.txs.len() as i64).sum()
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Drives one client run: reads a CSV workload, injects it in batches
/// at one-second intervals, listens for replies, and reports
/// throughput once the whole workload has either committed or a
/// grace period has elapsed.
pub struct ClientDriver {
    id: NodeId,
    node: Arc<Node>,
    config: Config,
    election: LeaderElection,
    blockchain: Arc<Blockchain>,
    reporter: Reporter,
    next_request_id: AtomicU64,
}

impl ClientDriver {
    pub fn new(node: Arc<Node>, config: Config) -> Result<Self> {
        let election = LeaderElection::new(&config);
        election.leader(ViewNo::ZERO)?;
        Ok(ClientDriver {
            id: node.id(),
            node,
            config,
            election,
            blockchain: Arc::new(Blockchain::new()),
            reporter: Reporter::new(),
            next_request_id: AtomicU64::new(0),
        })
    }

    pub fn blockchain(&self) -> Arc<Blockchain> {
        self.blockchain.clone()
    }

    fn targets(&self) -> impl Iterator<Item = NodeId> {
        NodeId::targets(0..self.config.n() as u32)
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Spawns the background task that turns inbound `Reply`
    /// envelopes into `Blockchain` entries, correlating each new seq
    /// with the oldest still-unmatched outstanding batch. This relies
    /// on the strict per-seq contiguity the replicas enforce: under
    /// normal operation, replies arrive in the same order their
    /// requests were sent.
    fn spawn_reply_collector(
        &self,
        mut inbound: mpsc::UnboundedReceiver<(NodeId, SystemMessage)>,
        pending: Arc<Mutex<VecDeque<(Vec<Transaction>, NodeId)>>>,
    ) {
        let blockchain = self.blockchain.clone();
        rt::spawn(async move {
            while let Some((from, message)) = inbound.recv().await {
                if let SystemMessage::Reply(reply) = message {
                    if blockchain.has_block(reply.seq) {
                        blockchain.append_committer(reply.seq, from);
                    } else if let Some((txs, proposed_by)) = pending.lock().pop_front() {
                        blockchain.add_block(reply.seq, txs, proposed_by, from);
                    }
                }
            }
        });
    }

    /// Reads `path`, injects its transactions in batches of
    /// `inject_speed` at one-second intervals, waits for the workload
    /// to commit (or a grace period derived from the request timeout
    /// to elapse), broadcasts `Close`, and logs a throughput summary.
    pub async fn run(
        &mut self,
        path: impl AsRef<Path>,
        inbound: mpsc::UnboundedReceiver<(NodeId, SystemMessage)>,
    ) -> Result<()> {
        let txs = dataset::read_transactions(path, self.config.max_tx_num)?;
        let total_txs = txs.len() as i64;
        let batch_size = self.config.inject_speed.max(1) as usize;
        let batches: Vec<Vec<Transaction>> = txs.chunks(batch_size).map(|c| c.to_vec()).collect();

        let pending = Arc::new(Mutex::new(VecDeque::new()));
        self.spawn_reply_collector(inbound, pending.clone());

        self.reporter.set_start_time();

        for batch in batches {
            let primary = self.election.leader(ViewNo::ZERO)?;
            let id = self.next_id();
            let req = RequestMessage::new(current_timestamp(), self.id, primary, batch.clone(), id);
            pending.lock().push_back((batch, primary));
            if let Err(e) = self.node.send(SystemMessage::Request(req), primary).await {
                log::warn!("failed to send request batch {} to primary {}: {:?}", id, primary, e);
            }
            rt::async_sleep(Duration::from_secs(1)).await;
        }

        let deadline = Duration::from_secs((self.config.expire_time.max(1) as u64) * 2);
        let started_waiting = Instant::now();
        while self.blockchain.committed_transaction_count() < total_txs && started_waiting.elapsed() < deadline {
            rt::async_sleep(Duration::from_millis(100)).await;
        }

        self.node
            .broadcast(SystemMessage::Close(CloseMessage { from: self.id }), self.targets())
            .await;

        self.reporter.set_end_time();
        self.reporter.add_committed_transactions(self.blockchain.committed_transaction_count());
        self.reporter.print();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u32) -> NodeId {
        NodeId::from(id)
    }

    fn tx(n: i64) -> Transaction {
        Transaction::new("alice", "bob", n)
    }

    #[test]
    fn first_reply_for_a_seq_creates_its_block() {
        let chain = Blockchain::new();
        chain.add_block(SeqNo::new(0), vec![tx(1)], node(0), node(0));
        assert_eq!(chain.len(), 1);
        assert!(chain.has_block(SeqNo::new(0)));
    }

    #[test]
    fn later_replies_for_the_same_seq_only_append_committers() {
        let chain = Blockchain::new();
        chain.add_block(SeqNo::new(0), vec![tx(1), tx(2)], node(0), node(0));
        chain.append_committer(SeqNo::new(0), node(1));
        chain.append_committer(SeqNo::new(0), node(2));
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.committed_transaction_count(), 2);
    }

    #[test]
    fn committed_transaction_count_sums_distinct_blocks_only() {
        let chain = Blockchain::new();
        chain.add_block(SeqNo::new(0), vec![tx(1), tx(2)], node(0), node(0));
        chain.add_block(SeqNo::new(1), vec![tx(3)], node(0), node(1));
        // a duplicate add for a seq already present must not double-count
        chain.add_block(SeqNo::new(0), vec![tx(99)], node(0), node(2));
        assert_eq!(chain.committed_transaction_count(), 3);
    }
}
