//! Shared harness for the multi-replica scenario tests: spins up real
//! `Node`s bound to `127.0.0.1:0` loopback ports (reserved by
//! bind-then-drop before the address table is built, the same pattern
//! `bft::communication`'s own loopback test uses) and wires some of
//! them up as full `Replica`s, leaving the rest as plain `Node`s a test
//! can puppet directly to play a silent, slow, or Byzantine peer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use pbft_smr::bft::async_runtime as rt;
use pbft_smr::bft::communication::message::{RequestMessage, SystemMessage};
use pbft_smr::bft::communication::{Node, NodeConfig, NodeId};
use pbft_smr::bft::config::Config;
use pbft_smr::bft::core::server::Replica;
use pbft_smr::bft::dataset::Transaction;
use pbft_smr::bft::{self, InitConfig};

pub type Inbound = mpsc::UnboundedReceiver<(NodeId, SystemMessage)>;

/// Installs the global async runtime if no test in this binary has
/// already done so. Safe to call from every test: `bft::init` is a
/// no-op past the first call, and the underlying runtime outlives the
/// one-shot `InitGuard` regardless of which test's guard drops first.
fn ensure_runtime() {
    bft::init(InitConfig { async_threads: 4 }).expect("failed to init runtime");
}

/// Runs `fut` to completion on the same global runtime every replica
/// and client binary drives itself with. A plain `#[tokio::test]`
/// would give `fut` its own private runtime, but `Replica`'s internal
/// timers always spawn onto the process-wide one via
/// `bft::async_runtime::spawn` regardless of which runtime is polling
/// the calling task, so any `Node`/`Replica` built outside of this
/// exact runtime would hand sockets and timers to two different
/// executors and panic the first time either got polled.
pub fn run<F: std::future::Future>(fut: F) -> F::Output {
    ensure_runtime();
    rt::block_on(fut)
}

/// A deployment config exercising the real quorum arithmetic for
/// `node_num` replicas, with a short request timeout so the
/// liveness-timeout scenario doesn't have to wait long, and everything
/// else set generously enough not to interfere with the scenario under
/// test.
pub fn base_config(node_num: i64) -> Config {
    Config {
        data_dir: "data".into(),
        max_tx_num: 10_000,
        inject_speed: 10,
        max_block_size: 10,
        node_num,
        election_method: "round_robin".into(),
        expire_time: 1,
        seq_number_upper_bound: 1_000,
        seq_number_lower_bound: 0,
        checkpoint_interval: 5,
        faulty_nodes_num: (node_num - 1) / 3,
    }
}

async fn reserve_ports(count: usize) -> Vec<u16> {
    let mut ports = Vec::with_capacity(count);
    for _ in 0..count {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        ports.push(listener.local_addr().unwrap().port());
    }
    ports
}

/// A running deployment: `active_ids` are full `Replica`s driven by
/// their own `run()` task; `passive_ids` are bare `Node`s a test can
/// send forged or delayed messages through, or just listen on, without
/// any agreement logic reacting on their behalf. Ids outside both sets
/// are absent from every address table entirely, modelling a replica
/// that is simply unreachable.
pub struct Harness {
    pub replicas: Vec<Arc<Replica>>,
    pub passive: HashMap<u32, (Arc<Node>, Inbound)>,
    pub client_node: Arc<Node>,
    pub client_id: NodeId,
    pub client_inbound: Inbound,
    pub run_handles: Vec<rt::JoinHandle<()>>,
    pub config: Config,
}

impl Harness {
    /// Boots `node_num` replicas' worth of address space (plus one
    /// extra slot for the client), bootstraps a full `Replica` for
    /// every id in `active_ids`, a bare listening `Node` for every id
    /// in `passive_ids`, and a client `Node` at id `node_num`. Only
    /// ids present in one of the two sets get an address table entry
    /// at all, so messages to every other id fail to dial immediately
    /// rather than hanging.
    pub async fn spin_up(node_num: i64, active_ids: &[u32], passive_ids: &[u32]) -> Harness {
        let config = base_config(node_num);

        let known: Vec<u32> = active_ids.iter().chain(passive_ids.iter()).copied().collect();
        let ports = reserve_ports(known.len() + 1).await;

        let mut addrs: HashMap<NodeId, SocketAddr> = HashMap::new();
        for (i, &id) in known.iter().enumerate() {
            addrs.insert(NodeId::from(id), format!("127.0.0.1:{}", ports[i]).parse().unwrap());
        }
        let client_id = NodeId::from(node_num as u32);
        addrs.insert(client_id, format!("127.0.0.1:{}", ports[known.len()]).parse().unwrap());

        let mut replicas = Vec::new();
        let mut run_handles = Vec::new();
        for &id in active_ids {
            let (sink, inbound) = mpsc::unbounded_channel();
            let node = Node::bootstrap(NodeConfig { id: NodeId::from(id), addrs: addrs.clone() }, sink)
                .await
                .unwrap();
            let (replica, timer_events) = Replica::new(node, config.clone()).unwrap();
            let handle_for_run = replica.clone();
            run_handles.push(rt::spawn(async move {
                handle_for_run.run(inbound, timer_events).await;
            }));
            replicas.push(replica);
        }

        let mut passive = HashMap::new();
        for &id in passive_ids {
            let (sink, inbound) = mpsc::unbounded_channel();
            let node = Node::bootstrap(NodeConfig { id: NodeId::from(id), addrs: addrs.clone() }, sink)
                .await
                .unwrap();
            passive.insert(id, (node, inbound));
        }

        let (client_sink, client_inbound) = mpsc::unbounded_channel();
        let client_node = Node::bootstrap(NodeConfig { id: client_id, addrs }, client_sink)
            .await
            .unwrap();

        Harness { replicas, passive, client_node, client_id, client_inbound, run_handles, config }
    }

    /// The primary of view zero, per the round-robin election every
    /// scenario here leaves at its default.
    pub fn initial_primary(&self) -> NodeId {
        NodeId::from(0)
    }

    /// Sends a one-off request batch from the harness's client to
    /// `to`.
    pub async fn send_request(&self, to: NodeId, txs: Vec<Transaction>, id: u64) {
        let req = RequestMessage::new(0, self.client_id, to, txs, id);
        self.client_node
            .send(SystemMessage::Request(req), to)
            .await
            .expect("client failed to reach primary");
    }
}

/// Waits up to `timeout` for the next inbound envelope, or `None` on
/// timeout or a closed channel.
pub async fn recv_within(inbound: &mut Inbound, timeout: Duration) -> Option<(NodeId, SystemMessage)> {
    tokio::time::timeout(timeout, inbound.recv()).await.ok().flatten()
}

/// Polls `f` every `interval` until it returns `true` or `timeout`
/// elapses, returning whether it ever succeeded.
pub async fn wait_until<F: Fn() -> bool>(f: F, timeout: Duration, interval: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if f() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}
