//! Connection-oriented transport: one persistent outbound TCP stream
//! per peer, lazily dialed, and a listener dispatching decoded
//! envelopes to whoever bootstrapped the `Node`.

pub mod message;
pub mod serialize;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::bft::async_runtime as rt;
use crate::bft::error::*;

use self::message::{Header, SystemMessage};

/// A `NodeId` identifies a process (replica or client) in the system.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub fn targets<I>(iter: I) -> impl Iterator<Item = Self>
    where
        I: IntoIterator<Item = u32>,
    {
        iter.into_iter().map(Self)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> NodeId {
        NodeId(id)
    }
}

impl From<NodeId> for usize {
    fn from(id: NodeId) -> usize {
        id.0 as usize
    }
}

impl From<NodeId> for u32 {
    fn from(id: NodeId) -> u32 {
        id.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bootstrap configuration for a `Node`.
pub struct NodeConfig {
    /// This process's own id.
    pub id: NodeId,
    /// Addresses of every replica/client in the system, keyed by id.
    pub addrs: HashMap<NodeId, SocketAddr>,
}

type OutboundItem = (Header, SystemMessage);

/// A handle to the transport layer: dials peers lazily, keeps one
/// outbound connection per peer alive, and accepts inbound
/// connections, forwarding every decoded envelope to a channel handed
/// to `bootstrap`.
pub struct Node {
    id: NodeId,
    addrs: HashMap<NodeId, SocketAddr>,
    // read-mostly: only dial-and-insert takes the write lock.
    peer_tx: RwLock<HashMap<NodeId, mpsc::UnboundedSender<OutboundItem>>>,
}

impl Node {
    /// Binds this process's own listening address and spawns the
    /// accept loop. Decoded inbound envelopes are forwarded to `sink`.
    pub async fn bootstrap(
        cfg: NodeConfig,
        sink: mpsc::UnboundedSender<(NodeId, SystemMessage)>,
    ) -> Result<Arc<Node>> {
        let own_addr = *cfg
            .addrs
            .get(&cfg.id)
            .ok_or_else(|| Error::simple(ErrorKind::Communication))?;

        let listener = TcpListener::bind(own_addr).await?;

        let node = Arc::new(Node {
            id: cfg.id,
            addrs: cfg.addrs,
            peer_tx: RwLock::new(HashMap::new()),
        });

        rt::spawn(Self::accept_loop(listener, sink));

        Ok(node)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    async fn accept_loop(listener: TcpListener, sink: mpsc::UnboundedSender<(NodeId, SystemMessage)>) {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    log::warn!("failed to accept inbound connection: {}", e);
                    continue;
                }
            };
            rt::spawn(Self::reader_task(stream, sink.clone()));
        }
    }

    async fn reader_task(mut stream: TcpStream, sink: mpsc::UnboundedSender<(NodeId, SystemMessage)>) {
        loop {
            match serialize::read_frame(&mut stream).await {
                Ok(Some((header, message))) => {
                    if sink.send((header.from, message)).is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    log::warn!("error reading frame from peer: {}", e);
                    return;
                }
            }
        }
    }

    /// Sends `message` to `target`, dialing a fresh connection if none
    /// is currently open.
    pub async fn send(&self, message: SystemMessage, target: NodeId) -> Result<()> {
        let header = Header { from: self.id, to: target };
        let tx = self.get_or_connect(target).await?;
        tx.send((header, message))
            .map_err(|_| Error::simple(ErrorKind::Communication))?;
        Ok(())
    }

    /// Sends `message` to every id in `targets` other than this node.
    pub async fn broadcast<I>(&self, message: SystemMessage, targets: I)
    where
        I: IntoIterator<Item = NodeId>,
    {
        for target in targets {
            if target == self.id {
                continue;
            }
            if let Err(e) = self.send(message.clone(), target).await {
                log::warn!("failed to send {} to node {}: {:?}", message.tag(), target, e);
            }
        }
    }

    async fn get_or_connect(&self, target: NodeId) -> Result<mpsc::UnboundedSender<OutboundItem>> {
        if let Some(tx) = self.peer_tx.read().get(&target) {
            if !tx.is_closed() {
                return Ok(tx.clone());
            }
        }

        let addr = *self
            .addrs
            .get(&target)
            .ok_or_else(|| Error::simple(ErrorKind::Communication))?;

        let stream = Self::dial_with_retry(addr).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        rt::spawn(Self::writer_task(stream, rx));

        self.peer_tx.write().insert(target, tx.clone());
        Ok(tx)
    }

    /// Dials `addr`, retrying exactly once after a short backoff on
    /// failure.
    async fn dial_with_retry(addr: SocketAddr) -> Result<TcpStream> {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => log::warn!("first dial to {} failed: {}, retrying", addr, e),
        }
        rt::async_sleep(Duration::from_millis(500)).await;
        TcpStream::connect(addr).await.map_err(Error::from)
    }

    async fn writer_task(mut stream: TcpStream, mut rx: mpsc::UnboundedReceiver<OutboundItem>) {
        while let Some((header, message)) = rx.recv().await {
            if let Err(e) = serialize::write_frame(&mut stream, &header, &message).await {
                log::warn!("dropping connection after write failure: {:?}", e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::communication::message::CloseMessage;

    #[tokio::test]
    async fn two_nodes_exchange_a_message_over_loopback() {
        let addr_a: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let addr_b: SocketAddr = "127.0.0.1:0".parse().unwrap();

        // bind both listeners up front so we know their ports before
        // building the address table each node needs.
        let listener_a = TcpListener::bind(addr_a).await.unwrap();
        let listener_b = TcpListener::bind(addr_b).await.unwrap();
        let port_a = listener_a.local_addr().unwrap().port();
        let port_b = listener_b.local_addr().unwrap().port();
        drop(listener_a);
        drop(listener_b);

        let mut addrs = HashMap::new();
        addrs.insert(NodeId::from(0), format!("127.0.0.1:{}", port_a).parse().unwrap());
        addrs.insert(NodeId::from(1), format!("127.0.0.1:{}", port_b).parse().unwrap());

        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let node_a = Node::bootstrap(
            NodeConfig { id: NodeId::from(0), addrs: addrs.clone() },
            tx_a,
        )
        .await
        .unwrap();
        let _node_b = Node::bootstrap(NodeConfig { id: NodeId::from(1), addrs }, tx_b)
            .await
            .unwrap();

        node_a
            .send(SystemMessage::Close(CloseMessage { from: NodeId::from(0) }), NodeId::from(1))
            .await
            .unwrap();

        let (from, message) = rx_b.recv().await.unwrap();
        assert_eq!(from, NodeId::from(0));
        assert!(matches!(message, SystemMessage::Close(_)));
    }
}
