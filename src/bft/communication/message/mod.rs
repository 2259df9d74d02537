//! Protocol envelope types exchanged between replicas and clients.
//!
//! Every message shares a `Header` carrying `from`/`to`; agreement
//! messages additionally carry `view`/`seq`/`digest`, and may embed the
//! originating `RequestMessage` so a recipient can verify the digest
//! without a separate lookup.

use serde::{Deserialize, Serialize};

use crate::bft::communication::NodeId;
use crate::bft::crypto::hash::Digest;
use crate::bft::dataset::Transaction;
use crate::bft::ordering::{Orderable, SeqNo, ViewNo};

/// Addressing shared by every envelope.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub from: NodeId,
    pub to: NodeId,
}

/// A batch of transactions a client submits for ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub ts: i64,
    pub from: NodeId,
    pub to: NodeId,
    pub txs: Vec<Transaction>,
    /// Monotone per client.
    pub id: u64,
}

impl RequestMessage {
    pub fn new(ts: i64, from: NodeId, to: NodeId, txs: Vec<Transaction>, id: u64) -> Self {
        RequestMessage { ts, from, to, txs, id }
    }

    /// Computes this request's digest over its serialized form.
    pub fn digest(&self) -> Digest {
        let bytes = bincode::serialize(self).expect("RequestMessage always serializes");
        crate::bft::crypto::hash::digest_bytes(&bytes)
    }
}

/// Carries the (view, seq, digest) triple agreement messages are bound
/// to, plus an optional copy of the originating request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusMessage {
    pub view: ViewNo,
    pub seq: SeqNo,
    pub digest: Digest,
    pub request: Option<RequestMessage>,
}

impl ConsensusMessage {
    pub fn new(view: ViewNo, seq: SeqNo, digest: Digest, request: Option<RequestMessage>) -> Self {
        ConsensusMessage { view, seq, digest, request }
    }
}

impl Orderable for ConsensusMessage {
    fn sequence_number(&self) -> SeqNo {
        self.seq
    }
}

/// Sent by a replica once it commits a (view, seq) locally.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct ReplyMessage {
    pub view: ViewNo,
    pub seq: SeqNo,
    pub from: NodeId,
}

/// A checkpoint vote: "I have committed up to `seq` and my state
/// there hashes to `digest`".
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct CheckpointMessage {
    pub seq: SeqNo,
    pub digest: Digest,
    pub from: NodeId,
}

/// A single `(seq, digest, request)` triple a replica claims it
/// prepared, attached to a `ViewChangeMessage` so the next primary can
/// re-propose it without asking around for the original request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedEntry {
    pub seq: SeqNo,
    pub digest: Digest,
    pub request: RequestMessage,
}

/// Broadcast by a replica that suspects the current primary, carrying
/// enough evidence for the next primary to reconstruct the window of
/// in-flight sequence numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewChangeMessage {
    pub view: ViewNo,
    pub last_stable_checkpoint: SeqNo,
    pub checkpoint_votes: u32,
    pub have_prepared: Vec<PreparedEntry>,
    pub from: NodeId,
}

/// Assembled by the new primary once it collects 2f+1 `ViewChange`
/// messages: a filled-in pre-prepare for every seq in
/// `(min_s, max_s]`, either the reconstructed original or a no-op
/// filler, preserving contiguity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewViewMessage {
    pub view: ViewNo,
    pub pre_prepares: Vec<ConsensusMessage>,
    pub from: NodeId,
}

/// Broadcast by the client once it has finished injecting its
/// workload; tells every replica to drain and shut down.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct CloseMessage {
    pub from: NodeId,
}

/// The tagged envelope carried over the wire. Variant names correspond
/// to the `MsgXxxMessage` string tags of the exchange this protocol is
/// derived from; here the tag lives in the enum discriminant rather
/// than a separate string field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SystemMessage {
    Request(RequestMessage),
    PrePrepare(ConsensusMessage),
    Prepare(ConsensusMessage),
    Commit(ConsensusMessage),
    Reply(ReplyMessage),
    Checkpoint(CheckpointMessage),
    ViewChange(ViewChangeMessage),
    NewView(NewViewMessage),
    Close(CloseMessage),
}

impl SystemMessage {
    /// A short tag for logging, matching the wire protocol this one
    /// was adapted from.
    pub fn tag(&self) -> &'static str {
        match self {
            SystemMessage::Request(_) => "MsgRequestMessage",
            SystemMessage::PrePrepare(_) => "MsgPreprepareMessage",
            SystemMessage::Prepare(_) => "MsgPrepareMessage",
            SystemMessage::Commit(_) => "MsgCommitMessage",
            SystemMessage::Reply(_) => "MsgReplyMessage",
            SystemMessage::Checkpoint(_) => "MsgCheckpointMessage",
            SystemMessage::ViewChange(_) => "MsgViewChangeMessage",
            SystemMessage::NewView(_) => "MsgNewViewMessage",
            SystemMessage::Close(_) => "MsgCloseMessage",
        }
    }
}
