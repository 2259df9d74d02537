//! The replica state machine: the three-phase agreement protocol,
//! wired together with the checkpoint garbage collector, the timer
//! registry and the view-change subsystem.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::bft::collections::{self, HashMap};
use crate::bft::communication::message::{
    CheckpointMessage, ConsensusMessage, NewViewMessage, PreparedEntry, ReplyMessage,
    RequestMessage, SystemMessage, ViewChangeMessage,
};
use crate::bft::communication::{Node, NodeId};
use crate::bft::config::Config;
use crate::bft::consensus::QuorumTracker;
use crate::bft::crypto::hash::Digest;
use crate::bft::election::LeaderElection;
use crate::bft::error::*;
use crate::bft::gc::{CheckpointOutcome, GarbageCollector};
use crate::bft::ordering::{SeqNo, ViewNo};
use crate::bft::prng;
use crate::bft::service::Service;
use crate::bft::sync::ViewChanger;
use crate::bft::timeouts::{TimerExpired, TimerRegistry};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Mode {
    Normal,
    ViewChanging,
}

struct ReplicaState {
    view: ViewNo,
    mode: Mode,
    window_low: SeqNo,
    window_high: SeqNo,
    last_pre_prepare_seq: SeqNo,
    last_prepare_seq: SeqNo,
    last_commit_seq: SeqNo,
    init_commit_seq: SeqNo,
    seq2digest: HashMap<SeqNo, Digest>,
    seq2request: HashMap<SeqNo, RequestMessage>,
    /// The ledger's `state_digest()` right after committing `seq`,
    /// used both to emit this replica's own `Checkpoint` vote and to
    /// validate incoming ones (§4.3): unlike `seq2digest`, which binds
    /// one request to its agreement instance, this reflects the
    /// cumulative state two replicas must actually agree on.
    seq2state_digest: HashMap<SeqNo, Digest>,
}

/// One replica's agreement state machine. Owns the admission window,
/// the per-seq quorum counters, the checkpoint/garbage-collection
/// bookkeeping, the view-change subsystem, and the named request
/// timers, and dispatches every inbound protocol envelope to the
/// handler matching its phase.
pub struct Replica {
    id: NodeId,
    node: Arc<Node>,
    config: Config,
    election: LeaderElection,
    quorum_size: usize,
    window_span: usize,
    timers: TimerRegistry,
    state: Mutex<ReplicaState>,
    quorum: Mutex<QuorumTracker>,
    gc: Mutex<GarbageCollector>,
    view_changer: Mutex<ViewChanger>,
    service: Mutex<Service>,
}

impl Replica {
    /// Builds a fresh replica bound to `node`, using `config`'s initial
    /// admission window and checkpoint interval. Fails fast if the
    /// configured election method is unknown.
    pub fn new(
        node: Arc<Node>,
        config: Config,
    ) -> Result<(Arc<Replica>, mpsc::UnboundedReceiver<TimerExpired>)> {
        let election = LeaderElection::new(&config);
        election.leader(ViewNo::ZERO)?;

        let quorum_size = config.quorum() as usize;
        let (window_low, window_high) = config.initial_window();
        let window_span = (window_high.into_inner() - window_low.into_inner() + 1).max(1) as usize;

        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let timers = TimerRegistry::new(timer_tx);

        let state = ReplicaState {
            view: ViewNo::ZERO,
            mode: Mode::Normal,
            window_low,
            window_high,
            last_pre_prepare_seq: SeqNo::UNSET,
            last_prepare_seq: SeqNo::UNSET,
            last_commit_seq: SeqNo::UNSET,
            init_commit_seq: SeqNo::UNSET,
            seq2digest: collections::hash_map(),
            seq2request: collections::hash_map(),
            seq2state_digest: collections::hash_map(),
        };

        let replica = Arc::new(Replica {
            id: node.id(),
            node,
            quorum_size,
            window_span,
            timers,
            state: Mutex::new(state),
            quorum: Mutex::new(QuorumTracker::new(window_low, window_span)),
            gc: Mutex::new(GarbageCollector::new(config.checkpoint_interval, quorum_size)),
            view_changer: Mutex::new(ViewChanger::new()),
            service: Mutex::new(Service::new()),
            election,
            config,
        });

        Ok((replica, timer_rx))
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Current view, for diagnostics and tests.
    pub fn view(&self) -> ViewNo {
        self.state.lock().view
    }

    /// The highest seq known stable by the checkpoint protocol, for
    /// diagnostics and tests.
    pub fn last_stable_checkpoint(&self) -> SeqNo {
        self.gc.lock().last_stable_checkpoint()
    }

    /// Whether this replica currently suspects the primary and is
    /// running a view change, for diagnostics and tests.
    pub fn is_view_changing(&self) -> bool {
        self.state.lock().mode == Mode::ViewChanging
    }

    /// Drives this replica until a `Close` envelope is received or the
    /// inbound channel closes.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<(NodeId, SystemMessage)>,
        mut timer_events: mpsc::UnboundedReceiver<TimerExpired>,
    ) {
        loop {
            tokio::select! {
                incoming = inbound.recv() => {
                    match incoming {
                        Some((from, message)) => {
                            if self.dispatch(from, message).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                expired = timer_events.recv() => {
                    match expired {
                        Some(timer) => self.handle_timer_expired(timer.name).await,
                        None => break,
                    }
                }
            }
        }
    }

    async fn dispatch(&self, from: NodeId, message: SystemMessage) -> bool {
        match message {
            SystemMessage::Request(req) => {
                self.handle_request(req).await;
                false
            }
            SystemMessage::PrePrepare(cm) => {
                self.handle_pre_prepare(cm).await;
                false
            }
            SystemMessage::Prepare(cm) => {
                self.handle_prepare(from, cm).await;
                false
            }
            SystemMessage::Commit(cm) => {
                self.handle_commit(from, cm).await;
                false
            }
            SystemMessage::Checkpoint(cp) => {
                self.handle_checkpoint(cp).await;
                false
            }
            SystemMessage::ViewChange(vc) => {
                self.handle_view_change(vc).await;
                false
            }
            SystemMessage::NewView(nv) => {
                self.handle_new_view(nv).await;
                false
            }
            SystemMessage::Reply(_) => false,
            SystemMessage::Close(_) => {
                self.handle_close();
                true
            }
        }
    }

    fn admits(state: &ReplicaState, view: ViewNo, seq: SeqNo) -> bool {
        state.mode == Mode::Normal
            && view == state.view
            && seq >= state.window_low
            && seq <= state.window_high
    }

    fn targets(&self) -> impl Iterator<Item = NodeId> {
        NodeId::targets(0..self.config.n() as u32)
    }

    async fn broadcast(&self, message: SystemMessage) {
        self.node.broadcast(message, self.targets()).await;
    }

    fn request_timer_name(from: NodeId, id: u64) -> String {
        format!("request-{}-{}", from, id)
    }

    fn expire_time(&self) -> Duration {
        Duration::from_secs(self.config.expire_time.max(0) as u64)
    }

    /// Only the primary of the current view proposes. Assigns the
    /// next contiguous sequence number, broadcasts a `PrePrepare`, and
    /// applies it to itself exactly as a backup would on receipt.
    async fn handle_request(&self, req: RequestMessage) {
        let view = self.state.lock().view;
        match self.election.leader(view) {
            Ok(leader) if leader == self.id => {}
            _ => return,
        }

        let digest = req.digest();
        let seq = {
            let state = self.state.lock();
            if state.last_pre_prepare_seq.is_unset() {
                SeqNo::new(prng::random_in_range(
                    state.window_low.into_inner(),
                    state.window_high.into_inner(),
                ))
            } else {
                state.last_pre_prepare_seq.next()
            }
        };

        let message = ConsensusMessage::new(view, seq, digest, Some(req));
        self.broadcast(SystemMessage::PrePrepare(message.clone())).await;
        self.handle_pre_prepare(message).await;
    }

    async fn handle_pre_prepare(&self, cm: ConsensusMessage) {
        let req = match cm.request.clone() {
            Some(r) => r,
            None => return,
        };
        if cm.digest != req.digest() {
            log::warn!("dropping pre-prepare at seq {}: digest does not match request", cm.seq);
            return;
        }

        let accepted = {
            let mut state = self.state.lock();
            if !Self::admits(&state, cm.view, cm.seq) {
                false
            } else if matches!(state.seq2digest.get(&cm.seq), Some(d) if *d != cm.digest) {
                false
            } else if !(state.last_pre_prepare_seq.is_unset() || cm.seq == state.last_pre_prepare_seq.next()) {
                false
            } else {
                state.last_pre_prepare_seq = cm.seq;
                state.seq2digest.entry(cm.seq).or_insert(cm.digest);
                state.seq2request.entry(cm.seq).or_insert_with(|| req.clone());
                true
            }
        };
        if !accepted {
            return;
        }

        self.timers.start(Self::request_timer_name(req.from, req.id), self.expire_time());
        self.quorum.lock().record_prepare(cm.seq, self.id);

        let message = ConsensusMessage::new(cm.view, cm.seq, cm.digest, Some(req));
        self.broadcast(SystemMessage::Prepare(message)).await;
    }

    async fn handle_prepare(&self, from: NodeId, cm: ConsensusMessage) {
        let req = match cm.request.clone() {
            Some(r) => r,
            None => return,
        };
        if cm.digest != req.digest() {
            return;
        }

        let accepted = {
            let mut state = self.state.lock();
            if !Self::admits(&state, cm.view, cm.seq) {
                false
            } else if matches!(state.seq2digest.get(&cm.seq), Some(d) if *d != cm.digest) {
                false
            } else if !(state.last_prepare_seq.is_unset() || cm.seq == state.last_prepare_seq.next()) {
                false
            } else {
                state.seq2digest.entry(cm.seq).or_insert(cm.digest);
                state.seq2request.entry(cm.seq).or_insert_with(|| req.clone());
                true
            }
        };
        if !accepted {
            return;
        }

        let count = match self.quorum.lock().record_prepare(cm.seq, from) {
            Some(c) => c,
            None => return,
        };
        if count as usize != self.quorum_size {
            return;
        }

        // Only advance the watermark once 2f+1 matching prepares (this
        // replica's own vote plus 2f from others) are in: doing it earlier,
        // before quorum, would make every later Prepare at this seq fail
        // the contiguity check above and get dropped before it could ever
        // be counted.
        self.state.lock().last_prepare_seq = cm.seq;

        self.quorum.lock().record_commit(cm.seq, self.id);

        let message = ConsensusMessage::new(cm.view, cm.seq, cm.digest, Some(req));
        self.broadcast(SystemMessage::Commit(message)).await;
    }

    async fn handle_commit(&self, from: NodeId, cm: ConsensusMessage) {
        let req = match cm.request.clone() {
            Some(r) => r,
            None => return,
        };
        if cm.digest != req.digest() {
            return;
        }

        let accepted = {
            let mut state = self.state.lock();
            if !Self::admits(&state, cm.view, cm.seq) {
                false
            } else if matches!(state.seq2digest.get(&cm.seq), Some(d) if *d != cm.digest) {
                false
            } else if !(state.last_commit_seq.is_unset() || cm.seq == state.last_commit_seq.next()) {
                false
            } else {
                state.seq2digest.entry(cm.seq).or_insert(cm.digest);
                true
            }
        };
        if !accepted {
            return;
        }

        let count = match self.quorum.lock().record_commit(cm.seq, from) {
            Some(c) => c,
            None => return,
        };
        if count as usize != self.quorum_size {
            return;
        }

        let init_commit_seq = {
            let mut state = self.state.lock();
            state.last_commit_seq = cm.seq;
            if state.init_commit_seq.is_unset() {
                state.init_commit_seq = cm.seq;
            }
            state.init_commit_seq
        };

        self.timers.stop(&Self::request_timer_name(req.from, req.id));

        let reply = ReplyMessage { view: cm.view, seq: cm.seq, from: self.id };
        if let Err(e) = self.node.send(SystemMessage::Reply(reply), req.from).await {
            log::warn!("failed to reply to client {}: {:?}", req.from, e);
        }

        // Apply the committed batch to the ledger and record the
        // resulting state digest, which is what the checkpoint
        // protocol actually needs to agree on (a single request's
        // digest says nothing about cumulative state).
        let state_digest = {
            let mut service = self.service.lock();
            service.execute(&req.txs);
            let digest = service.state_digest();
            self.state.lock().seq2state_digest.insert(cm.seq, digest);
            digest
        };

        let should_checkpoint = self.gc.lock().should_checkpoint(cm.seq, init_commit_seq);
        if should_checkpoint {
            self.broadcast_checkpoint(cm.seq, state_digest).await;
        }
    }

    async fn broadcast_checkpoint(&self, seq: SeqNo, state_digest: Digest) {
        let outcome = self.gc.lock().record_vote(seq, self.id, state_digest, state_digest);
        if let CheckpointOutcome::NewStableCheckpoint(stable_seq) = outcome {
            self.advance_window(stable_seq);
        }

        let msg = CheckpointMessage { seq, digest: state_digest, from: self.id };
        self.broadcast(SystemMessage::Checkpoint(msg)).await;
    }

    async fn handle_checkpoint(&self, msg: CheckpointMessage) {
        let expected = {
            let state = self.state.lock();
            match state.seq2state_digest.get(&msg.seq) {
                Some(d) => *d,
                None => return,
            }
        };

        let outcome = self.gc.lock().record_vote(msg.seq, msg.from, msg.digest, expected);
        if let CheckpointOutcome::NewStableCheckpoint(seq) = outcome {
            self.advance_window(seq);
        }
    }

    /// Slides the admission window forward of a newly stable
    /// checkpoint, freeing per-seq state at or below it.
    fn advance_window(&self, stable_seq: SeqNo) {
        let new_low = stable_seq.next();
        let span = self.window_span;

        let mut state = self.state.lock();
        if new_low <= state.window_low {
            return;
        }
        state.window_low = new_low;
        state.window_high = SeqNo::new(new_low.into_inner().wrapping_add(span as i32 - 1));
        state.seq2digest.retain(|&s, _| s >= new_low);
        state.seq2request.retain(|&s, _| s >= new_low);
        state.seq2state_digest.retain(|&s, _| s >= new_low);
        drop(state);

        self.quorum.lock().advance_window(new_low, span);
    }

    /// A request timer firing means no progress was made in time:
    /// suspect the primary, cancel every other timer, and start a view
    /// change of our own.
    async fn handle_timer_expired(&self, name: String) {
        log::warn!("timer '{}' expired, starting a view change", name);
        self.timers.stop_all();

        let started = {
            let mut state = self.state.lock();
            if state.mode == Mode::ViewChanging {
                false
            } else {
                state.mode = Mode::ViewChanging;
                true
            }
        };
        if !started {
            return;
        }

        let pre_change_view = self.state.lock().view;
        let last_stable = self.gc.lock().last_stable_checkpoint();
        let checkpoint_votes = self.gc.lock().vote_count(last_stable);
        let have_prepared = self.collect_have_prepared(last_stable);

        self.view_changer.lock().start(pre_change_view);

        let msg = ViewChangeMessage {
            view: pre_change_view.next(),
            last_stable_checkpoint: last_stable,
            checkpoint_votes,
            have_prepared,
            from: self.id,
        };
        self.broadcast(SystemMessage::ViewChange(msg.clone())).await;
        self.handle_view_change(msg).await;
    }

    /// Every seq above the last stable checkpoint that reached a
    /// 2f-strong prepare certificate, paired with its bound digest and
    /// request.
    fn collect_have_prepared(&self, last_stable: SeqNo) -> Vec<PreparedEntry> {
        let state = self.state.lock();
        let quorum = self.quorum.lock();

        let mut out = Vec::new();
        if state.last_prepare_seq.is_unset() {
            return out;
        }

        let lower = if last_stable.is_unset() { state.window_low } else { last_stable.next() };
        let mut raw = lower.into_inner();
        while raw <= state.last_prepare_seq.into_inner() {
            let seq = SeqNo::new(raw);
            if quorum.prepare_count(seq) as i64 >= 2 * self.config.f() {
                if let (Some(digest), Some(req)) = (state.seq2digest.get(&seq), state.seq2request.get(&seq)) {
                    out.push(PreparedEntry { seq, digest: *digest, request: req.clone() });
                }
            }
            raw += 1;
        }
        out
    }

    async fn handle_view_change(&self, msg: ViewChangeMessage) {
        let my_view = self.state.lock().view;
        match self.election.leader(msg.view) {
            Ok(next_primary) if next_primary == self.id => {}
            _ => return,
        }
        if msg.view != my_view.next() {
            return;
        }

        let votes = self.view_changer.lock().record(msg, self.quorum_size);
        let votes = match votes {
            Some(v) => v,
            None => return,
        };

        let new_view = my_view.next();
        let pre_prepares = self.view_changer.lock().assemble_new_view(&votes, new_view);
        let nv = NewViewMessage { view: new_view, pre_prepares, from: self.id };
        self.broadcast(SystemMessage::NewView(nv.clone())).await;
        self.handle_new_view(nv).await;
    }

    /// Installs a new view and re-drives the three-phase protocol for
    /// every reconstructed pre-prepare: real ones are broadcast and
    /// applied exactly like a fresh proposal; no-op fillers only
    /// advance the watermarks needed to preserve contiguity.
    async fn handle_new_view(&self, msg: NewViewMessage) {
        match self.election.leader(msg.view) {
            Ok(primary) if primary == msg.from => {}
            _ => return,
        }

        let installed = {
            let mut state = self.state.lock();
            if msg.view <= state.view {
                false
            } else {
                state.view = msg.view;
                state.mode = Mode::Normal;
                state.last_prepare_seq = SeqNo::UNSET;
                true
            }
        };
        if !installed {
            return;
        }

        self.view_changer.lock().finish();
        self.timers.stop_all();

        for pp in msg.pre_prepares {
            if pp.request.is_some() {
                self.broadcast(SystemMessage::PrePrepare(pp.clone())).await;
                self.handle_pre_prepare(pp).await;
            } else {
                let mut state = self.state.lock();
                if state.last_pre_prepare_seq.is_unset() || pp.seq == state.last_pre_prepare_seq.next() {
                    state.last_pre_prepare_seq = pp.seq;
                    state.last_prepare_seq = pp.seq;
                    state.last_commit_seq = pp.seq;
                    state.seq2digest.insert(pp.seq, pp.digest);
                }
            }
        }
    }

    fn handle_close(&self) {
        self.timers.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_view(view: ViewNo) -> ReplicaState {
        ReplicaState {
            view,
            mode: Mode::Normal,
            window_low: SeqNo::new(0),
            window_high: SeqNo::new(10),
            last_pre_prepare_seq: SeqNo::UNSET,
            last_prepare_seq: SeqNo::UNSET,
            last_commit_seq: SeqNo::UNSET,
            init_commit_seq: SeqNo::UNSET,
            seq2digest: collections::hash_map(),
            seq2request: collections::hash_map(),
            seq2state_digest: collections::hash_map(),
        }
    }

    fn config(election_method: &str) -> Config {
        Config {
            data_dir: "data".into(),
            max_tx_num: 100,
            inject_speed: 10,
            max_block_size: 10,
            node_num: 4,
            election_method: election_method.into(),
            expire_time: 5,
            seq_number_upper_bound: 1000,
            seq_number_lower_bound: 0,
            checkpoint_interval: 5,
            faulty_nodes_num: 1,
        }
    }

    #[test]
    fn unknown_election_method_is_rejected_before_a_replica_is_built() {
        let election = LeaderElection::new(&config("bogus"));
        assert!(election.leader(ViewNo::ZERO).is_err());
    }

    #[test]
    fn admits_checks_mode_view_and_window_bounds() {
        let state = state_with_view(ViewNo::new(2));
        assert!(Replica::admits(&state, ViewNo::new(2), SeqNo::new(5)));
        assert!(!Replica::admits(&state, ViewNo::new(3), SeqNo::new(5)));
        assert!(!Replica::admits(&state, ViewNo::new(2), SeqNo::new(11)));

        let mut changing = state_with_view(ViewNo::new(2));
        changing.mode = Mode::ViewChanging;
        assert!(!Replica::admits(&changing, ViewNo::new(2), SeqNo::new(5)));
    }

    #[test]
    fn request_timer_names_are_stable_per_client_and_id() {
        let a = Replica::request_timer_name(NodeId::from(4), 9);
        let b = Replica::request_timer_name(NodeId::from(4), 9);
        let c = Replica::request_timer_name(NodeId::from(5), 9);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
