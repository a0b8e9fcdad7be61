// Copyright (c) 2026 Quorumcast
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! The broadcast engine: a single task owning all protocol state.
//!
//! Connection events and decoded frames arrive on one channel; a timer
//! originates a new round every `round_interval`. Because the engine is
//! the only writer, handlers run without locks and SENDs from a peer are
//! always recorded before any dependent ECHO/FIN/SUP verification runs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::core::broadcast::round::RoundTable;
use crate::core::config::ClusterConfig;
use crate::core::security::keyring::Keyring;
use crate::core::types::{
    NodeId, Round, SigEntry, Signature64, DYNAMIC_MSG_SIZES, DYNAMIC_SIZE_STEP_ROUNDS,
};
use crate::monitoring::metrics::Metrics;
use crate::monitoring::throughput::{ThruputCounters, ThruputLog};
use crate::networking::codec::Frame;
use crate::networking::transport::{ConnId, ConnectionRegistry, OutboundTx};

/// Delay between boot and the first locally originated round.
pub const WAIT_FOR_PEERS_CONNECTION: Duration = Duration::from_secs(5);

/// Inputs consumed by the engine task.
#[derive(Debug)]
pub enum EngineEvent {
    /// A transport connection (either direction) is ready for writes.
    ConnectionUp {
        /// Transport connection id.
        conn: ConnId,
        /// Writer-task handle for this connection.
        tx: OutboundTx,
    },
    /// A transport connection went away.
    ConnectionDown {
        /// Transport connection id.
        conn: ConnId,
    },
    /// A decoded frame arrived.
    Frame {
        /// Connection it arrived on.
        conn: ConnId,
        /// Framed size on the wire, length prefix included.
        wire_len: usize,
        /// The decoded message.
        frame: Frame,
    },
}

/// Notifications emitted by the engine.
#[derive(Clone, Debug)]
pub enum BroadcastEvent {
    /// A peer completed the ACK handshake.
    PeerConnected(NodeId),
    /// A registered peer's connection dropped.
    PeerDisconnected(NodeId),
    /// A `(origin, round)` payload crossed the delivery threshold.
    Delivered {
        /// Originating node.
        origin: NodeId,
        /// Origin's round number.
        round: Round,
        /// Size of the delivered payload.
        payload_len: usize,
    },
}

/// Engine parameters.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Local node id.
    pub node_id: NodeId,
    /// Local `host:port` string carried in outgoing frames.
    pub local_addr: String,
    /// Cluster size `n`.
    pub node_count: usize,
    /// Interval between locally originated rounds.
    pub round_interval: Duration,
    /// Fixed payload size in bytes.
    pub payload_size: usize,
    /// Cycle the dynamic payload size table instead of `payload_size`.
    pub dynamic_msg_size: bool,
    /// Delay before the first round.
    pub wait_for_peers: Duration,
}

impl EngineConfig {
    /// Build engine parameters for `index` from a parsed cluster config.
    pub fn from_cluster(cfg: &ClusterConfig, index: usize) -> Self {
        Self {
            node_id: NodeId::from(index as u32),
            local_addr: cfg.addrs[index].raw.clone(),
            node_count: cfg.node_count,
            round_interval: cfg.round_interval,
            payload_size: cfg.payload_size,
            dynamic_msg_size: cfg.dynamic_msg_size,
            wait_for_peers: WAIT_FOR_PEERS_CONNECTION,
        }
    }
}

/// Final state handed back when the engine stops, for evaluation output.
pub struct EngineReport {
    /// Per-round bookkeeping.
    pub rounds: RoundTable,
    /// Throughput snapshots.
    pub thruput: ThruputLog,
    /// Number of locally started rounds.
    pub rounds_started: Round,
}

/// The broadcast state machine. All mutation happens on the task that
/// owns this value; handler methods are synchronous and directly
/// testable.
pub struct BroadcastEngine {
    cfg: EngineConfig,
    keyring: Arc<Keyring>,
    metrics: Arc<Metrics>,
    counters: Arc<ThruputCounters>,
    registry: ConnectionRegistry,
    rounds: RoundTable,
    thruput: ThruputLog,
    events: mpsc::Sender<BroadcastEvent>,
    next_round: Round,
    dyn_size_ind: usize,
    dyn_step_rounds: u32,
}

impl BroadcastEngine {
    /// Create an engine; `events` receives delivery/peer notifications.
    pub fn new(
        cfg: EngineConfig,
        keyring: Arc<Keyring>,
        metrics: Arc<Metrics>,
        counters: Arc<ThruputCounters>,
        events: mpsc::Sender<BroadcastEvent>,
    ) -> Self {
        let node_count = cfg.node_count;
        Self {
            cfg,
            keyring,
            metrics,
            counters,
            registry: ConnectionRegistry::default(),
            rounds: RoundTable::new(node_count),
            thruput: ThruputLog::default(),
            events,
            next_round: 0,
            dyn_size_ind: 0,
            dyn_step_rounds: 0,
        }
    }

    /// Per-round state, for inspection.
    pub fn rounds(&self) -> &RoundTable {
        &self.rounds
    }

    /// Number of peers that completed the handshake.
    pub fn connected_peer_count(&self) -> usize {
        self.registry.registered_peers()
    }

    /// Next round number the scheduler will start.
    pub fn next_round(&self) -> Round {
        self.next_round
    }

    /// Drive the engine until the event channel closes or `shutdown`
    /// fires. Returns the accumulated state for evaluation output.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<EngineEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> EngineReport {
        let first = tokio::time::Instant::now() + self.cfg.wait_for_peers;
        let mut timer = tokio::time::interval_at(first, self.cfg.round_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => self.start_round(),
                ev = rx.recv() => match ev {
                    Some(ev) => self.handle_event(ev),
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }

        info!(rounds = self.next_round, "engine stopped");
        EngineReport {
            rounds: self.rounds,
            thruput: self.thruput,
            rounds_started: self.next_round,
        }
    }

    /// Process one input event.
    pub fn handle_event(&mut self, ev: EngineEvent) {
        match ev {
            EngineEvent::ConnectionUp { conn, tx } => self.on_connection_up(conn, tx),
            EngineEvent::ConnectionDown { conn } => self.on_connection_down(conn),
            EngineEvent::Frame {
                conn,
                wire_len,
                frame,
            } => {
                self.counters.note_recv(frame.opcode(), wire_len as u32);
                match frame {
                    Frame::Ack { sender } => self.on_ack(conn, sender),
                    Frame::Send {
                        sender,
                        round,
                        payload,
                        ..
                    } => self.on_send(conn, sender, round, payload),
                    Frame::Echo {
                        sender,
                        round,
                        signature,
                        ..
                    } => self.on_echo(sender, round, signature),
                    Frame::Fin {
                        sender,
                        round,
                        signatures,
                        ..
                    } => self.on_fin(sender, round, signatures),
                    Frame::Sup {
                        sender,
                        round,
                        original_sender,
                        signatures,
                        ..
                    } => self.on_sup(sender, round, original_sender, signatures),
                }
            }
        }
    }

    /// Originate a new round: broadcast SEND, self-sign, snapshot
    /// throughput.
    pub fn start_round(&mut self) {
        let me = self.cfg.node_id;
        let round = self.next_round;
        self.next_round += 1;

        let payload = self.compose_payload(round);
        let payload_len = payload.len();
        let now = Instant::now();
        self.rounds.round_mut(round).started_at = Some(now);

        let sent = self.broadcast_frame(&Frame::Send {
            sender: me,
            round,
            ip: self.cfg.local_addr.clone(),
            payload: payload.clone(),
        });

        // The originator counts as having echoed its own payload.
        let sig = self.keyring.sign(&payload);
        self.rounds.record_payload(me, round, payload);
        self.rounds.add_signature(round, me, sig);

        let sample = self.counters.snapshot_and_reset();
        self.thruput.push(now, sample);
        self.metrics.rounds_started_total.inc();
        info!(round, bytes = payload_len, peers = sent, "round started");
    }

    fn compose_payload(&mut self, round: Round) -> Vec<u8> {
        if self.cfg.dynamic_msg_size {
            let size = DYNAMIC_MSG_SIZES[self.dyn_size_ind];
            self.dyn_step_rounds += 1;
            if self.dyn_step_rounds >= DYNAMIC_SIZE_STEP_ROUNDS
                && self.dyn_size_ind + 1 < DYNAMIC_MSG_SIZES.len()
            {
                self.dyn_step_rounds = 0;
                self.dyn_size_ind += 1;
            }
            let fill = b'0'.wrapping_add(u32::from(self.cfg.node_id) as u8);
            vec![fill; size]
        } else {
            let fill = b'0' + (round % 10) as u8;
            vec![fill; self.cfg.payload_size]
        }
    }

    fn on_connection_up(&mut self, conn: ConnId, tx: OutboundTx) {
        self.registry.insert_conn(conn, tx);
        debug!(conn, "connection up; sending ack");
        self.send_frame_to_conn(
            conn,
            &Frame::Ack {
                sender: self.cfg.node_id,
            },
        );
    }

    fn on_connection_down(&mut self, conn: ConnId) {
        if let Some(peer) = self.registry.remove_conn(conn) {
            self.metrics.connected_peers.dec();
            warn!(%peer, "registered peer connection lost");
            self.emit(BroadcastEvent::PeerDisconnected(peer));
        } else {
            debug!(conn, "unregistered connection closed");
        }
    }

    fn on_ack(&mut self, conn: ConnId, sender: NodeId) {
        if usize::from(sender) >= self.cfg.node_count || sender == self.cfg.node_id {
            warn!(%sender, "ack with bad node id dropped");
            return;
        }
        if self.registry.register_peer(sender, conn) {
            self.metrics.connected_peers.inc();
            debug!(%sender, conn, "peer registered");
            self.emit(BroadcastEvent::PeerConnected(sender));
        } else {
            debug!(%sender, conn, "duplicate ack ignored");
        }
    }

    fn on_send(&mut self, conn: ConnId, sender: NodeId, round: Round, payload: Vec<u8>) {
        debug!(%sender, round, len = payload.len(), "send received");
        if sender == self.cfg.node_id || usize::from(sender) >= self.cfg.node_count {
            warn!(%sender, "send with bad sender dropped");
            return;
        }
        if self.rounds.payload(sender, round).is_some() {
            debug!(%sender, round, "duplicate send ignored");
            return;
        }

        // Sign the payload, log it, and echo back on the connection the
        // SEND arrived on; the originator aggregates echoes.
        let sig = self.keyring.sign(&payload);
        self.rounds.record_payload(sender, round, payload);
        self.send_frame_to_conn(
            conn,
            &Frame::Echo {
                sender: self.cfg.node_id,
                round,
                ip: self.cfg.local_addr.clone(),
                signature: sig,
                payload: Vec::new(),
            },
        );
    }

    fn on_echo(&mut self, sender: NodeId, round: Round, signature: Signature64) {
        let me = self.cfg.node_id;
        debug!(%sender, round, "echo received");

        // The echo signs the payload of our own round `round`; the wire
        // payload field is empty by design.
        let verified = match self.rounds.payload(me, round) {
            Some(payload) => self.keyring.verify(sender, payload, &signature),
            None => {
                warn!(%sender, round, "echo for unstarted round dropped");
                return;
            }
        };
        if !verified {
            warn!(%sender, round, "echo signature invalid");
            self.metrics.invalid_signature_total.inc();
            return;
        }
        if !self.rounds.add_signature(round, sender, signature) {
            debug!(%sender, round, "duplicate echo ignored");
            return;
        }

        let fin_already = self
            .rounds
            .round(round)
            .map(|s| s.fin_sent)
            .unwrap_or(false);
        if self.rounds.echo_quorum_reached(round) && !fin_already {
            let now = Instant::now();
            let signatures = {
                let st = self.rounds.round_mut(round);
                st.fin_sent = true;
                st.sup_sent = true;
                st.send_to_echo = st.started_at.map(|t| now.duration_since(t));
                st.signatures().to_vec()
            };

            self.broadcast_frame(&Frame::Fin {
                sender: me,
                round,
                ip: self.cfg.local_addr.clone(),
                signatures: signatures.clone(),
                payload: Vec::new(),
            });
            self.broadcast_frame(&Frame::Sup {
                sender: me,
                round,
                ip: self.cfg.local_addr.clone(),
                original_sender: me,
                signatures,
                payload: Vec::new(),
            });
            debug!(round, "echo quorum reached; FIN and SUP broadcast");

            // Our own FIN counts toward the all-FINs-arrived mark.
            self.rounds.note_fin_arrival(round, now);
        }
    }

    fn on_fin(&mut self, sender: NodeId, round: Round, signatures: Vec<SigEntry>) {
        debug!(%sender, round, sigs = signatures.len(), "fin received");
        if signatures.len() < self.rounds.fin_quorum() {
            warn!(%sender, round, sigs = signatures.len(), "fin below quorum dropped");
            self.metrics.insufficient_quorum_total.inc();
            return;
        }
        if !self.verify_sig_list(sender, round, &signatures) {
            return;
        }

        // Amplify: forward the signature list to everyone, naming the
        // FIN's sender as the broadcast origin.
        self.broadcast_frame(&Frame::Sup {
            sender: self.cfg.node_id,
            round,
            ip: self.cfg.local_addr.clone(),
            original_sender: sender,
            signatures,
            payload: Vec::new(),
        });
        self.rounds.note_fin_arrival(round, Instant::now());
    }

    fn on_sup(
        &mut self,
        sender: NodeId,
        round: Round,
        original_sender: NodeId,
        signatures: Vec<SigEntry>,
    ) {
        debug!(%sender, round, origin = %original_sender, sigs = signatures.len(), "sup received");
        if usize::from(original_sender) >= self.cfg.node_count {
            warn!(%sender, origin = %original_sender, "sup with bad origin dropped");
            return;
        }
        if signatures.len() < self.rounds.fin_quorum() {
            warn!(%sender, round, sigs = signatures.len(), "sup below quorum dropped");
            self.metrics.insufficient_quorum_total.inc();
            return;
        }
        if !self.verify_sig_list(original_sender, round, &signatures) {
            return;
        }

        let count = self.rounds.note_sup_arrival(original_sender, round);
        if count >= self.cfg.node_count - 1 && self.rounds.mark_delivered(original_sender, round) {
            self.metrics.delivered_total.inc();
            let payload_len = self
                .rounds
                .payload(original_sender, round)
                .map(|p| p.len())
                .unwrap_or(0);
            if original_sender == self.cfg.node_id {
                let now = Instant::now();
                let st = self.rounds.round_mut(round);
                st.send_to_delivered = st.started_at.map(|t| now.duration_since(t));
            }
            info!(origin = %original_sender, round, bytes = payload_len, "payload delivered");
            self.emit(BroadcastEvent::Delivered {
                origin: original_sender,
                round,
                payload_len,
            });
        }
    }

    /// Verify every `(node, sig)` entry against `origin`'s recorded
    /// payload for `round`. Any failure drops the whole message.
    fn verify_sig_list(
        &self,
        origin: NodeId,
        round: Round,
        signatures: &[SigEntry],
    ) -> bool {
        let Some(payload) = self.rounds.payload(origin, round) else {
            warn!(%origin, round, "no recorded payload to verify against; dropped");
            return false;
        };
        for e in signatures {
            if !self.keyring.verify(e.node, payload, &e.signature) {
                warn!(signer = %e.node, %origin, round, "invalid signature in list; message dropped");
                self.metrics.invalid_signature_total.inc();
                return false;
            }
        }
        true
    }

    fn broadcast_frame(&self, frame: &Frame) -> usize {
        let bytes = frame.encode();
        let len = bytes.len();
        let (sent, dropped) = self.registry.broadcast(&bytes);
        if dropped > 0 {
            warn!(op = ?frame.opcode(), dropped, "outbound frames dropped on backpressure");
            self.metrics.outbound_dropped_total.inc_by(dropped as u64);
        }
        self.counters
            .note_sent(frame.opcode(), (len * sent) as u32);
        sent
    }

    fn send_frame_to_conn(&self, conn: ConnId, frame: &Frame) {
        let bytes = frame.encode();
        let len = bytes.len();
        if self.registry.send_to_conn(conn, bytes) {
            self.counters.note_sent(frame.opcode(), len as u32);
        } else {
            warn!(conn, op = ?frame.opcode(), "outbound frame dropped");
            self.metrics.outbound_dropped_total.inc();
        }
    }

    fn emit(&self, ev: BroadcastEvent) {
        if self.events.try_send(ev).is_err() {
            debug!("event channel full; notification dropped");
        }
    }
}
