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

//! TCP transport: length-prefixed frames over per-peer connections.
//!
//! The node listens on its configured address and dials every peer;
//! whichever direction completes first, both sides announce themselves
//! with an ACK and the engine registers the first connection per peer.
//! Each socket gets a reader task (frames in, decoded, forwarded to the
//! engine) and a writer task draining a bounded queue of encoded frames.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::broadcast::engine::EngineEvent;
use crate::core::types::NodeId;
use crate::monitoring::metrics::Metrics;
use crate::networking::codec::{Frame, MAX_FRAME_LEN};

/// Identifier of one transport connection (not a peer: a peer may
/// briefly have two, one per dial direction).
pub type ConnId = u64;

/// Handle for queueing encoded frames onto a connection's writer task.
pub type OutboundTx = mpsc::Sender<Vec<u8>>;

/// Registry of live connections and the peer each one was registered
/// under after its ACK.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    conns: HashMap<ConnId, OutboundTx>,
    peer_conns: HashMap<NodeId, ConnId>,
}

impl ConnectionRegistry {
    /// Track a new connection's writer handle.
    pub fn insert_conn(&mut self, conn: ConnId, tx: OutboundTx) {
        self.conns.insert(conn, tx);
    }

    /// Bind `peer` to `conn` after its ACK. Returns false if the peer is
    /// already registered (the duplicate connection stays usable for
    /// reads but is never written to) or the connection is unknown.
    pub fn register_peer(&mut self, peer: NodeId, conn: ConnId) -> bool {
        if self.peer_conns.contains_key(&peer) || !self.conns.contains_key(&conn) {
            return false;
        }
        self.peer_conns.insert(peer, conn);
        true
    }

    /// Drop a connection, returning the peer that loses registration.
    pub fn remove_conn(&mut self, conn: ConnId) -> Option<NodeId> {
        self.conns.remove(&conn);
        let peer = self
            .peer_conns
            .iter()
            .find(|(_, c)| **c == conn)
            .map(|(p, _)| *p);
        if let Some(p) = peer {
            self.peer_conns.remove(&p);
        }
        peer
    }

    /// Queue a frame on a specific connection. False if the connection
    /// is gone or its writer queue is full.
    pub fn send_to_conn(&self, conn: ConnId, bytes: Vec<u8>) -> bool {
        self.conns
            .get(&conn)
            .map(|tx| tx.try_send(bytes).is_ok())
            .unwrap_or(false)
    }

    /// Queue a frame to a registered peer.
    pub fn send_to_peer(&self, peer: NodeId, bytes: Vec<u8>) -> bool {
        self.peer_conns
            .get(&peer)
            .map(|conn| self.send_to_conn(*conn, bytes))
            .unwrap_or(false)
    }

    /// Queue a frame to every registered peer. Returns `(sent, dropped)`.
    pub fn broadcast(&self, bytes: &[u8]) -> (usize, usize) {
        let mut sent = 0;
        let mut dropped = 0;
        for conn in self.peer_conns.values() {
            if self.send_to_conn(*conn, bytes.to_vec()) {
                sent += 1;
            } else {
                dropped += 1;
            }
        }
        (sent, dropped)
    }

    /// Number of peers that completed registration.
    pub fn registered_peers(&self) -> usize {
        self.peer_conns.len()
    }

    /// Whether `peer` has a registered connection.
    pub fn is_registered(&self, peer: NodeId) -> bool {
        self.peer_conns.contains_key(&peer)
    }
}

/// Transport parameters.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Local listen address.
    pub listen: SocketAddr,
    /// Remote peer addresses to dial.
    pub peers: Vec<SocketAddr>,
    /// Outbound dial attempts per peer before giving up.
    pub dial_attempts: usize,
    /// Delay between dial attempts.
    pub dial_backoff: Duration,
    /// Writer-queue depth per connection.
    pub writer_queue: usize,
}

impl TransportConfig {
    /// Config with default retry/queue settings.
    pub fn new(listen: SocketAddr, peers: Vec<SocketAddr>) -> Self {
        Self {
            listen,
            peers,
            dial_attempts: 10,
            dial_backoff: Duration::from_secs(1),
            writer_queue: 64,
        }
    }
}

/// Bind the listener and spawn the accept loop plus one dial task per
/// peer. Returns once the listener is bound; a bind failure is a boot
/// error.
pub async fn start(
    cfg: TransportConfig,
    metrics: Arc<Metrics>,
    events: mpsc::Sender<EngineEvent>,
) -> io::Result<()> {
    let listener = TcpListener::bind(cfg.listen).await?;
    info!(addr = %cfg.listen, "listening");

    let ids = Arc::new(AtomicU64::new(0));

    {
        let ids = ids.clone();
        let metrics = metrics.clone();
        let events = events.clone();
        let queue = cfg.writer_queue;
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!(%addr, "inbound connection accepted");
                        spawn_connection(stream, &ids, queue, metrics.clone(), events.clone())
                            .await;
                    }
                    Err(e) => {
                        warn!(err = %e, "accept failed");
                    }
                }
            }
        });
    }

    for addr in cfg.peers {
        let ids = ids.clone();
        let metrics = metrics.clone();
        let events = events.clone();
        let attempts = cfg.dial_attempts;
        let backoff = cfg.dial_backoff;
        let queue = cfg.writer_queue;
        tokio::spawn(async move {
            for attempt in 1..=attempts {
                match TcpStream::connect(addr).await {
                    Ok(stream) => {
                        debug!(%addr, attempt, "outbound connection established");
                        spawn_connection(stream, &ids, queue, metrics, events).await;
                        return;
                    }
                    Err(e) => {
                        debug!(%addr, attempt, err = %e, "dial failed; retrying");
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
            warn!(%addr, "giving up dialing peer");
        });
    }

    Ok(())
}

/// Wire a socket into the engine: announce it, then spawn its writer and
/// reader tasks. The ConnectionUp event is sent before the reader starts
/// so the engine always sees the connection before its first frame.
async fn spawn_connection(
    stream: TcpStream,
    ids: &AtomicU64,
    writer_queue: usize,
    metrics: Arc<Metrics>,
    events: mpsc::Sender<EngineEvent>,
) {
    let _ = stream.set_nodelay(true);
    let conn = ids.fetch_add(1, Ordering::Relaxed);
    let (rd, wr) = stream.into_split();
    let (tx, rx) = mpsc::channel::<Vec<u8>>(writer_queue);

    if events.send(EngineEvent::ConnectionUp { conn, tx }).await.is_err() {
        return;
    }
    tokio::spawn(write_loop(wr, rx));
    tokio::spawn(read_loop(conn, rd, metrics, events));
}

async fn write_loop(mut wr: OwnedWriteHalf, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(bytes) = rx.recv().await {
        let len = (bytes.len() as u32).to_le_bytes();
        if wr.write_all(&len).await.is_err()
            || wr.write_all(&bytes).await.is_err()
            || wr.flush().await.is_err()
        {
            break;
        }
    }
}

async fn read_loop(
    conn: ConnId,
    mut rd: OwnedReadHalf,
    metrics: Arc<Metrics>,
    events: mpsc::Sender<EngineEvent>,
) {
    let mut len_buf = [0u8; 4];
    loop {
        if rd.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            warn!(conn, len, "oversize frame; dropping connection");
            break;
        }
        let mut buf = vec![0u8; len];
        if rd.read_exact(&mut buf).await.is_err() {
            break;
        }
        match Frame::decode(&buf) {
            Ok(frame) => {
                let ev = EngineEvent::Frame {
                    conn,
                    wire_len: len + 4,
                    frame,
                };
                if events.send(ev).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                metrics.malformed_frame_total.inc();
                warn!(conn, err = %e, "malformed frame dropped");
            }
        }
    }
    let _ = events.send(EngineEvent::ConnectionDown { conn }).await;
}
