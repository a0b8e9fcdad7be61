// Copyright (c) 2026 Quorumcast
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Engine scenarios driven directly through handler methods, with a
//! scripted in-memory network instead of sockets.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use quorumcast::core::broadcast::engine::{
    BroadcastEngine, BroadcastEvent, EngineConfig, EngineEvent,
};
use quorumcast::core::security::keyring::Keyring;
use quorumcast::core::types::{NodeId, SigEntry, Signature64};
use quorumcast::monitoring::metrics::Metrics;
use quorumcast::monitoring::throughput::ThruputCounters;
use quorumcast::networking::codec::Frame;

const N: usize = 4;

fn engine_config(i: usize) -> EngineConfig {
    EngineConfig {
        node_id: NodeId::from(i as u32),
        local_addr: format!("127.0.0.1:{}", 7100 + i),
        node_count: N,
        round_interval: Duration::from_millis(100),
        payload_size: 32,
        dynamic_msg_size: false,
        wait_for_peers: Duration::from_millis(10),
    }
}

/// Four engines wired full-mesh. `wires[i][j]` carries the frames node
/// `i` queued toward node `j`; on node `j` that link is connection `i`.
struct TestNet {
    engines: Vec<BroadcastEngine>,
    events: Vec<mpsc::Receiver<BroadcastEvent>>,
    metrics: Vec<Arc<Metrics>>,
    wires: Vec<Vec<Option<mpsc::Receiver<Vec<u8>>>>>,
    log: Vec<(usize, usize, Frame)>,
}

impl TestNet {
    fn new(dir: &std::path::Path) -> Self {
        for i in 0..N {
            Keyring::generate_to(dir, NodeId::from(i as u32)).expect("keygen");
        }

        let mut engines = Vec::new();
        let mut events = Vec::new();
        let mut metrics = Vec::new();
        for i in 0..N {
            let keyring =
                Arc::new(Keyring::load(dir, NodeId::from(i as u32), N).expect("load keys"));
            let m = Arc::new(Metrics::new().expect("metrics"));
            let counters = Arc::new(ThruputCounters::default());
            let (tx, rx) = mpsc::channel(1024);
            engines.push(BroadcastEngine::new(
                engine_config(i),
                keyring,
                m.clone(),
                counters,
                tx,
            ));
            events.push(rx);
            metrics.push(m);
        }

        let mut wires: Vec<Vec<Option<mpsc::Receiver<Vec<u8>>>>> =
            (0..N).map(|_| (0..N).map(|_| None).collect()).collect();
        for i in 0..N {
            for j in 0..N {
                if i == j {
                    continue;
                }
                let (tx, rx) = mpsc::channel(1024);
                engines[i].handle_event(EngineEvent::ConnectionUp {
                    conn: j as u64,
                    tx,
                });
                wires[i][j] = Some(rx);
            }
        }

        Self {
            engines,
            events,
            metrics,
            wires,
            log: Vec::new(),
        }
    }

    /// Inject a frame into node `to` as if it came from node `from`.
    fn feed(&mut self, to: usize, from: usize, frame: Frame) {
        let wire_len = frame.encode().len() + 4;
        self.engines[to].handle_event(EngineEvent::Frame {
            conn: from as u64,
            wire_len,
            frame,
        });
    }

    /// Take queued frames off one wire without forwarding them.
    fn drain_wire(&mut self, from: usize, to: usize) -> Vec<Frame> {
        let mut out = Vec::new();
        while let Some(bytes) = self.wires[from][to]
            .as_mut()
            .and_then(|rx| rx.try_recv().ok())
        {
            out.push(Frame::decode(&bytes).expect("valid frame"));
        }
        out
    }

    /// Move queued frames between engines until the network is quiet.
    fn pump(&mut self) {
        loop {
            let mut moved = false;
            for i in 0..N {
                for j in 0..N {
                    if i == j {
                        continue;
                    }
                    while let Some(bytes) = self.wires[i][j]
                        .as_mut()
                        .and_then(|rx| rx.try_recv().ok())
                    {
                        let frame = Frame::decode(&bytes).expect("valid frame");
                        self.log.push((i, j, frame.clone()));
                        self.engines[j].handle_event(EngineEvent::Frame {
                            conn: i as u64,
                            wire_len: bytes.len() + 4,
                            frame,
                        });
                        moved = true;
                    }
                }
            }
            if !moved {
                break;
            }
        }
    }

    fn drain_events(&mut self, i: usize) -> Vec<BroadcastEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events[i].try_recv() {
            out.push(ev);
        }
        out
    }

    fn fins_sent_by(&self, i: usize) -> usize {
        self.log
            .iter()
            .filter(|(from, _, f)| *from == i && matches!(f, Frame::Fin { .. }))
            .count()
    }
}

#[test]
fn handshake_registers_each_peer_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut net = TestNet::new(dir.path());
    net.pump();

    for i in 0..N {
        assert_eq!(net.engines[i].connected_peer_count(), N - 1, "node {i}");
        let connected = net
            .drain_events(i)
            .into_iter()
            .filter(|e| matches!(e, BroadcastEvent::PeerConnected(_)))
            .count();
        assert_eq!(connected, N - 1);
    }

    // A duplicate ACK is dropped silently.
    net.feed(0, 1, Frame::Ack {
        sender: NodeId::from(1),
    });
    assert_eq!(net.engines[0].connected_peer_count(), N - 1);
}

#[test]
fn single_round_delivers_everywhere() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut net = TestNet::new(dir.path());
    net.pump();
    for i in 0..N {
        net.drain_events(i);
    }

    net.engines[0].start_round();
    net.pump();

    let origin = NodeId::from(0);
    for i in 0..N {
        assert!(
            net.engines[i].rounds().is_delivered(origin, 0),
            "node {i} missing delivery"
        );
        let delivered = net
            .drain_events(i)
            .into_iter()
            .filter(|e| matches!(e, BroadcastEvent::Delivered { .. }))
            .count();
        assert_eq!(delivered, 1, "node {i}");
    }

    // Exactly the originator emits FIN, once per peer.
    assert_eq!(net.fins_sent_by(0), N - 1);
    for i in 1..N {
        assert_eq!(net.fins_sent_by(i), 0, "node {i} must not emit FIN");
    }

    let st = net.engines[0].rounds().round(0).expect("round state");
    assert_eq!(st.echo_count(), N);
    assert!(st.fin_sent);
    assert!(st.send_to_echo.is_some());
    assert!(st.send_to_delivered.is_some());
}

#[test]
fn duplicate_echo_does_not_refire_fin() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut net = TestNet::new(dir.path());
    net.pump();

    net.engines[0].start_round();
    net.pump();

    let echo = net
        .log
        .iter()
        .find(|(from, to, f)| *from == 1 && *to == 0 && matches!(f, Frame::Echo { .. }))
        .map(|(_, _, f)| f.clone())
        .expect("echo in log");

    let fins_before = net.fins_sent_by(0);
    net.feed(0, 1, echo);
    net.pump();

    assert_eq!(net.fins_sent_by(0), fins_before);
    let st = net.engines[0].rounds().round(0).expect("round state");
    assert_eq!(st.echo_count(), N);
}

#[test]
fn fin_replay_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut net = TestNet::new(dir.path());
    net.pump();

    net.engines[0].start_round();
    net.pump();
    for i in 0..N {
        net.drain_events(i);
    }

    let fin = net
        .log
        .iter()
        .find(|(from, to, f)| *from == 0 && *to == 1 && matches!(f, Frame::Fin { .. }))
        .map(|(_, _, f)| f.clone())
        .expect("fin in log");

    let before = net.engines[1]
        .rounds()
        .round(0)
        .map(|s| s.fin_arrivals)
        .unwrap_or(0);

    net.feed(1, 0, fin);
    net.pump();

    let after = net.engines[1]
        .rounds()
        .round(0)
        .map(|s| s.fin_arrivals)
        .unwrap_or(0);
    assert_eq!(after, before + 1);

    // Delivery marks latched; no node reports a second delivery.
    for i in 0..N {
        assert!(net.engines[i].rounds().is_delivered(NodeId::from(0), 0));
        assert!(net.drain_events(i).is_empty(), "node {i} emitted again");
    }
}

#[test]
fn tampered_echo_does_not_count() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut net = TestNet::new(dir.path());
    net.pump();

    net.engines[0].start_round();

    // Hand-deliver the SEND to node 1 only and intercept its echo.
    let sends = net.drain_wire(0, 1);
    assert_eq!(sends.len(), 1);
    net.feed(1, 0, sends[0].clone());

    let echoes = net.drain_wire(1, 0);
    assert_eq!(echoes.len(), 1);
    let Frame::Echo {
        sender,
        round,
        ip,
        signature,
        payload,
    } = echoes[0].clone()
    else {
        panic!("expected echo");
    };

    let mut bad = signature;
    bad.0[0] ^= 0x01;
    net.feed(0, 1, Frame::Echo {
        sender,
        round,
        ip: ip.clone(),
        signature: bad,
        payload: payload.clone(),
    });

    let st = net.engines[0].rounds().round(0).expect("round state");
    assert_eq!(st.echo_count(), 1, "tampered echo must not count");
    assert_eq!(net.metrics[0].invalid_signature_total.get(), 1);

    // The untampered echo still lands afterwards.
    net.feed(0, 1, Frame::Echo {
        sender,
        round,
        ip,
        signature,
        payload,
    });
    let st = net.engines[0].rounds().round(0).expect("round state");
    assert_eq!(st.echo_count(), 2);
}

#[test]
fn out_of_order_rounds_are_recorded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut net = TestNet::new(dir.path());
    net.pump();

    let ip = "127.0.0.1:7100".to_string();
    net.feed(1, 0, Frame::Send {
        sender: NodeId::from(0),
        round: 7,
        ip: ip.clone(),
        payload: b"late round first".to_vec(),
    });
    net.feed(1, 0, Frame::Send {
        sender: NodeId::from(0),
        round: 0,
        ip,
        payload: b"early round second".to_vec(),
    });

    let rounds = net.engines[1].rounds();
    assert_eq!(
        rounds.payload(NodeId::from(0), 7),
        Some(&b"late round first"[..])
    );
    assert_eq!(
        rounds.payload(NodeId::from(0), 0),
        Some(&b"early round second"[..])
    );

    let echoes = net
        .drain_wire(1, 0)
        .into_iter()
        .filter(|f| matches!(f, Frame::Echo { .. }))
        .count();
    assert_eq!(echoes, 2);
}

#[test]
fn short_or_bogus_sig_lists_are_dropped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut net = TestNet::new(dir.path());
    net.pump();

    net.engines[0].start_round();
    let sends = net.drain_wire(0, 1);
    net.feed(1, 0, sends[0].clone());
    net.drain_wire(1, 0);

    let entry = |n: u32, fill: u8| SigEntry {
        node: NodeId::from(n),
        signature: Signature64([fill; 64]),
    };
    let ip = "127.0.0.1:7100".to_string();

    // Below the 2f quorum.
    net.feed(1, 0, Frame::Fin {
        sender: NodeId::from(0),
        round: 0,
        ip: ip.clone(),
        signatures: vec![entry(0, 1)],
        payload: Vec::new(),
    });
    assert_eq!(net.metrics[1].insufficient_quorum_total.get(), 1);
    assert_eq!(
        net.engines[1].rounds().round(0).map(|s| s.fin_arrivals),
        None
    );

    // Enough entries, garbage signatures.
    net.feed(1, 0, Frame::Fin {
        sender: NodeId::from(0),
        round: 0,
        ip,
        signatures: vec![entry(0, 1), entry(2, 2)],
        payload: Vec::new(),
    });
    assert_eq!(net.metrics[1].invalid_signature_total.get(), 1);
    assert_eq!(
        net.engines[1].rounds().round(0).map(|s| s.fin_arrivals),
        None
    );
}
