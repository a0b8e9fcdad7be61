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
#![deny(missing_docs)]

//! Per-round broadcast state.
//!
//! Round state is created on first reference and never discarded.
//! Rounds may be referenced out of order by the network; every accessor
//! tolerates gaps.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::core::types::{NodeId, Round, SigEntry, Signature64};

/// Everything tracked for one locally originated round.
#[derive(Debug, Default)]
pub struct RoundState {
    /// Echo signatures collected for the local broadcast of this round,
    /// at most one entry per node, insertion-ordered.
    signatures: Vec<SigEntry>,
    /// FIN broadcast latch; set at most once.
    pub fin_sent: bool,
    /// SUP broadcast latch for the echo-threshold trigger.
    pub sup_sent: bool,
    /// Number of FIN messages observed for this round (self included).
    pub fin_arrivals: usize,
    /// When the local round started.
    pub started_at: Option<Instant>,
    /// When the first FIN of this round arrived.
    pub fin_first_at: Option<Instant>,
    /// Round start to echo quorum.
    pub send_to_echo: Option<Duration>,
    /// Round start to all-FINs-arrived.
    pub send_to_fin: Option<Duration>,
    /// First FIN to all-FINs-arrived.
    pub fin_to_fin: Option<Duration>,
    /// Round start to delivery of the local broadcast.
    pub send_to_delivered: Option<Duration>,
}

impl RoundState {
    /// Collected echo signatures.
    pub fn signatures(&self) -> &[SigEntry] {
        &self.signatures
    }

    /// Number of distinct echoes collected (the local one included).
    pub fn echo_count(&self) -> usize {
        self.signatures.len()
    }
}

/// Round-indexed broadcast bookkeeping for one node.
#[derive(Debug)]
pub struct RoundTable {
    node_count: usize,
    rounds: BTreeMap<Round, RoundState>,
    /// Payload log per originating node, keyed by round.
    tx_lists: Vec<BTreeMap<Round, Vec<u8>>>,
    /// SUP arrival counts per origin and round.
    sup_counts: Vec<BTreeMap<Round, usize>>,
    /// Latched delivery marks per origin and round.
    delivered: Vec<BTreeMap<Round, ()>>,
}

impl RoundTable {
    /// Create a table for a cluster of `node_count` nodes.
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            rounds: BTreeMap::new(),
            tx_lists: vec![BTreeMap::new(); node_count],
            sup_counts: vec![BTreeMap::new(); node_count],
            delivered: vec![BTreeMap::new(); node_count],
        }
    }

    /// Cluster size `n`.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Fault allowance `f = (n - 1) / 3`.
    pub fn faulty_allowance(&self) -> usize {
        (self.node_count - 1) / 3
    }

    /// Minimum signature-list length accepted on FIN/SUP: `2 * f`.
    /// TODO: revisit against a strict `2f + 1` quorum before running
    /// with adversarial peers.
    pub fn fin_quorum(&self) -> usize {
        2 * self.faulty_allowance()
    }

    /// Echoes required before FIN fires: one from every node.
    pub fn echo_quorum(&self) -> usize {
        self.node_count
    }

    /// State for `round`, created on first reference.
    pub fn round_mut(&mut self, round: Round) -> &mut RoundState {
        self.rounds.entry(round).or_default()
    }

    /// State for `round`, if ever referenced.
    pub fn round(&self, round: Round) -> Option<&RoundState> {
        self.rounds.get(&round)
    }

    /// All referenced rounds in ascending order.
    pub fn rounds(&self) -> impl Iterator<Item = (Round, &RoundState)> {
        self.rounds.iter().map(|(r, s)| (*r, s))
    }

    /// Record a payload for `(sender, round)`. Returns false (and keeps
    /// the existing payload) if one was already recorded.
    pub fn record_payload(&mut self, sender: NodeId, round: Round, payload: Vec<u8>) -> bool {
        let Some(list) = self.tx_lists.get_mut(usize::from(sender)) else {
            return false;
        };
        match list.entry(round) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(v) => {
                v.insert(payload);
                true
            }
        }
    }

    /// Payload recorded for `(sender, round)`, if any.
    pub fn payload(&self, sender: NodeId, round: Round) -> Option<&[u8]> {
        self.tx_lists
            .get(usize::from(sender))?
            .get(&round)
            .map(|v| v.as_slice())
    }

    /// Insert an echo signature for the local broadcast of `round`.
    /// Returns false if `node` already signed (the set never holds
    /// duplicate node ids, and the echo count does not move).
    pub fn add_signature(&mut self, round: Round, node: NodeId, signature: Signature64) -> bool {
        let st = self.rounds.entry(round).or_default();
        if st.signatures.iter().any(|e| e.node == node) {
            return false;
        }
        st.signatures.push(SigEntry { node, signature });
        true
    }

    /// Whether the echo quorum for `round` has been reached.
    pub fn echo_quorum_reached(&self, round: Round) -> bool {
        self.rounds
            .get(&round)
            .map(|st| st.echo_count() >= self.echo_quorum())
            .unwrap_or(false)
    }

    /// Note one FIN arrival for `round`, stamping the first-FIN mark and,
    /// once all `n` FINs are in, the send-to-fin / fin-to-fin durations.
    pub fn note_fin_arrival(&mut self, round: Round, now: Instant) {
        let n = self.node_count;
        let st = self.rounds.entry(round).or_default();
        st.fin_arrivals += 1;
        if st.fin_arrivals == 1 {
            st.fin_first_at = Some(now);
        } else if st.fin_arrivals == n {
            st.send_to_fin = st.started_at.map(|t| now.duration_since(t));
            st.fin_to_fin = st.fin_first_at.map(|t| now.duration_since(t));
        }
    }

    /// Count one SUP naming `(origin, round)`; returns the new count.
    pub fn note_sup_arrival(&mut self, origin: NodeId, round: Round) -> usize {
        let Some(counts) = self.sup_counts.get_mut(usize::from(origin)) else {
            return 0;
        };
        let c = counts.entry(round).or_insert(0);
        *c += 1;
        *c
    }

    /// Latch the delivery mark for `(origin, round)`. Returns true only
    /// on the first call; the mark never clears.
    pub fn mark_delivered(&mut self, origin: NodeId, round: Round) -> bool {
        let Some(marks) = self.delivered.get_mut(usize::from(origin)) else {
            return false;
        };
        marks.insert(round, ()).is_none()
    }

    /// Whether `(origin, round)` has been delivered.
    pub fn is_delivered(&self, origin: NodeId, round: Round) -> bool {
        self.delivered
            .get(usize::from(origin))
            .map(|m| m.contains_key(&round))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(fill: u8) -> Signature64 {
        Signature64([fill; 64])
    }

    #[test]
    fn signature_set_rejects_duplicate_node() {
        let mut t = RoundTable::new(4);
        assert!(t.add_signature(0, NodeId::from(1), sig(1)));
        assert!(!t.add_signature(0, NodeId::from(1), sig(2)));
        let st = t.round(0).expect("round");
        assert_eq!(st.echo_count(), 1);
        assert_eq!(st.signatures()[0].signature, sig(1));
    }

    #[test]
    fn echo_quorum_counts_all_nodes() {
        let mut t = RoundTable::new(4);
        for i in 0..3u32 {
            t.add_signature(5, NodeId::from(i), sig(i as u8));
        }
        assert!(!t.echo_quorum_reached(5));
        t.add_signature(5, NodeId::from(3), sig(3));
        assert!(t.echo_quorum_reached(5));
    }

    #[test]
    fn payload_latches_first_value() {
        let mut t = RoundTable::new(2);
        assert!(t.record_payload(NodeId::from(1), 3, b"one".to_vec()));
        assert!(!t.record_payload(NodeId::from(1), 3, b"two".to_vec()));
        assert_eq!(t.payload(NodeId::from(1), 3), Some(&b"one"[..]));
        assert_eq!(t.payload(NodeId::from(1), 4), None);
    }

    #[test]
    fn delivery_mark_latches() {
        let mut t = RoundTable::new(4);
        assert!(!t.is_delivered(NodeId::from(2), 0));
        assert!(t.mark_delivered(NodeId::from(2), 0));
        assert!(!t.mark_delivered(NodeId::from(2), 0));
        assert!(t.is_delivered(NodeId::from(2), 0));
    }

    #[test]
    fn fin_arrival_marks() {
        let mut t = RoundTable::new(3);
        let t0 = Instant::now();
        t.round_mut(0).started_at = Some(t0);
        t.note_fin_arrival(0, t0);
        assert!(t.round(0).expect("round").fin_first_at.is_some());
        assert!(t.round(0).expect("round").send_to_fin.is_none());
        t.note_fin_arrival(0, t0);
        t.note_fin_arrival(0, t0);
        let st = t.round(0).expect("round");
        assert_eq!(st.fin_arrivals, 3);
        assert!(st.send_to_fin.is_some());
        assert!(st.fin_to_fin.is_some());
    }

    #[test]
    fn quorum_constants() {
        let t = RoundTable::new(4);
        assert_eq!(t.faulty_allowance(), 1);
        assert_eq!(t.fin_quorum(), 2);
        assert_eq!(t.echo_quorum(), 4);
        let t7 = RoundTable::new(7);
        assert_eq!(t7.faulty_allowance(), 2);
        assert_eq!(t7.fin_quorum(), 4);
    }
}
