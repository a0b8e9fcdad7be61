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

//! Per-opcode byte accounting, snapshotted once per round.
//!
//! The snapshot-then-reset is lossy: increments racing the snapshot land
//! on either side of the round boundary. The data is observational.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use crate::networking::codec::Opcode;

/// Eight running byte counters, one per direction and payload opcode.
#[derive(Debug, Default)]
pub struct ThruputCounters {
    recv_send: AtomicU32,
    recv_echo: AtomicU32,
    recv_fin: AtomicU32,
    recv_sup: AtomicU32,
    sent_send: AtomicU32,
    sent_echo: AtomicU32,
    sent_fin: AtomicU32,
    sent_sup: AtomicU32,
}

impl ThruputCounters {
    /// Add received bytes for `op`. ACK traffic is not tracked.
    pub fn note_recv(&self, op: Opcode, bytes: u32) {
        match op {
            Opcode::Send => self.recv_send.fetch_add(bytes, Ordering::Relaxed),
            Opcode::Echo => self.recv_echo.fetch_add(bytes, Ordering::Relaxed),
            Opcode::Fin => self.recv_fin.fetch_add(bytes, Ordering::Relaxed),
            Opcode::Sup => self.recv_sup.fetch_add(bytes, Ordering::Relaxed),
            Opcode::Ack => 0,
        };
    }

    /// Add sent bytes for `op`. ACK traffic is not tracked.
    pub fn note_sent(&self, op: Opcode, bytes: u32) {
        match op {
            Opcode::Send => self.sent_send.fetch_add(bytes, Ordering::Relaxed),
            Opcode::Echo => self.sent_echo.fetch_add(bytes, Ordering::Relaxed),
            Opcode::Fin => self.sent_fin.fetch_add(bytes, Ordering::Relaxed),
            Opcode::Sup => self.sent_sup.fetch_add(bytes, Ordering::Relaxed),
            Opcode::Ack => 0,
        };
    }

    /// Take the current values, zeroing the counters.
    pub fn snapshot_and_reset(&self) -> ThruputSample {
        ThruputSample {
            recv_send: self.recv_send.swap(0, Ordering::Relaxed),
            recv_echo: self.recv_echo.swap(0, Ordering::Relaxed),
            recv_fin: self.recv_fin.swap(0, Ordering::Relaxed),
            recv_sup: self.recv_sup.swap(0, Ordering::Relaxed),
            sent_send: self.sent_send.swap(0, Ordering::Relaxed),
            sent_echo: self.sent_echo.swap(0, Ordering::Relaxed),
            sent_fin: self.sent_fin.swap(0, Ordering::Relaxed),
            sent_sup: self.sent_sup.swap(0, Ordering::Relaxed),
        }
    }
}

/// One round's worth of counter values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct ThruputSample {
    pub recv_send: u32,
    pub recv_echo: u32,
    pub recv_fin: u32,
    pub recv_sup: u32,
    pub sent_send: u32,
    pub sent_echo: u32,
    pub sent_fin: u32,
    pub sent_sup: u32,
}

/// Snapshots accumulated over the node's lifetime, one per round start.
#[derive(Debug, Default)]
pub struct ThruputLog {
    marks: Vec<Instant>,
    samples: Vec<ThruputSample>,
}

impl ThruputLog {
    /// Record a snapshot taken at `at`.
    pub fn push(&mut self, at: Instant, sample: ThruputSample) {
        self.marks.push(at);
        self.samples.push(sample);
    }

    /// Number of recorded snapshots.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether any snapshot was recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Completed-round rows: the wall-clock gap between consecutive
    /// snapshots paired with the earlier snapshot's counters.
    pub fn rows(&self) -> impl Iterator<Item = (std::time::Duration, &ThruputSample)> {
        self.marks
            .windows(2)
            .zip(self.samples.iter())
            .map(|(w, s)| (w[1].duration_since(w[0]), s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn snapshot_resets() {
        let c = ThruputCounters::default();
        c.note_recv(Opcode::Send, 100);
        c.note_recv(Opcode::Send, 20);
        c.note_sent(Opcode::Sup, 7);
        c.note_recv(Opcode::Ack, 999);

        let s = c.snapshot_and_reset();
        assert_eq!(s.recv_send, 120);
        assert_eq!(s.sent_sup, 7);
        assert_eq!(s.recv_echo, 0);

        let s2 = c.snapshot_and_reset();
        assert_eq!(s2, ThruputSample::default());
    }

    #[test]
    fn rows_pair_gap_with_prior_sample() {
        let mut log = ThruputLog::default();
        let t0 = Instant::now();
        log.push(
            t0,
            ThruputSample {
                recv_send: 1,
                ..Default::default()
            },
        );
        log.push(
            t0 + Duration::from_millis(50),
            ThruputSample {
                recv_send: 2,
                ..Default::default()
            },
        );
        let rows: Vec<_> = log.rows().collect();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].0 >= Duration::from_millis(50));
        assert_eq!(rows[0].1.recv_send, 1);
    }
}
