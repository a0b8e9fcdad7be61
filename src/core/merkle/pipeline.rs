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

//! Signed proof pipeline: a bounded work queue between the tree-building
//! producer and a pool of signer threads appending records to one sink.
//!
//! Proof record layout: `path_count` as two ASCII digits, then
//! `signature[64] root[32] leaf[32] path[path_count * 32]`. The stream
//! is prefixed with the 44-byte SubjectPublicKeyInfo of the signing key.
//! Workers drain the queue in no particular order, so records in the
//! sink need not match insertion order; each record is self-contained.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use ring::signature::{UnparsedPublicKey, ED25519};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::warn;

use crate::core::merkle::tree::{fold_path, ProofWork};
use crate::core::security::keyring::{raw_from_spki, EphemeralSigner, ED25519_SPKI_LEN};
use crate::core::types::{Hash32, Signature64};

/// Signer threads spawned by default.
pub const DEFAULT_SIGNER_THREADS: usize = 40;

/// Poll interval while waiting for the work count to reach zero.
const DRAIN_POLL: Duration = Duration::from_micros(10);

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("io")]
    Io,
    /// Record header is not two ASCII digits.
    #[error("bad record header")]
    BadRecord,
    /// Stream ended inside a record.
    #[error("truncated record")]
    TruncatedRecord,
    /// Stream is shorter than the public key prefix.
    #[error("missing key prefix")]
    MissingKey,
}

/// Bounded FIFO between the producer and the signer pool. The producer
/// blocks while the queue is full; workers block while it is empty.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

struct QueueState {
    items: VecDeque<ProofWork>,
    closed: bool,
}

fn lock_state<'a>(m: &'a Mutex<QueueState>) -> MutexGuard<'a, QueueState> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl WorkQueue {
    /// Queue holding at most `capacity` pending items.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue a work item, blocking while the queue is full. Items
    /// pushed after [`WorkQueue::close`] are dropped.
    pub fn push(&self, work: ProofWork) {
        let mut st = lock_state(&self.state);
        while st.items.len() >= self.capacity && !st.closed {
            st = match self.not_full.wait(st) {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        if st.closed {
            return;
        }
        st.items.push_back(work);
        drop(st);
        self.not_empty.notify_one();
    }

    /// Dequeue the front item, blocking while the queue is empty.
    /// Returns `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<ProofWork> {
        let mut st = lock_state(&self.state);
        loop {
            if let Some(work) = st.items.pop_front() {
                drop(st);
                self.not_full.notify_one();
                return Some(work);
            }
            if st.closed {
                return None;
            }
            st = match self.not_empty.wait(st) {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Close the queue, waking every blocked worker and producer.
    pub fn close(&self) {
        lock_state(&self.state).closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

/// Serialized proof sink; a mutex keeps records whole under concurrent
/// workers.
pub struct ProofSink<W: Write> {
    inner: Mutex<W>,
}

impl<W: Write> ProofSink<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Append one encoded record.
    pub fn append_record(&self, work: &ProofWork, sig: &Signature64) -> Result<(), PipelineError> {
        let bytes = encode_record(work, sig);
        let mut w = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        w.write_all(&bytes).map_err(|_| PipelineError::Io)
    }

    /// Recover the inner writer.
    pub fn into_inner(self) -> W {
        match self.inner.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Encode one proof record.
pub fn encode_record(work: &ProofWork, sig: &Signature64) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + 64 + 64 + work.path.len() * 32);
    out.extend_from_slice(format!("{:02}", work.path.len()).as_bytes());
    out.extend_from_slice(sig.as_bytes());
    out.extend_from_slice(&work.root);
    out.extend_from_slice(&work.leaf);
    for h in &work.path {
        out.extend_from_slice(h);
    }
    out
}

/// One decoded proof record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofRecord {
    /// Ed25519 signature over the root.
    pub signature: Signature64,
    /// Recorded root at insertion time.
    pub root: Hash32,
    /// The leaf hash.
    pub leaf: Hash32,
    /// Authentication path, leaf-adjacent sibling first.
    pub path: Vec<Hash32>,
}

fn read_hash<R: Read>(r: &mut R) -> Result<Hash32, PipelineError> {
    let mut h = [0u8; 32];
    r.read_exact(&mut h)
        .map_err(|_| PipelineError::TruncatedRecord)?;
    Ok(h)
}

/// Read the 44-byte public key prefix of a proof stream.
pub fn read_stream_key<R: Read>(r: &mut R) -> Result<[u8; ED25519_SPKI_LEN], PipelineError> {
    let mut key = [0u8; ED25519_SPKI_LEN];
    r.read_exact(&mut key).map_err(|_| PipelineError::MissingKey)?;
    Ok(key)
}

/// Read the next record; `Ok(None)` on a clean end of stream.
pub fn read_record<R: Read>(r: &mut R) -> Result<Option<ProofRecord>, PipelineError> {
    let mut header = [0u8; 2];
    match r.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(_) => return Err(PipelineError::Io),
    }
    if !header.iter().all(|b| b.is_ascii_digit()) {
        return Err(PipelineError::BadRecord);
    }
    let path_count = ((header[0] - b'0') * 10 + (header[1] - b'0')) as usize;

    let mut sig = [0u8; Signature64::LENGTH];
    r.read_exact(&mut sig)
        .map_err(|_| PipelineError::TruncatedRecord)?;
    let root = read_hash(r)?;
    let leaf = read_hash(r)?;
    let mut path = Vec::with_capacity(path_count);
    for _ in 0..path_count {
        path.push(read_hash(r)?);
    }

    Ok(Some(ProofRecord {
        signature: Signature64(sig),
        root,
        leaf,
        path,
    }))
}

/// Check a record: the path must fold back to the recorded root and the
/// signature over the root must verify under the stream key.
pub fn verify_record(key_spki: &[u8; ED25519_SPKI_LEN], rec: &ProofRecord) -> bool {
    let folded = fold_path(&rec.leaf, &rec.path);
    if !bool::from(folded.ct_eq(&rec.root)) {
        return false;
    }
    let Some(raw) = raw_from_spki(key_spki) else {
        return false;
    };
    UnparsedPublicKey::new(&ED25519, &raw)
        .verify(&rec.root, rec.signature.as_bytes())
        .is_ok()
}

/// A pool of signer threads draining a [`WorkQueue`] into a
/// [`ProofSink`].
pub struct SignerPool {
    workers: Vec<thread::JoinHandle<()>>,
    remaining: Arc<AtomicUsize>,
}

impl SignerPool {
    /// Spawn `count` workers. `remaining` is incremented by the producer
    /// per queued item and decremented here once the record is written.
    pub fn spawn<W: Write + Send + 'static>(
        count: usize,
        queue: Arc<WorkQueue>,
        signer: Arc<EphemeralSigner>,
        sink: Arc<ProofSink<W>>,
        remaining: Arc<AtomicUsize>,
    ) -> Self {
        let mut workers = Vec::with_capacity(count);
        for _ in 0..count {
            let queue = queue.clone();
            let signer = signer.clone();
            let sink = sink.clone();
            let remaining = remaining.clone();
            workers.push(thread::spawn(move || {
                while let Some(work) = queue.pop() {
                    let sig = signer.sign(&work.root);
                    if let Err(e) = sink.append_record(&work, &sig) {
                        warn!(err = %e, "proof record write failed");
                    }
                    remaining.fetch_sub(1, Ordering::AcqRel);
                }
            }));
        }
        Self { workers, remaining }
    }

    /// Busy-wait (10 µs polls) until every queued item has been written.
    pub fn drain(&self) {
        while self.remaining.load(Ordering::Acquire) != 0 {
            thread::sleep(DRAIN_POLL);
        }
    }

    /// Close the queue and join the workers.
    pub fn shutdown(self, queue: &WorkQueue) {
        queue.close();
        for w in self.workers {
            let _ = w.join();
        }
    }
}
