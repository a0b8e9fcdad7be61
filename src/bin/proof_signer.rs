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

//! Merkle proof pipeline: read 32-byte leaves, build the append-only
//! tree, and fan the `(root, leaf, path)` work out to a signer pool
//! writing self-contained records into the proof file.
//!
//! Usage: `proof_signer [in_file] [out_file]`
//! (defaults `tx_data/tx_out.tx` and `tx_data/signed_proof.tx`).
//! `QUORUMCAST_SIGNER_THREADS` overrides the pool size (default 40).

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, warn};

use quorumcast::core::merkle::pipeline::{
    ProofSink, SignerPool, WorkQueue, DEFAULT_SIGNER_THREADS,
};
use quorumcast::core::merkle::tree::MerkleTree;
use quorumcast::core::security::keyring::EphemeralSigner;

const QUEUE_CAPACITY: usize = 1024;

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .try_init();

    let in_path = PathBuf::from(
        std::env::args()
            .nth(1)
            .unwrap_or_else(|| "tx_data/tx_out.tx".to_string()),
    );
    let out_path = PathBuf::from(
        std::env::args()
            .nth(2)
            .unwrap_or_else(|| "tx_data/signed_proof.tx".to_string()),
    );
    let threads: usize = std::env::var("QUORUMCAST_SIGNER_THREADS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SIGNER_THREADS);

    let data = fs::read(&in_path).with_context(|| format!("reading {}", in_path.display()))?;
    if data.len() % 32 != 0 {
        warn!(
            trailing = data.len() % 32,
            "input is not a whole number of 32-byte leaves; trailing bytes ignored"
        );
    }
    let leaf_total = data.len() / 32;

    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = fs::File::create(&out_path)
        .with_context(|| format!("creating {}", out_path.display()))?;

    let signer = Arc::new(EphemeralSigner::generate().context("keygen")?);
    out.write_all(&signer.public_key_spki())?;

    let sink = Arc::new(ProofSink::new(out));
    let queue = Arc::new(WorkQueue::new(QUEUE_CAPACITY));
    let remaining = Arc::new(AtomicUsize::new(0));
    let pool = SignerPool::spawn(
        threads,
        queue.clone(),
        signer,
        sink,
        remaining.clone(),
    );

    info!(leaves = leaf_total, threads, "pipeline started");
    let start = Instant::now();

    let mut tree = MerkleTree::new();
    for chunk in data.chunks_exact(32) {
        let mut leaf = [0u8; 32];
        leaf.copy_from_slice(chunk);
        remaining.fetch_add(1, Ordering::AcqRel);
        queue.push(tree.append(leaf));
    }

    let inserted = start.elapsed();
    info!(
        ms = inserted.as_millis() as u64,
        pending = remaining.load(Ordering::Acquire),
        "tree insertion finished"
    );

    pool.drain();
    pool.shutdown(&queue);

    if let Some(root) = tree.root_hash() {
        info!(root = %hex::encode(root), "final root");
    }
    info!(
        ms = start.elapsed().as_millis() as u64,
        leaves = leaf_total,
        out = %out_path.display(),
        "pipeline finished"
    );

    Ok(())
}
