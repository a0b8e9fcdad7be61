// Copyright (c) 2026 Quorumcast
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! End-to-end pipeline runs through a real file: producer, signer pool,
//! order-agnostic verification.

use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use quorumcast::core::merkle::pipeline::{
    read_record, read_stream_key, verify_record, ProofSink, SignerPool, WorkQueue,
};
use quorumcast::core::merkle::tree::MerkleTree;
use quorumcast::core::security::keyring::EphemeralSigner;
use quorumcast::core::types::Hash32;

fn leaf(i: u32) -> Hash32 {
    let mut h = [0u8; 32];
    h[..4].copy_from_slice(&i.to_le_bytes());
    h[31] = 0xa5;
    h
}

fn run_pipeline(leaves: &[Hash32], workers: usize, queue_cap: usize) -> Vec<u8> {
    let mut file = tempfile::tempfile().expect("tempfile");
    let signer = Arc::new(EphemeralSigner::generate().expect("keygen"));
    file.write_all(&signer.public_key_spki()).expect("key prefix");

    let sink = Arc::new(ProofSink::new(file));
    let queue = Arc::new(WorkQueue::new(queue_cap));
    let remaining = Arc::new(AtomicUsize::new(0));
    let pool = SignerPool::spawn(
        workers,
        queue.clone(),
        signer,
        sink.clone(),
        remaining.clone(),
    );

    let mut tree = MerkleTree::new();
    for l in leaves {
        remaining.fetch_add(1, Ordering::AcqRel);
        queue.push(tree.append(*l));
    }

    pool.drain();
    pool.shutdown(&queue);
    assert_eq!(remaining.load(Ordering::Acquire), 0);

    let sink = Arc::into_inner(sink).expect("sole owner");
    let mut file = sink.into_inner();
    file.seek(SeekFrom::Start(0)).expect("seek");
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).expect("read back");
    bytes
}

#[test]
fn single_leaf_proof_is_its_own_root() {
    let bytes = run_pipeline(&[leaf(0)], 1, 4);
    let mut cur = &bytes[..];

    let key = read_stream_key(&mut cur).expect("key");
    let rec = read_record(&mut cur).expect("read").expect("one record");
    assert!(rec.path.is_empty());
    assert_eq!(rec.root, rec.leaf);
    assert_eq!(rec.leaf, leaf(0));
    assert!(verify_record(&key, &rec));
    assert!(read_record(&mut cur).expect("eof").is_none());
}

#[test]
fn pool_drains_and_every_record_verifies() {
    const COUNT: u32 = 5000;
    let leaves: Vec<Hash32> = (0..COUNT).map(leaf).collect();
    let bytes = run_pipeline(&leaves, 8, 256);

    let mut cur = &bytes[..];
    let key = read_stream_key(&mut cur).expect("key");

    // Workers race on the sink, so records arrive in arbitrary order;
    // each one must still verify on its own.
    let mut seen: HashSet<Hash32> = HashSet::new();
    while let Some(rec) = read_record(&mut cur).expect("read") {
        assert!(verify_record(&key, &rec));
        assert!(seen.insert(rec.leaf), "leaf written twice");
    }
    assert_eq!(seen.len(), COUNT as usize);
    for l in &leaves {
        assert!(seen.contains(l));
    }
}

#[test]
fn flipped_signature_fails_verification() {
    let bytes = run_pipeline(&[leaf(1), leaf(2), leaf(3)], 2, 4);
    let mut cur = &bytes[..];
    let key = read_stream_key(&mut cur).expect("key");

    let mut rec = read_record(&mut cur).expect("read").expect("record");
    assert!(verify_record(&key, &rec));
    rec.signature.0[10] ^= 0xff;
    assert!(!verify_record(&key, &rec));
}

#[test]
fn mismatched_root_fails_verification() {
    let bytes = run_pipeline(&[leaf(1), leaf(2)], 1, 4);
    let mut cur = &bytes[..];
    let key = read_stream_key(&mut cur).expect("key");

    let mut rec = read_record(&mut cur).expect("read").expect("record");
    rec.root[0] ^= 0x01;
    assert!(!verify_record(&key, &rec));
}
