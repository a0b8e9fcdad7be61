#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Quorumcast - Byzantine reliable broadcast node and proof tooling.
//!
//! This repository provides:
//! - A four-phase signed broadcast protocol (SEND/ECHO/FIN/SUP) over a
//!   little-endian framed TCP transport, tolerating `f = (n-1)/3` faults
//! - A single-owner broadcast engine with per-round latency and
//!   throughput accounting written to evaluation files
//! - Ed25519 key material handling via PEM files
//! - An append-only Merkle tree feeding a signer-pool proof pipeline
//! - Monitoring via Prometheus metrics and structured logging

/// Core protocol primitives (types, config, broadcast engine, Merkle, keys).
pub mod core;
/// Observability (metrics, throughput accounting, evaluation output).
pub mod monitoring;
/// Networking stack (wire codec, TCP transport).
pub mod networking;
