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

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, routing::get, Router};
use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
    #[error("io")]
    Io,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Registered peer connections.
    pub connected_peers: IntGauge,
    /// Rounds originated locally.
    pub rounds_started_total: IntCounter,
    /// Delivered `(origin, round)` payloads.
    pub delivered_total: IntCounter,

    /// Messages dropped for an invalid signature.
    pub invalid_signature_total: IntCounter,
    /// Frames dropped as undecodable.
    pub malformed_frame_total: IntCounter,
    /// FIN/SUP dropped for a short signature list.
    pub insufficient_quorum_total: IntCounter,
    /// Outbound frames dropped on writer backpressure.
    pub outbound_dropped_total: IntCounter,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let connected_peers =
            IntGauge::new("quorumcast_connected_peers", "Registered peer connections")
                .map_err(|_| MetricsError::Prom)?;
        let rounds_started_total =
            IntCounter::new("quorumcast_rounds_started_total", "Rounds originated locally")
                .map_err(|_| MetricsError::Prom)?;
        let delivered_total =
            IntCounter::new("quorumcast_delivered_total", "Delivered broadcast payloads")
                .map_err(|_| MetricsError::Prom)?;

        let invalid_signature_total = IntCounter::new(
            "quorumcast_invalid_signature_total",
            "Messages dropped for an invalid signature",
        )
        .map_err(|_| MetricsError::Prom)?;
        let malformed_frame_total = IntCounter::new(
            "quorumcast_malformed_frame_total",
            "Frames dropped as undecodable",
        )
        .map_err(|_| MetricsError::Prom)?;
        let insufficient_quorum_total = IntCounter::new(
            "quorumcast_insufficient_quorum_total",
            "FIN/SUP dropped for a short signature list",
        )
        .map_err(|_| MetricsError::Prom)?;
        let outbound_dropped_total = IntCounter::new(
            "quorumcast_outbound_dropped_total",
            "Outbound frames dropped on writer backpressure",
        )
        .map_err(|_| MetricsError::Prom)?;

        registry
            .register(Box::new(connected_peers.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(rounds_started_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(delivered_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(invalid_signature_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(malformed_frame_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(insufficient_quorum_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(outbound_dropped_total.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            connected_peers,
            rounds_started_total,
            delivered_total,
            invalid_signature_total,
            malformed_frame_total,
            insufficient_quorum_total,
            outbound_dropped_total,
        })
    }
}

async fn render(State(metrics): State<Arc<Metrics>>) -> String {
    let families = metrics.registry.gather();
    prometheus::TextEncoder::new()
        .encode_to_string(&families)
        .unwrap_or_default()
}

/// Serve `GET /metrics` on `addr` until the process exits.
pub async fn serve(metrics: Arc<Metrics>, addr: SocketAddr) -> Result<(), MetricsError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|_| MetricsError::Io)?;
    let app = Router::new()
        .route("/metrics", get(render))
        .with_state(metrics);
    axum::serve(listener, app).await.map_err(|_| MetricsError::Io)
}
