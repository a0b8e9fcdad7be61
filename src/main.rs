#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Quorumcast node entrypoint.
//! Boots the broadcast engine over TCP and writes evaluation files on
//! shutdown. Takes the local node index as its single argument.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use quorumcast::core::broadcast::engine::{BroadcastEngine, EngineConfig, EngineEvent};
use quorumcast::core::config::ClusterConfig;
use quorumcast::core::security::keyring::Keyring;
use quorumcast::core::types::NodeId;
use quorumcast::monitoring::eval;
use quorumcast::monitoring::metrics::{self, Metrics};
use quorumcast::monitoring::throughput::ThruputCounters;
use quorumcast::networking::transport::{self, TransportConfig};

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init();

    let index: usize = std::env::args()
        .nth(1)
        .context("usage: quorumcast <node_index>")?
        .parse()
        .context("node index must be an integer")?;

    let config_path = PathBuf::from(env("QUORUMCAST_CONFIG", "ip.config"));
    let pem_dir = PathBuf::from(env("QUORUMCAST_PEM_DIR", "pem"));
    let eval_dir = PathBuf::from(env("QUORUMCAST_EVAL_DIR", "eval"));

    let cfg = ClusterConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let local = cfg.local(index)?.clone();
    let node_id = NodeId::from(index as u32);

    if cfg.node_count < 4 {
        if cfg!(feature = "production") {
            bail!(
                "node_count {} cannot tolerate any fault (need at least 4)",
                cfg.node_count
            );
        }
        warn!(
            n = cfg.node_count,
            "cluster too small to tolerate a fault; running anyway"
        );
    }

    let keyring = Arc::new(
        Keyring::load(&pem_dir, node_id, cfg.node_count)
            .with_context(|| format!("loading keys from {}", pem_dir.display()))?,
    );

    info!(
        node = %node_id,
        n = cfg.node_count,
        f = cfg.faulty_allowance(),
        addr = %local.raw,
        interval = ?cfg.round_interval,
        payload = cfg.payload_size,
        dynamic = cfg.dynamic_msg_size,
        git = option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
        built = option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown"),
        "quorumcast node starting"
    );

    let metrics = Arc::new(Metrics::new().context("metrics init")?);
    let counters = Arc::new(ThruputCounters::default());

    let mut handles = Vec::new();

    // Optional Prometheus endpoint.
    if let Ok(addr) = std::env::var("QUORUMCAST_METRICS_ADDR") {
        let addr: std::net::SocketAddr = addr.parse().context("QUORUMCAST_METRICS_ADDR")?;
        let m = metrics.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = metrics::serve(m, addr).await {
                warn!(err = %e, "metrics endpoint stopped");
            }
        }));
    }

    let (engine_tx, engine_rx) = mpsc::channel::<EngineEvent>(1024);
    let (event_tx, mut event_rx) = mpsc::channel(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Log peer and delivery notifications.
    handles.push(tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            info!(?ev, "broadcast event");
        }
    }));

    let tcfg = TransportConfig::new(
        local.socket,
        cfg.peers_of(index).into_iter().map(|(_, a)| a.socket).collect(),
    );
    transport::start(tcfg, metrics.clone(), engine_tx.clone())
        .await
        .context("binding listener")?;

    let engine = BroadcastEngine::new(
        EngineConfig::from_cluster(&cfg, index),
        keyring,
        metrics.clone(),
        counters.clone(),
        event_tx,
    );
    let engine_task = tokio::spawn(engine.run(engine_rx, shutdown_rx));

    // SIGINT/SIGTERM stop the engine; in-flight writes are discarded.
    tokio::spawn(async move {
        let sigterm = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut s) => {
                        s.recv().await;
                    }
                    Err(_) => std::future::pending::<()>().await,
                }
            }
            #[cfg(not(unix))]
            std::future::pending::<()>().await;
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm => {}
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let report = engine_task.await.context("engine task")?;
    eval::write_all(
        &eval_dir,
        node_id,
        &report.rounds,
        &report.thruput,
        report.rounds_started,
    )
    .context("writing eval files")?;
    info!(dir = %eval_dir.display(), rounds = report.rounds_started, "evaluation files written");

    for h in &handles {
        h.abort();
    }
    let _ = futures::future::join_all(handles).await;

    Ok(())
}
