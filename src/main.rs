//! metad - per-node cluster metadata agent
//!
//! Publishes this host's facts to the coordination store on a TTL heartbeat
//! and mirrors every host's published document into a locally served cluster
//! view:
//! - Local publish pipeline: collectors -> aggregator -> scheduler -> writer
//! - Cluster mirror pipeline: store watcher -> keeper -> GET /meta

mod collectors;
mod config;
mod http;
mod keeper;
mod mirror;
mod models;
mod pipeline;
mod store;

use anyhow::{Context, Result};
use clap::Parser;
use config::AgentConfig;
use keeper::ViewKeeper;
use std::net::SocketAddr;
use std::time::Duration;
use store::StoreClient;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AgentConfig::parse();

    let default_filter = if cfg.debug { "metad=debug" } else { "metad=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    info!(
        hostname = %cfg.hostname,
        namespace = %cfg.namespace,
        store = %cfg.store_endpoint,
        interval_secs = cfg.interval_secs,
        "starting"
    );

    // Bootstrap invariant: the namespace root must be a directory in the
    // store before any pipeline starts. Unrecoverable here means exit.
    let store = StoreClient::new(&cfg.store_endpoint);
    store
        .ensure_root(&cfg.root_key())
        .await
        .with_context(|| format!("store bootstrap failed for {}", cfg.root_key()))?;

    let cancel = CancellationToken::new();

    // Cluster mirror pipeline
    let view_keeper = ViewKeeper::new();
    mirror::spawn_mirror_pipeline(store.clone(), cfg.root_key(), view_keeper.clone(), &cancel);

    // Local publish pipeline
    let datum_tx = pipeline::spawn_local_pipeline(&cfg, store, &cancel);
    collectors::spawn_collectors(collectors::default_collectors(), datum_tx, cancel.clone());

    // Query API
    let app = http::build_router(http::AppState { keeper: view_keeper });
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind api port {addr}"))?;
    info!("api listening on http://{addr}");

    let shutdown = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });

    shutdown_signal().await;
    info!("stopping");
    cancel.cancel();

    server.await.context("api server task panicked")?.context("api server failed")?;
    // Let the pipeline loops observe cancellation before the process exits
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "no SIGTERM handler, falling back to ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
