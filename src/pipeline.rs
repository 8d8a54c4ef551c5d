//! Local publish pipeline: aggregator -> scheduler -> writer
//!
//! Collectors feed tagged documents into the aggregator, which maintains the
//! merged snapshot. The scheduler forwards fresh snapshots immediately and
//! guarantees a heartbeat emission at least once per interval so the store
//! TTL keeps getting refreshed. The writer stamps, serializes and pushes each
//! document to the store; a failed write drops that cycle and relies on the
//! next heartbeat.

use crate::config::AgentConfig;
use crate::models::{Datum, DocumentMeta, LocalSnapshot, PublishedDocument};
use crate::store::StoreClient;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const CHANNEL_DEPTH: usize = 16;

/// Wires up and starts the three local-pipeline tasks. Returns the channel
/// collectors feed their data into.
pub fn spawn_local_pipeline(
    cfg: &AgentConfig,
    store: StoreClient,
    cancel: &CancellationToken,
) -> mpsc::Sender<Datum> {
    let (datum_tx, datum_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (snapshot_tx, snapshot_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (publish_tx, publish_rx) = mpsc::channel(CHANNEL_DEPTH);

    tokio::spawn(aggregator(datum_rx, snapshot_tx, cancel.clone()));
    tokio::spawn(scheduler(snapshot_rx, publish_tx, cfg.interval(), cancel.clone()));
    tokio::spawn(writer(
        publish_rx,
        store,
        cfg.hostname.clone(),
        cfg.host_key(),
        cfg.ttl(),
        cancel.clone(),
    ));

    datum_tx
}

/// Merges each incoming datum into the running snapshot (last write wins per
/// source) and emits a full copy downstream. Emits nothing until the first
/// datum arrives.
async fn aggregator(
    mut input: mpsc::Receiver<Datum>,
    output: mpsc::Sender<LocalSnapshot>,
    cancel: CancellationToken,
) {
    let mut snapshot = LocalSnapshot::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("aggregator cancelled");
                return;
            }
            datum = input.recv() => {
                let Some(Datum { source, value }) = datum else { return };
                debug!(%source, "aggregator merged datum");
                snapshot.insert(source, value);
                if output.send(snapshot.clone()).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Holds the latest snapshot and guarantees the writer sees a document at
/// least once per `interval`: new input is forwarded immediately, and the
/// ticker re-emits the last known snapshot (possibly still empty) as a
/// heartbeat. Bursts of input are never rate limited.
async fn scheduler(
    mut input: mpsc::Receiver<LocalSnapshot>,
    output: mpsc::Sender<LocalSnapshot>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut last_known = LocalSnapshot::new();
    // A closed input only means no further updates will arrive (one-shot
    // collectors are done); the heartbeat must keep refreshing the TTL
    // until cancellation
    let mut input_open = true;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // tokio intervals fire immediately; consume that tick so the first
    // heartbeat lands one full interval after startup
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("scheduler cancelled");
                return;
            }
            _ = ticker.tick() => {
                debug!("scheduler heartbeat");
                if output.send(last_known.clone()).await.is_err() {
                    return;
                }
            }
            snapshot = input.recv(), if input_open => {
                match snapshot {
                    Some(snapshot) => {
                        debug!("scheduler received fresh snapshot");
                        last_known = snapshot;
                        if output.send(last_known.clone()).await.is_err() {
                            return;
                        }
                    }
                    None => {
                        debug!("scheduler input closed, heartbeat only from here on");
                        input_open = false;
                    }
                }
            }
        }
    }
}

/// Stamps and serializes each snapshot, then writes it to the store under
/// this node's key with TTL = 2x interval. One missed publish cycle is
/// tolerated before the key expires; failures here are logged and dropped.
async fn writer(
    mut input: mpsc::Receiver<LocalSnapshot>,
    store: StoreClient,
    hostname: String,
    host_key: String,
    ttl: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("writer cancelled");
                return;
            }
            snapshot = input.recv() => {
                let Some(snapshot) = snapshot else { return };
                let doc = build_document(&hostname, snapshot);
                let body = match serde_json::to_string(&doc) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize document, dropping cycle");
                        continue;
                    }
                };
                match store.set(&host_key, &body, ttl).await {
                    Ok(()) => debug!(key = %host_key, "published document"),
                    Err(e) => warn!(key = %host_key, error = %e, "store write failed, dropping cycle"),
                }
            }
        }
    }
}

fn build_document(hostname: &str, data: LocalSnapshot) -> PublishedDocument {
    PublishedDocument {
        meta: DocumentMeta { hostname: hostname.to_string(), updated_at: Utc::now() },
        data,
    }
}
