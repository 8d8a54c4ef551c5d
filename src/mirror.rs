//! Cluster mirror pipeline: store watcher -> keeper
//!
//! A long-lived recursive watch on the namespace root is folded into a
//! membership map (store key -> last published document). Every event
//! produces a freshly serialized cluster view which replaces the keeper's
//! cached copy. There is no initial full read: after a restart the view
//! fills back in as each host's next heartbeat write arrives, at most one
//! publish interval later.

use crate::keeper::ViewKeeper;
use crate::models::{ClusterView, StoreEvent, ViewMeta};
use crate::store::{StoreClient, StoreError};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Pause before re-dialing the store after a connection-level watch failure.
const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

/// Which hosts are currently present, reconstructed purely from the ordered
/// stream of upsert/delete events.
#[derive(Debug, Default)]
pub struct Membership {
    hosts: HashMap<String, Value>,
}

impl Membership {
    pub fn new() -> Self {
        Membership::default()
    }

    /// Folds one event into the map. Upserts whose value is not valid JSON
    /// are ignored; deleting an absent key is a no-op.
    pub fn apply(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::Upsert { key, value } => match serde_json::from_str(&value) {
                Ok(document) => {
                    debug!(%key, "membership upsert");
                    self.hosts.insert(key, document);
                }
                Err(e) => warn!(%key, error = %e, "ignoring upsert with undecodable value"),
            },
            StoreEvent::Delete { key } => {
                debug!(%key, "membership delete");
                self.hosts.remove(&key);
            }
        }
    }

    /// Materializes the current membership as a cluster view, stamped now.
    pub fn to_view(&self) -> ClusterView {
        ClusterView {
            meta: ViewMeta { updated_at: Some(Utc::now()) },
            hosts: self.hosts.values().cloned().collect(),
        }
    }
}

/// Starts the watcher task feeding the given keeper.
pub fn spawn_mirror_pipeline(
    store: StoreClient,
    root_key: String,
    keeper: ViewKeeper,
    cancel: &CancellationToken,
) {
    tokio::spawn(watcher(store, root_key, keeper, cancel.clone()));
}

/// Subscription loop. Transient store errors restart the watch (with a short
/// pause when the store is unreachable); cancellation exits cleanly without
/// further emission.
async fn watcher(
    store: StoreClient,
    root_key: String,
    keeper: ViewKeeper,
    cancel: CancellationToken,
) {
    let mut membership = Membership::new();
    let mut wait_index: Option<u64> = None;

    loop {
        let step = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("watcher cancelled");
                return;
            }
            step = store.watch_next(&root_key, wait_index) => step,
        };

        match step {
            Ok(step) => {
                if let Some(index) = step.next_index {
                    wait_index = Some(index);
                }
                let Some(event) = step.event else { continue };
                debug!(key = event.key(), "watch event");
                membership.apply(event);
                match serde_json::to_vec(&membership.to_view()) {
                    Ok(view) => keeper.publish(view),
                    Err(e) => warn!(error = %e, "failed to serialize cluster view, dropping emission"),
                }
            }
            Err(StoreError::OutdatedIndex) => {
                warn!("watch index outdated, resubscribing from current state");
                wait_index = None;
            }
            Err(e) if e.is_transport() => {
                warn!(error = %e, "can't reach store, retrying watch");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("watcher cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(RECONNECT_PAUSE) => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "watch error, restarting subscription");
            }
        }
    }
}
