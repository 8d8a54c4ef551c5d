//! Coordination store client (etcd v2 keys API)
//!
//! Thin HTTP client covering the three operations the pipelines need:
//! bootstrap the namespace root, set a key with TTL, and long-poll the next
//! change event under a prefix. Event actions are normalized into the closed
//! [`StoreEvent`] vocabulary before they reach the watcher.

use crate::models::StoreEvent;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// etcd error code for "key not found".
const ECODE_KEY_NOT_FOUND: i64 = 100;
/// etcd error code for "the event in requested index is outdated and cleared".
const ECODE_EVENT_INDEX_CLEARED: i64 = 401;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("key {0:?} exists but is not a directory")]
    NotADirectory(String),
    #[error("watch index outdated and cleared")]
    OutdatedIndex,
}

impl StoreError {
    /// Connection-level failure, as opposed to an error the store answered.
    pub fn is_transport(&self) -> bool {
        matches!(self, StoreError::Transport(_))
    }
}

/// Raw etcd v2 response for any keys-API call.
#[derive(Debug, Deserialize)]
struct KeysResponse {
    action: String,
    node: Node,
}

#[derive(Debug, Deserialize)]
struct Node {
    key: String,
    #[serde(default)]
    dir: bool,
    value: Option<String>,
    #[serde(rename = "modifiedIndex")]
    modified_index: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "errorCode")]
    error_code: i64,
    message: String,
}

/// One step of a watch subscription: the normalized event (if the action is
/// one we track) and the index to resume from, when the store reported one.
#[derive(Debug)]
pub struct WatchStep {
    pub event: Option<StoreEvent>,
    pub next_index: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct StoreClient {
    http: reqwest::Client,
    endpoint: String,
}

impl StoreClient {
    pub fn new(endpoint: &str) -> Self {
        StoreClient {
            http: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn keys_url(&self, key: &str) -> String {
        format!("{}/v2/keys{}", self.endpoint, key)
    }

    /// Bootstrap invariant: the namespace root must exist as a directory.
    /// Creates it when absent; fails when it exists as a plain key.
    pub async fn ensure_root(&self, key: &str) -> Result<(), StoreError> {
        let resp = self
            .http
            .get(self.keys_url(key))
            .query(&[("quorum", "true")])
            .send()
            .await?;

        if resp.status().is_success() {
            let body: KeysResponse = resp.json().await?;
            if !body.node.dir {
                return Err(StoreError::NotADirectory(key.to_string()));
            }
            return Ok(());
        }

        let err: ApiError = resp.json().await?;
        if err.error_code == ECODE_KEY_NOT_FOUND {
            debug!(key, "namespace root missing, creating");
            let resp = self
                .http
                .put(self.keys_url(key))
                .form(&[("dir", "true")])
                .send()
                .await?;
            if resp.status().is_success() {
                return Ok(());
            }
            let err: ApiError = resp.json().await?;
            return Err(StoreError::Api { code: err.error_code, message: err.message });
        }
        Err(StoreError::Api { code: err.error_code, message: err.message })
    }

    /// Writes `value` under `key` with the given TTL. The key expires on its
    /// own unless refreshed before the TTL runs out.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let ttl_secs = ttl.as_secs().to_string();
        let resp = self
            .http
            .put(self.keys_url(key))
            .form(&[("value", value), ("ttl", &ttl_secs)])
            .send()
            .await?;

        if resp.status().is_success() {
            return Ok(());
        }
        let err: ApiError = resp.json().await?;
        Err(StoreError::Api { code: err.error_code, message: err.message })
    }

    /// Long-polls the next change event under `prefix` (recursive). Blocks
    /// until the store reports a change; pass the `next_index` of the
    /// previous step to avoid missing events between polls.
    pub async fn watch_next(
        &self,
        prefix: &str,
        wait_index: Option<u64>,
    ) -> Result<WatchStep, StoreError> {
        let mut req = self
            .http
            .get(self.keys_url(prefix))
            .query(&[("wait", "true"), ("recursive", "true")]);
        if let Some(index) = wait_index {
            req = req.query(&[("waitIndex", index.to_string())]);
        }
        let resp = req.send().await?;

        if resp.status().is_success() {
            let body: KeysResponse = resp.json().await?;
            let next_index = body.node.modified_index.map(|i| i + 1);
            return Ok(WatchStep { event: normalize(&body), next_index });
        }

        let err: ApiError = resp.json().await?;
        if err.error_code == ECODE_EVENT_INDEX_CLEARED {
            return Err(StoreError::OutdatedIndex);
        }
        Err(StoreError::Api { code: err.error_code, message: err.message })
    }
}

/// Maps the store's native action vocabulary onto upsert/delete. Actions that
/// carry no membership meaning (and upserts without a value, such as
/// directory creation) map to `None`.
fn normalize(resp: &KeysResponse) -> Option<StoreEvent> {
    match resp.action.as_str() {
        "set" | "update" | "create" | "compareAndSwap" => {
            let value = resp.node.value.clone()?;
            Some(StoreEvent::Upsert { key: resp.node.key.clone(), value })
        }
        "delete" | "expire" | "compareAndDelete" => {
            Some(StoreEvent::Delete { key: resp.node.key.clone() })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(action: &str, key: &str, value: Option<&str>) -> KeysResponse {
        KeysResponse {
            action: action.to_string(),
            node: Node {
                key: key.to_string(),
                dir: false,
                value: value.map(String::from),
                modified_index: Some(7),
            },
        }
    }

    #[test]
    fn upsert_actions_normalize() {
        for action in ["set", "update", "create", "compareAndSwap"] {
            let event = normalize(&response(action, "/meta/node1", Some("{}")));
            assert_eq!(
                event,
                Some(StoreEvent::Upsert { key: "/meta/node1".into(), value: "{}".into() }),
                "action {action}"
            );
        }
    }

    #[test]
    fn delete_actions_normalize() {
        for action in ["delete", "expire", "compareAndDelete"] {
            let event = normalize(&response(action, "/meta/node1", None));
            assert_eq!(event, Some(StoreEvent::Delete { key: "/meta/node1".into() }), "action {action}");
        }
    }

    #[test]
    fn unknown_and_valueless_actions_are_skipped() {
        assert_eq!(normalize(&response("get", "/meta/node1", Some("{}"))), None);
        // A directory creation shows up as "set" with no value
        assert_eq!(normalize(&response("set", "/meta", None)), None);
    }

    #[test]
    fn watch_response_parses() {
        let raw = r#"{
            "action": "expire",
            "node": {"key": "/meta/node2", "modifiedIndex": 42, "createdIndex": 40},
            "prevNode": {"key": "/meta/node2", "value": "{}", "modifiedIndex": 40}
        }"#;
        let body: KeysResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(body.action, "expire");
        assert_eq!(body.node.modified_index, Some(42));
        assert_eq!(normalize(&body), Some(StoreEvent::Delete { key: "/meta/node2".into() }));
    }

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let client = StoreClient::new("http://localhost:2379/");
        assert_eq!(client.keys_url("/meta"), "http://localhost:2379/v2/keys/meta");
    }
}
