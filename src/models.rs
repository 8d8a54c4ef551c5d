//! Message contracts shared by the pipeline tasks
//!
//! Everything crossing a channel boundary is defined here. Values are handed
//! off by ownership transfer: the sender clones what it keeps, the receiver
//! owns what it gets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One collector's latest output, tagged by its source name.
#[derive(Debug, Clone)]
pub struct Datum {
    pub source: String,
    pub value: Value,
}

/// Merged view of every collector's latest output, keyed by source name.
/// Last write wins per key.
pub type LocalSnapshot = HashMap<String, Value>;

/// Metadata stamped onto each published document at write time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub hostname: String,
    pub updated_at: DateTime<Utc>,
}

/// What the store writer serializes under `/<namespace>/<hostname>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedDocument {
    pub meta: DocumentMeta,
    pub data: LocalSnapshot,
}

/// Normalized store change notification.
///
/// etcd's native action vocabulary collapses to two cases: anything that
/// leaves a value behind is an upsert, anything that removes one is a delete.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Upsert { key: String, value: String },
    Delete { key: String },
}

impl StoreEvent {
    pub fn key(&self) -> &str {
        match self {
            StoreEvent::Upsert { key, .. } | StoreEvent::Delete { key } => key,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The cluster-wide view served over `GET /meta`. Host order is not
/// significant; the list is rebuilt from the membership map on every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterView {
    pub meta: ViewMeta,
    pub hosts: Vec<Value>,
}

impl ClusterView {
    /// Placeholder view handed to the keeper at startup so the query
    /// endpoint never blocks on a quiet cluster.
    pub fn empty() -> Self {
        ClusterView { meta: ViewMeta::default(), hosts: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_view_serializes_without_timestamp() {
        let json = serde_json::to_string(&ClusterView::empty()).unwrap();
        assert_eq!(json, r#"{"meta":{},"hosts":[]}"#);
    }

    #[test]
    fn published_document_shape() {
        let mut data = LocalSnapshot::new();
        data.insert("uname".into(), serde_json::json!({"arch": "x86_64"}));
        let doc = PublishedDocument {
            meta: DocumentMeta { hostname: "node1".into(), updated_at: Utc::now() },
            data,
        };
        let v: Value = serde_json::from_str(&serde_json::to_string(&doc).unwrap()).unwrap();
        assert_eq!(v["meta"]["hostname"], "node1");
        assert_eq!(v["data"]["uname"]["arch"], "x86_64");
    }
}
