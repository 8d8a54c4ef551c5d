//! Single-slot cache for the serialized cluster view
//!
//! One writer (the watcher) replaces the value, many readers (query endpoint
//! handlers) take point-in-time copies. This cell is the only shared mutable
//! state in the process; everything else moves by ownership over channels.

use crate::models::ClusterView;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Clone)]
pub struct ViewKeeper {
    cell: Arc<Mutex<Vec<u8>>>,
}

impl ViewKeeper {
    /// Starts out holding the serialized empty view, so a reader on a quiet
    /// cluster gets a well-formed document instead of blocking.
    pub fn new() -> Self {
        let placeholder =
            serde_json::to_vec(&ClusterView::empty()).unwrap_or_else(|_| b"{}".to_vec());
        ViewKeeper { cell: Arc::new(Mutex::new(placeholder)) }
    }

    /// Replaces the held view. Called by exactly one writer.
    pub fn publish(&self, view: Vec<u8>) {
        *self.cell.lock() = view;
    }

    /// Returns a copy of the currently held view.
    pub fn snapshot(&self) -> Vec<u8> {
        self.cell.lock().clone()
    }
}

impl Default for ViewKeeper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_empty_view() {
        let keeper = ViewKeeper::new();
        assert_eq!(keeper.snapshot(), br#"{"meta":{},"hosts":[]}"#.to_vec());
    }

    #[test]
    fn snapshot_returns_last_published() {
        let keeper = ViewKeeper::new();
        keeper.publish(b"first".to_vec());
        keeper.publish(b"second".to_vec());
        assert_eq!(keeper.snapshot(), b"second".to_vec());
        // Reading does not consume the value
        assert_eq!(keeper.snapshot(), b"second".to_vec());
    }

    #[test]
    fn readers_see_writer_updates_across_clones() {
        let keeper = ViewKeeper::new();
        let reader = keeper.clone();
        keeper.publish(b"view".to_vec());
        assert_eq!(reader.snapshot(), b"view".to_vec());
    }
}
