//! Data sources consulted when a client subscribes or sends a request.

use crate::filter::Filter;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Supplies the current state of a channel.
///
/// Implementations are called without any hub lock held and may be slow.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Current state of `channel` as seen through `filters`, or `None` when
    /// the channel has nothing to report.
    async fn snapshot(&self, channel: &str, filters: &Filter) -> Option<Value>;

    /// Answer a one-off `request` message.
    async fn respond(&self, action: &str, params: &Value) -> Value {
        let _ = (action, params);
        json!({ "status": "processed" })
    }
}

/// Provider with no data; every subscribe gets only its acknowledgment.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSnapshots;

#[async_trait]
impl SnapshotProvider for NoSnapshots {
    async fn snapshot(&self, _channel: &str, _filters: &Filter) -> Option<Value> {
        None
    }
}
