//! Remote store port and its implementations.
//!
//! The pipeline only talks to [`RemoteStore`]; the Firebase REST client and
//! the in-memory store are interchangeable behind it.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{json, Map, Value};
use thiserror::Error;

pub mod auth;
pub mod firebase;
pub mod memory;
pub mod sse;
pub mod tree;

/// Keys of children as they first appear under a path.
pub type ChildStream = BoxStream<'static, Result<String>>;

/// Full value of a path after every change, starting with its current value.
/// `None` means nothing is stored there.
pub type ValueStream = BoxStream<'static, Result<Option<Value>>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("remote store returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("subscription cancelled by server: {0}")]
    Cancelled(String),
    #[error("credentials revoked; subscription closed")]
    AuthRevoked,
    #[error("malformed stream event {event}: {reason}")]
    Malformed { event: String, reason: String },
    #[error("injected failure at {0}")]
    Injected(String),
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Subscribe to children added under `path`. Existing children are
    /// reported first; an empty or missing path yields nothing until a child
    /// appears.
    async fn subscribe_children(&self, path: &str) -> Result<ChildStream>;

    /// Subscribe to the whole value at `path`.
    async fn subscribe_value(&self, path: &str) -> Result<ValueStream>;

    /// One-shot read.
    async fn read_once(&self, path: &str) -> Result<Option<Value>>;

    /// Partial update: only the given fields of the object at `path` change.
    /// Values equal to [`server_timestamp`] are resolved by the store.
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()>;
}

/// Write sentinel replaced by the store's own clock (milliseconds since epoch).
pub fn server_timestamp() -> Value {
    json!({ ".sv": "timestamp" })
}

pub fn is_server_timestamp(value: &Value) -> bool {
    value.get(".sv").and_then(Value::as_str) == Some("timestamp")
}

pub fn child_path(parent: &str, key: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), key.trim_start_matches('/'))
}

/// Whether `key` can address a single child (Firebase forbids these characters in keys).
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(['/', '.', '#', '$', '[', ']'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_path_joins_without_duplicate_slashes() {
        assert_eq!(child_path("rooms", "r1"), "rooms/r1");
        assert_eq!(child_path("rooms/", "r1"), "rooms/r1");
        assert_eq!(child_path("a/b", "/c"), "a/b/c");
    }

    #[test]
    fn key_validation() {
        assert!(is_valid_key("-NvX3kitchen"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("a/b"));
        assert!(!is_valid_key("a.b"));
        assert!(!is_valid_key("$a"));
    }

    #[test]
    fn server_timestamp_sentinel_is_recognised() {
        assert!(is_server_timestamp(&server_timestamp()));
        assert!(!is_server_timestamp(&json!(12)));
        assert!(!is_server_timestamp(&json!({ ".sv": "increment" })));
    }
}
