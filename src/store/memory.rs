//! In-process [`RemoteStore`] with the same observable semantics as the
//! Firebase client: subscriptions start with the current state, every write
//! fans out to matching subscribers, and server timestamps are resolved on
//! write.
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{is_server_timestamp, tree, ChildStream, RemoteStore, StoreError, ValueStream};

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    root: Value,
    server_time: Option<i64>,
    failing_reads: HashSet<String>,
    failing_writes: HashSet<String>,
    writes: Vec<(String, Map<String, Value>)>,
    value_subs: Vec<ValueSub>,
    child_subs: Vec<ChildSub>,
}

struct ValueSub {
    path: String,
    last: Option<Value>,
    tx: mpsc::UnboundedSender<Result<Option<Value>>>,
}

struct ChildSub {
    path: String,
    seen: HashSet<String>,
    tx: mpsc::UnboundedSender<Result<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not wedge every other subscriber.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pin the server clock used for timestamp sentinels (milliseconds).
    pub fn set_server_time(&self, millis: i64) {
        self.lock().server_time = Some(millis);
    }

    /// Write as an external actor would, replacing the value at `path`.
    pub fn set(&self, path: &str, value: Value) {
        let mut inner = self.lock();
        let value = inner.resolve_sentinels(value);
        tree::set(&mut inner.root, path, value);
        inner.publish();
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        tree::get(&self.lock().root, path).cloned()
    }

    /// Make reads at exactly `path` fail until cleared.
    pub fn fail_reads(&self, path: &str, failing: bool) {
        let key = path.trim_matches('/').to_string();
        let mut inner = self.lock();
        if failing {
            inner.failing_reads.insert(key);
        } else {
            inner.failing_reads.remove(&key);
        }
    }

    /// Make updates at exactly `path` fail until cleared. Failed updates
    /// change nothing and are not recorded in [`MemoryStore::writes`].
    pub fn fail_writes(&self, path: &str, failing: bool) {
        let key = path.trim_matches('/').to_string();
        let mut inner = self.lock();
        if failing {
            inner.failing_writes.insert(key);
        } else {
            inner.failing_writes.remove(&key);
        }
    }

    /// Every partial update applied through [`RemoteStore::update`], in order.
    pub fn writes(&self) -> Vec<(String, Map<String, Value>)> {
        self.lock().writes.clone()
    }
}

impl Inner {
    fn now_millis(&self) -> i64 {
        self.server_time.unwrap_or_else(|| Utc::now().timestamp_millis())
    }

    fn resolve_sentinels(&self, value: Value) -> Value {
        if is_server_timestamp(&value) {
            return json!(self.now_millis());
        }
        match value {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, self.resolve_sentinels(v)))
                    .collect(),
            ),
            other => other,
        }
    }

    fn publish(&mut self) {
        let root = &self.root;
        self.value_subs.retain_mut(|sub| {
            let current = tree::get(root, &sub.path).cloned();
            if current == sub.last {
                return !sub.tx.is_closed();
            }
            sub.last = current.clone();
            sub.tx.send(Ok(current)).is_ok()
        });
        self.child_subs.retain_mut(|sub| {
            for key in child_keys(root, &sub.path) {
                if sub.seen.insert(key.clone()) && sub.tx.send(Ok(key)).is_err() {
                    return false;
                }
            }
            !sub.tx.is_closed()
        });
    }
}

fn child_keys(root: &Value, path: &str) -> Vec<String> {
    tree::get(root, path)
        .and_then(Value::as_object)
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn subscribe_children(&self, path: &str) -> Result<ChildStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let mut seen = HashSet::new();
        for key in child_keys(&inner.root, path) {
            seen.insert(key.clone());
            let _ = tx.send(Ok(key));
        }
        inner.child_subs.push(ChildSub {
            path: path.to_string(),
            seen,
            tx,
        });
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn subscribe_value(&self, path: &str) -> Result<ValueStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let current = tree::get(&inner.root, path).cloned();
        let _ = tx.send(Ok(current.clone()));
        inner.value_subs.push(ValueSub {
            path: path.to_string(),
            last: current,
            tx,
        });
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn read_once(&self, path: &str) -> Result<Option<Value>> {
        let inner = self.lock();
        if inner.failing_reads.contains(path.trim_matches('/')) {
            return Err(StoreError::Injected(path.to_string()).into());
        }
        Ok(tree::get(&inner.root, path).cloned())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        let mut inner = self.lock();
        if inner.failing_writes.contains(path.trim_matches('/')) {
            return Err(StoreError::Injected(path.to_string()).into());
        }
        inner.writes.push((path.to_string(), fields.clone()));
        let resolved = match inner.resolve_sentinels(Value::Object(fields)) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        tree::merge(&mut inner.root, path, resolved);
        inner.publish();
        Ok(())
    }
}
