//! Helpers for a JSON tree addressed by slash-separated paths, with the
//! store's semantics: writing `null` deletes, and empty objects vanish.
use serde_json::{Map, Value};

pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = root;
    for seg in segments(path) {
        node = node.as_object()?.get(seg)?;
    }
    (!node.is_null()).then_some(node)
}

/// Replace the value at `path` (a stream `put`).
pub fn set(root: &mut Value, path: &str, data: Value) {
    let segs: Vec<&str> = segments(path).collect();
    set_at(root, &segs, data);
}

/// Merge `data`'s children into `path` (a stream `patch` or partial update).
pub fn merge(root: &mut Value, path: &str, data: Map<String, Value>) {
    for (key, value) in data {
        let target = format!("{}/{}", path.trim_end_matches('/'), key);
        set(root, &target, value);
    }
}

fn set_at(node: &mut Value, segs: &[&str], data: Value) {
    let Some((head, rest)) = segs.split_first() else {
        *node = prune(data);
        return;
    };
    if !node.is_object() {
        if data.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Some(map) = node.as_object_mut() else {
        return;
    };
    let child = map.entry(head.to_string()).or_insert(Value::Null);
    set_at(child, rest, data);
    if child.is_null() {
        map.remove(*head);
    }
    if map.is_empty() {
        *node = Value::Null;
    }
}

fn prune(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, prune(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if map.is_empty() {
                Value::Null
            } else {
                Value::Object(map)
            }
        }
        other => other,
    }
}
