//! In-memory JSON document addressed by key paths
//!
//! Shared by the in-process store and the session server. Writes replace
//! whole subtrees; `null` and empty objects are never stored, so removing the
//! last child of a node removes the node too.

use serde_json::{Map, Value};

use crate::paths::StorePath;

#[derive(Debug, Clone, Default)]
pub struct Document {
    root: Value,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value at `path`, `null` if absent
    pub fn get(&self, path: &StorePath) -> Value {
        let mut node = &self.root;
        for segment in path.segments() {
            match node.get(segment) {
                Some(child) => node = child,
                None => return Value::Null,
            }
        }
        node.clone()
    }

    /// Replace the value at `path`. Writing `null` removes it.
    pub fn set(&mut self, path: &StorePath, value: Value) {
        let value = normalize(value);
        if value.is_null() {
            self.remove(path);
            return;
        }
        set_at(&mut self.root, path.segments(), value);
    }

    /// Delete the value at `path` and everything beneath it
    pub fn remove(&mut self, path: &StorePath) {
        remove_at(&mut self.root, path.segments());
    }

    pub fn root(&self) -> &Value {
        &self.root
    }
}

fn set_at(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.clone()).or_insert(Value::Null);
        set_at(child, rest, value);
    }
}

fn remove_at(node: &mut Value, segments: &[String]) {
    let Some((head, rest)) = segments.split_first() else {
        *node = Value::Null;
        return;
    };
    let Value::Object(map) = node else {
        return;
    };
    if rest.is_empty() {
        map.remove(head);
    } else if let Some(child) = map.get_mut(head) {
        remove_at(child, rest);
        if is_empty(child) {
            map.remove(head);
        }
    }
    if map.is_empty() {
        *node = Value::Null;
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Strip `null` members and empty objects
fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !is_empty(v))
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
