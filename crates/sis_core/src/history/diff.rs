//! Structural deltas between two documents.
//!
//! The delta format follows jsondiffpatch for objects:
//!
//! - added: `[new]`
//! - changed: `[old, new]`
//! - removed: `[old, 0, 0]`
//! - nested objects: an object of deltas
//!
//! Arrays and scalars are compared as whole values.

use serde_json::{Map, Value};

/// Computes the delta turning `old` into `new`, or `None` if they are equal.
pub fn diff(old: &Value, new: &Value) -> Option<Value> {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => diff_objects(old, new).map(Value::Object),
        _ if old == new => None,
        _ => Some(Value::Array(vec![old.clone(), new.clone()])),
    }
}

/// Computes the delta between two objects.
pub fn diff_objects(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
) -> Option<Map<String, Value>> {
    let mut delta = Map::new();
    for (key, before) in old {
        match new.get(key) {
            None => {
                delta.insert(
                    key.clone(),
                    Value::Array(vec![before.clone(), Value::from(0), Value::from(0)]),
                );
            }
            Some(after) => {
                if let Some(change) = diff(before, after) {
                    delta.insert(key.clone(), change);
                }
            }
        }
    }
    for (key, after) in new {
        if !old.contains_key(key) {
            delta.insert(key.clone(), Value::Array(vec![after.clone()]));
        }
    }
    if delta.is_empty() {
        None
    } else {
        Some(delta)
    }
}
