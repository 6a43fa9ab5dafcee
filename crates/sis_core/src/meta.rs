//! The `_sis` metadata block and the top-level version tag.
//!
//! Callers may only write the mutable meta fields (`owner`, `tags`,
//! `locked`, `immutable`); timestamps, actors and versions are stamped by the
//! manager pipeline.

use crate::error::{SisError, SisResult};
use crate::fields::{
    is_reserved, CURRENT_VERSION, IMMUTABLE, LOCKED, META_CREATED_AT, META_CREATED_BY,
    META_FIELD, META_UPDATED_AT, META_UPDATED_BY, META_VERSION, MUTABLE_META_FIELDS, OWNER, TAGS,
    VERSION_FIELD,
};
use crate::types::Event;
use serde_json::{Map, Value};
use sis_storage::Document;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Returns the metadata block, if present.
pub fn meta(doc: &Document) -> Option<&Map<String, Value>> {
    doc.get(META_FIELD).and_then(Value::as_object)
}

fn with_meta<R>(doc: &mut Document, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
    let mut block = match doc.remove(META_FIELD) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let out = f(&mut block);
    doc.insert(META_FIELD.to_string(), Value::Object(block));
    out
}

/// Returns the owner groups (`_sis.owner`), if declared.
pub fn owners(doc: &Document) -> Option<Vec<String>> {
    let list = meta(doc)?.get(OWNER)?.as_array()?;
    Some(
        list.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}

/// Returns the declared owner groups, or `None` when absent or empty.
pub fn explicit_owners(doc: &Document) -> Option<Vec<String>> {
    owners(doc).filter(|o| !o.is_empty())
}

/// Sets `_sis.owner`.
pub fn set_owners(doc: &mut Document, groups: &[String]) {
    let list = Value::Array(groups.iter().cloned().map(Value::String).collect());
    with_meta(doc, |block| block.insert(OWNER.to_string(), list));
}

/// Returns the name of the creating user.
pub fn created_by(doc: &Document) -> Option<&str> {
    meta(doc)?.get(META_CREATED_BY)?.as_str()
}

/// Returns true if the document is locked against deletion.
pub fn is_locked(doc: &Document) -> bool {
    flag(doc, LOCKED)
}

/// Returns true if the document is immutable.
pub fn is_immutable(doc: &Document) -> bool {
    flag(doc, IMMUTABLE)
}

fn flag(doc: &Document, name: &str) -> bool {
    meta(doc)
        .and_then(|m| m.get(name))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Returns the version tag (`_v`), 0 when absent.
pub fn version(doc: &Document) -> u64 {
    doc.get(VERSION_FIELD).and_then(Value::as_u64).unwrap_or(0)
}

/// Applies the reserved-field rules to caller input.
///
/// On insert any `_`-prefixed field other than `_sis`, and any non-mutable
/// key inside `_sis`, is rejected. On update the same fields are stripped.
/// Mutable meta fields must have the right types either way.
///
/// # Errors
///
/// Returns `BadRequest` naming the offending field.
pub fn sanitize_input(doc: &mut Document, event: Event) -> SisResult<()> {
    let strip = event == Event::Update;
    let reserved: Vec<String> = doc
        .keys()
        .filter(|k| is_reserved(k) && k.as_str() != META_FIELD)
        .cloned()
        .collect();
    for key in reserved {
        if !strip {
            return Err(reserved_field(&key));
        }
        doc.remove(&key);
    }

    match doc.get_mut(META_FIELD) {
        None => return Ok(()),
        Some(Value::Object(block)) => return sanitize_block(block, strip),
        Some(_) => {}
    }
    if !strip {
        return Err(SisError::bad_request(format!("{META_FIELD} must be an object")));
    }
    doc.remove(META_FIELD);
    Ok(())
}

fn sanitize_block(block: &mut Map<String, Value>, strip: bool) -> SisResult<()> {
    let fixed: Vec<String> = block
        .keys()
        .filter(|k| !MUTABLE_META_FIELDS.contains(&k.as_str()))
        .cloned()
        .collect();
    for key in fixed {
        if !strip {
            return Err(reserved_field(&format!("{META_FIELD}.{key}")));
        }
        block.remove(&key);
    }
    for (key, value) in block.iter() {
        let ok = match (key.as_str(), value) {
            (_, Value::Null) => true,
            (OWNER | TAGS, Value::Array(items)) => items.iter().all(Value::is_string),
            (LOCKED | IMMUTABLE, Value::Bool(_)) => true,
            _ => false,
        };
        if !ok {
            return Err(SisError::bad_request(format!(
                "{META_FIELD}.{key} has an invalid value {value}"
            )));
        }
    }
    Ok(())
}

fn reserved_field(name: &str) -> SisError {
    SisError::bad_request(format!("{name} is a reserved field"))
}

/// Merges the mutable meta fields of `partial` into `target`.
///
/// A `null` value removes the field.
pub fn merge_meta(target: &mut Document, partial: &Document) {
    let Some(incoming) = meta(partial) else {
        return;
    };
    let incoming = incoming.clone();
    with_meta(target, |block| {
        for (key, value) in incoming {
            if !MUTABLE_META_FIELDS.contains(&key.as_str()) {
                continue;
            }
            if value.is_null() {
                block.remove(&key);
            } else {
                block.insert(key, value);
            }
        }
    });
}

/// Stamps a new document: version 0, creation and update times and actors.
pub fn stamp_insert(doc: &mut Document, actor: Option<&str>, now: u64) {
    doc.insert(VERSION_FIELD.to_string(), Value::from(0u64));
    let actor = actor.map_or(Value::Null, Value::from);
    with_meta(doc, |block| {
        block.retain(|k, v| MUTABLE_META_FIELDS.contains(&k.as_str()) && !v.is_null());
        block.insert(META_VERSION.to_string(), Value::from(CURRENT_VERSION));
        block.insert(META_CREATED_AT.to_string(), Value::from(now));
        block.insert(META_UPDATED_AT.to_string(), Value::from(now));
        block.insert(META_CREATED_BY.to_string(), actor.clone());
        block.insert(META_UPDATED_BY.to_string(), actor);
    });
}

/// Stamps an updated document: version bump, update time and actor.
///
/// Creation fields are copied from `stored`.
pub fn stamp_update(doc: &mut Document, stored: &Document, actor: Option<&str>, now: u64) {
    doc.insert(VERSION_FIELD.to_string(), Value::from(version(stored) + 1));
    let created = meta(stored).cloned().unwrap_or_default();
    let actor = actor.map_or(Value::Null, Value::from);
    with_meta(doc, |block| {
        for key in [META_CREATED_AT, META_CREATED_BY] {
            match created.get(key) {
                Some(value) => block.insert(key.to_string(), value.clone()),
                None => block.remove(key),
            };
        }
        block.insert(META_VERSION.to_string(), Value::from(CURRENT_VERSION));
        block.insert(META_UPDATED_AT.to_string(), Value::from(now));
        block.insert(META_UPDATED_BY.to_string(), actor);
    });
}
