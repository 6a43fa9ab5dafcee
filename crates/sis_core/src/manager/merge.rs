//! Field-by-field merge of partial updates.

use crate::meta;
use crate::schema::{CompiledModel, FieldKind};
use serde_json::{Map, Value};
use sis_storage::Document;

/// Merges `partial` into a copy of `stored`.
///
/// Only fields the model declares are applied; others are ignored. A `null`
/// removes the field. Embedded objects merge recursively, everything else
/// (arrays included) is replaced. The mutable meta fields of `_sis` are
/// merged the same way.
pub fn apply_update(model: &CompiledModel, stored: &Document, partial: &Document) -> Document {
    let mut merged = stored.clone();
    merge_fields(model, &mut merged, partial);
    meta::merge_meta(&mut merged, partial);
    merged
}

fn merge_fields(
    model: &CompiledModel,
    target: &mut Map<String, Value>,
    partial: &Map<String, Value>,
) {
    for (key, value) in partial {
        let Some(spec) = model.field(key) else {
            continue;
        };
        if value.is_null() {
            target.remove(key);
            continue;
        }
        if let FieldKind::Embedded(sub) = &spec.kind {
            if let (Some(Value::Object(existing)), Value::Object(incoming)) =
                (target.get_mut(key), value)
            {
                merge_fields(sub, existing, incoming);
                continue;
            }
        }
        target.insert(key.clone(), value.clone());
    }
}
