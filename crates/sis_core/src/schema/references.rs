//! Reference extraction.
//!
//! Walks a compiled model depth-first, in declaration order, and lists every
//! field that holds the id of a document in another schema. The order of the
//! returned descriptors is the order in which reference checks are issued
//! and reported.

use crate::error::{SisError, SisResult};
use crate::schema::model::{CompiledModel, FieldKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sis_storage::{values_at, Document};
use std::sync::Arc;

/// How a reference is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// A single id.
    Single,
    /// An array of ids.
    Array,
    /// A reference field inside the elements of a sub-document array.
    NestedArray,
}

/// One reference path in a compiled model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDescriptor {
    /// Dotted path of the reference field, from the document root.
    pub path: String,
    /// Storage shape of the reference.
    pub kind: ReferenceKind,
    /// Name of the referenced schema.
    pub target: String,
    /// For [`ReferenceKind::NestedArray`]: the path of the innermost
    /// sub-document array whose elements hold the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

impl ReferenceDescriptor {
    /// Returns every id stored under this descriptor in `doc`.
    ///
    /// Array values are flattened and `null` values skipped, so each
    /// returned value is one referenced id.
    pub fn values<'a>(&self, doc: &'a Document) -> Vec<&'a Value> {
        let mut out = Vec::new();
        for value in values_at(doc, &self.path) {
            match value {
                Value::Array(items) => out.extend(items.iter().filter(|v| !v.is_null())),
                Value::Null => {}
                other => out.push(other),
            }
        }
        out
    }

    /// Visits every slot holding a reference under this descriptor.
    ///
    /// The callback may rewrite a slot in place. Returning
    /// [`SlotAction::Remove`] deletes the slot: a single field is removed
    /// from its object and an array element is dropped from its array.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by the callback.
    pub fn for_each_slot_mut<F>(&self, doc: &mut Document, f: &mut F) -> SisResult<()>
    where
        F: FnMut(&mut Value) -> SisResult<SlotAction>,
    {
        let segments: Vec<&str> = self.path.split('.').collect();
        walk_slots(doc, &segments, f)
    }
}

/// What to do with a visited reference slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAction {
    /// Keep the (possibly rewritten) value.
    Keep,
    /// Remove the value.
    Remove,
}

fn walk_slots<F>(map: &mut Document, segments: &[&str], f: &mut F) -> SisResult<()>
where
    F: FnMut(&mut Value) -> SisResult<SlotAction>,
{
    let Some((head, rest)) = segments.split_first() else {
        return Ok(());
    };

    if rest.is_empty() {
        let remove = match map.get_mut(*head) {
            None | Some(Value::Null) => false,
            Some(Value::Array(items)) => {
                let mut kept = Vec::with_capacity(items.len());
                for mut item in items.drain(..) {
                    if item.is_null() || f(&mut item)? == SlotAction::Keep {
                        kept.push(item);
                    }
                }
                *items = kept;
                false
            }
            Some(value) => f(value)? == SlotAction::Remove,
        };
        if remove {
            map.remove(*head);
        }
        return Ok(());
    }

    match map.get_mut(*head) {
        Some(Value::Object(inner)) => walk_slots(inner, rest, f),
        Some(Value::Array(items)) => {
            for item in items {
                if let Value::Object(inner) = item {
                    walk_slots(inner, rest, f)?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Extracts the reference descriptors of a compiled model.
///
/// Recursion is bounded by `max_depth` and by the set of models on the
/// current walk, so a model reachable from itself is reported instead of
/// looping.
///
/// # Errors
///
/// Returns `BadRequest` if the model nests deeper than `max_depth` or
/// contains itself.
pub fn extract_references(
    model: &CompiledModel,
    max_depth: usize,
) -> SisResult<Vec<ReferenceDescriptor>> {
    let mut extractor = Extractor {
        max_depth,
        visiting: Vec::new(),
    };
    extractor.walk(model, "", 0)
}

struct Extractor {
    max_depth: usize,
    visiting: Vec<Arc<CompiledModel>>,
}

impl Extractor {
    fn walk(
        &mut self,
        model: &CompiledModel,
        prefix: &str,
        depth: usize,
    ) -> SisResult<Vec<ReferenceDescriptor>> {
        if depth > self.max_depth {
            return Err(SisError::bad_request(format!(
                "references at {prefix} exceed the maximum depth of {}",
                self.max_depth
            )));
        }

        let mut out = Vec::new();
        for (name, spec) in model.fields() {
            let path = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}.{name}")
            };
            match &spec.kind {
                FieldKind::Reference { target } => {
                    out.push(descriptor(path, ReferenceKind::Single, target, None));
                }
                FieldKind::Array(element) => {
                    if let Some(target) = element.reference_target() {
                        out.push(descriptor(path, ReferenceKind::Array, target, None));
                    }
                }
                FieldKind::Embedded(sub) => {
                    out.extend(self.descend(sub, &path, &path, depth)?);
                }
                FieldKind::DocumentArray(sub) => {
                    for inner in self.descend(sub, "", &path, depth)? {
                        out.push(requalify(&path, inner));
                    }
                }
                FieldKind::Primitive(_) | FieldKind::Mixed => {}
            }
        }
        Ok(out)
    }

    /// Walks a sub-model unless it is already on the current walk.
    fn descend(
        &mut self,
        sub: &Arc<CompiledModel>,
        prefix: &str,
        path: &str,
        depth: usize,
    ) -> SisResult<Vec<ReferenceDescriptor>> {
        if self.visiting.iter().any(|m| Arc::ptr_eq(m, sub)) {
            return Err(SisError::bad_request(format!(
                "definition contains a cycle at {path}"
            )));
        }
        self.visiting.push(Arc::clone(sub));
        let found = self.walk(sub, prefix, depth + 1);
        self.visiting.pop();
        found
    }
}

fn descriptor(
    path: String,
    kind: ReferenceKind,
    target: &str,
    container: Option<String>,
) -> ReferenceDescriptor {
    ReferenceDescriptor {
        path,
        kind,
        target: target.to_string(),
        container,
    }
}

/// Prefixes a descriptor found inside the elements of the array at `array`.
fn requalify(array: &str, inner: ReferenceDescriptor) -> ReferenceDescriptor {
    let container = match inner.container {
        Some(nested) => format!("{array}.{nested}"),
        None => array.to_string(),
    };
    descriptor(
        format!("{array}.{}", inner.path),
        ReferenceKind::NestedArray,
        &inner.target,
        Some(container),
    )
}
