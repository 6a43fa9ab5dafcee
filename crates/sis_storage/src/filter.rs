//! Query filters and paging.

use crate::backend::{Document, ID_FIELD};
use crate::id::DocumentId;
use serde_json::Value;

/// A conjunction of equality conditions over dotted field paths.
///
/// A condition on a path that crosses an array is checked against every
/// element, and a condition on an array-valued field matches when the array
/// contains the expected value. An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// Creates an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a filter matching the document with the given id.
    #[must_use]
    pub fn by_id(id: &DocumentId) -> Self {
        Self::new().eq(ID_FIELD, id.to_string())
    }

    /// Builds a filter from a flat field → value map.
    #[must_use]
    pub fn from_document(doc: &Document) -> Self {
        Self {
            conditions: doc.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    /// Adds an equality condition.
    #[must_use]
    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((path.into(), value.into()));
        self
    }

    /// Returns true if the filter has no conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Returns the conditions in insertion order.
    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    /// Checks whether a document satisfies every condition.
    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|(path, expected)| {
            values_at(doc, path).into_iter().any(|actual| {
                actual == expected
                    || matches!(actual, Value::Array(items) if items.contains(expected))
            })
        })
    }
}

/// Collects every value reachable at a dotted path, descending into arrays.
pub fn values_at<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some((head, rest)) = segments.split_first() {
        if let Some(value) = doc.get(*head) {
            collect(value, rest, &mut out);
        }
    }
    out
}

fn collect<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    match segments.split_first() {
        None => out.push(value),
        Some((head, rest)) => match value {
            Value::Object(map) => {
                if let Some(next) = map.get(*head) {
                    collect(next, rest, out);
                }
            }
            Value::Array(items) => {
                for item in items {
                    collect(item, segments, out);
                }
            }
            _ => {}
        },
    }
}

/// Offset/limit window over a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    /// Number of matching documents to skip.
    pub offset: usize,
    /// Maximum number of documents to return (`None` = unbounded).
    pub limit: Option<usize>,
}

impl Page {
    /// A page covering every result.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            offset: 0,
            limit: None,
        }
    }

    /// A page with explicit offset and limit.
    #[must_use]
    pub const fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    /// Clamps the limit to at most `max`.
    #[must_use]
    pub fn clamp(self, max: usize) -> Self {
        Self {
            offset: self.offset,
            limit: Some(self.limit.map_or(max, |l| l.min(max))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(Filter::new().matches(&doc(json!({ "a": 1 }))));
    }

    #[test]
    fn top_level_equality() {
        let d = doc(json!({ "name": "foo", "n": 3 }));
        assert!(Filter::new().eq("name", "foo").matches(&d));
        assert!(!Filter::new().eq("name", "bar").matches(&d));
        assert!(Filter::new().eq("name", "foo").eq("n", 3).matches(&d));
        assert!(!Filter::new().eq("name", "foo").eq("n", 4).matches(&d));
    }

    #[test]
    fn nested_path_equality() {
        let d = doc(json!({ "_sis": { "owner": ["g1", "g2"] } }));
        assert!(Filter::new().eq("_sis.owner", "g2").matches(&d));
        assert!(!Filter::new().eq("_sis.owner", "g3").matches(&d));
    }

    #[test]
    fn array_contains() {
        let d = doc(json!({ "events": ["insert", "delete"] }));
        assert!(Filter::new().eq("events", "delete").matches(&d));
        assert!(!Filter::new().eq("events", "update").matches(&d));
    }

    #[test]
    fn path_through_document_array() {
        let d = doc(json!({ "items": [{ "ref": "a" }, { "ref": "b" }] }));
        assert!(Filter::new().eq("items.ref", "b").matches(&d));
        assert_eq!(values_at(&d, "items.ref").len(), 2);
    }

    #[test]
    fn missing_path_does_not_match() {
        let d = doc(json!({ "a": 1 }));
        assert!(!Filter::new().eq("b", 1).matches(&d));
        assert!(values_at(&d, "a.b").is_empty());
    }

    #[test]
    fn page_clamp() {
        assert_eq!(Page::all().clamp(10).limit, Some(10));
        assert_eq!(Page::new(5, 50).clamp(10), Page::new(5, 10));
        assert_eq!(Page::new(0, 3).clamp(10).limit, Some(3));
    }
}
