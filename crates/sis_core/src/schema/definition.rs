//! The schema document as stored in `sis_schemas`.

use crate::error::{SisError, SisResult};
use crate::meta;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sis_storage::Document;

/// A runtime-defined collection type.
///
/// Owner groups are not a top-level field: like every other document they
/// live in the `_sis.owner` metadata block, and are lifted into
/// [`Schema::owner`] when the schema is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Unique schema name, also the name of its entity collection.
    pub name: String,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declarative field-type tree.
    pub definition: Value,
    /// Fields that may never be removed from the definition.
    #[serde(default)]
    pub locked_fields: Vec<String>,
    /// Whether mutations of entities are recorded in the commit log.
    #[serde(default = "default_true")]
    pub track_history: bool,
    /// Any authenticated user may create entities; only their creator may
    /// change them. The schema itself is managed by its creator.
    #[serde(default)]
    pub is_open: bool,
    /// Any authenticated user may create entities; only their creator may
    /// change them.
    #[serde(default)]
    pub is_public: bool,
    /// Whether a member of some (not all) owner groups may modify entities
    /// that carry their own owner list.
    #[serde(default = "default_true")]
    pub any_owner_can_modify: bool,
    /// Locked schemas cannot be deleted.
    #[serde(default)]
    pub sis_locked: bool,
    /// Owner groups (`_sis.owner`).
    #[serde(skip)]
    pub owner: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Schema {
    /// Creates a closed schema with the given owners.
    pub fn new(name: impl Into<String>, owner: Vec<String>, definition: Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            definition,
            locked_fields: Vec::new(),
            track_history: true,
            is_open: false,
            is_public: false,
            any_owner_can_modify: true,
            sis_locked: false,
            owner,
        }
    }

    /// Reads a schema from its stored (or validated) document.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if a declared flag has the wrong type.
    pub fn from_document(doc: &Document) -> SisResult<Self> {
        let mut schema: Schema = serde_json::from_value(Value::Object(doc.clone()))
            .map_err(|e| SisError::bad_request(format!("invalid schema: {e}")))?;
        schema.owner = meta::owners(doc).unwrap_or_default();
        Ok(schema)
    }

    /// Renders the schema as a document suitable for `add`.
    pub fn to_document(&self) -> Document {
        let mut doc = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Document::new(),
        };
        meta::set_owners(&mut doc, &self.owner);
        doc
    }

    /// Returns true if anyone may create entities in this schema.
    pub fn is_open_to_all(&self) -> bool {
        self.is_open || self.is_public
    }
}
