//! Commit records and the commit log.

use crate::error::{SisError, SisResult};
use crate::fields::{ID_FIELD, SCHEMA_COMMITS};
use crate::history::diff::diff_objects;
use crate::types::Event;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sis_storage::{Document, DocumentStore, Filter, Page};
use std::sync::Arc;

/// An immutable audit record of one mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Collection of the mutated document.
    #[serde(rename = "type")]
    pub kind: String,
    /// Value of the collection's id field (`_id` or `name`).
    pub entity_id: String,
    /// Store id of the document.
    pub entity_oid: String,
    /// Kind of mutation.
    pub action: Event,
    /// The new document on insert, the delta on update, the removed
    /// document on delete.
    #[serde(default)]
    pub commit_data: Value,
    /// Milliseconds since the Unix epoch.
    pub date_modified: u64,
    /// Acting user.
    #[serde(default)]
    pub modified_by: Option<String>,
}

impl CommitRecord {
    /// Builds the record of a mutation.
    ///
    /// `before` is absent on insert and `after` is absent on delete.
    pub fn of(
        kind: &str,
        id_field: &str,
        action: Event,
        before: Option<&Document>,
        after: Option<&Document>,
        actor: Option<&str>,
        now: u64,
    ) -> Self {
        let subject = after.or(before);
        let field = |name: &str| {
            subject
                .and_then(|doc| doc.get(name))
                .map(|value| match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default()
        };
        let commit_data = match (before, after) {
            (Some(before), Some(after)) => diff_objects(before, after)
                .map(Value::Object)
                .unwrap_or(Value::Null),
            (None, Some(doc)) | (Some(doc), None) => Value::Object(doc.clone()),
            (None, None) => Value::Null,
        };
        Self {
            kind: kind.to_string(),
            entity_id: field(id_field),
            entity_oid: field(ID_FIELD),
            action,
            commit_data,
            date_modified: now,
            modified_by: actor.map(str::to_string),
        }
    }
}

/// Consumer of commit records.
///
/// Appends happen only after the mutation was persisted and are never
/// retried; a failed append does not undo the mutation.
#[async_trait]
pub trait CommitLogger: Send + Sync {
    /// Appends a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be written.
    async fn append(&self, record: CommitRecord) -> SisResult<()>;

    /// Returns the records of one document, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    async fn history(&self, kind: &str, entity_id: &str) -> SisResult<Vec<CommitRecord>>;
}

/// Commit log kept in the `sis_commits` collection of a document store.
pub struct StoreCommitLogger {
    store: Arc<dyn DocumentStore>,
}

impl StoreCommitLogger {
    /// Creates a logger writing to `store`.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CommitLogger for StoreCommitLogger {
    async fn append(&self, record: CommitRecord) -> SisResult<()> {
        let doc = match serde_json::to_value(&record) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(SisError::internal(format!(
                    "commit record encoded as {other}"
                )))
            }
            Err(e) => return Err(SisError::internal(e)),
        };
        self.store.insert(SCHEMA_COMMITS, doc).await?;
        Ok(())
    }

    async fn history(&self, kind: &str, entity_id: &str) -> SisResult<Vec<CommitRecord>> {
        let filter = Filter::new().eq("type", kind).eq("entity_id", entity_id);
        let docs = self.store.find(SCHEMA_COMMITS, &filter, Page::all()).await?;
        let mut records = docs
            .into_iter()
            .map(|doc| serde_json::from_value(Value::Object(doc)).map_err(SisError::internal))
            .collect::<SisResult<Vec<CommitRecord>>>()?;
        records.sort_by_key(|r| r.date_modified);
        Ok(records)
    }
}

impl std::fmt::Debug for StoreCommitLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCommitLogger").finish_non_exhaustive()
    }
}
