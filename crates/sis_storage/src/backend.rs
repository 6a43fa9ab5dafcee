//! Document store trait definition.

use crate::error::StorageResult;
use crate::filter::{Filter, Page};
use async_trait::async_trait;

/// A stored document: a JSON object keyed by field name.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Field holding the store-assigned document id.
pub const ID_FIELD: &str = "_id";

/// Per-collection options enforced by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionOptions {
    /// Dotted field paths whose values must be unique within the collection.
    /// `_id` is always unique and need not be listed.
    pub unique: Vec<String>,
    /// Field holding an expiry timestamp (milliseconds since the Unix epoch).
    /// Documents whose expiry lies in the past are no longer visible.
    pub expires_field: Option<String>,
}

impl CollectionOptions {
    /// Creates options with no constraints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a unique field.
    #[must_use]
    pub fn unique(mut self, field: impl Into<String>) -> Self {
        self.unique.push(field.into());
        self
    }

    /// Sets the expiry field.
    #[must_use]
    pub fn expires(mut self, field: impl Into<String>) -> Self {
        self.expires_field = Some(field.into());
        self
    }
}

/// A document store backing SIS collections.
///
/// Stores are **schema-agnostic**. They offer CRUD by filter, a uniqueness
/// constraint on declared fields, and timestamp based expiry. SIS owns all
/// validation, authorization and reference checking.
///
/// # Invariants
///
/// - `insert` assigns `_id` when the document has none and returns the
///   stored document
/// - a write that violates a unique field fails with
///   [`crate::StorageError::Duplicate`] and leaves the collection unchanged
/// - a collection that was never created behaves as an empty collection
///   with no constraints
/// - stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing and embedding
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Creates a collection, or replaces the options of an existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot apply the options, including
    /// when existing documents already violate a new unique field.
    async fn create_collection(&self, name: &str, options: CollectionOptions) -> StorageResult<()>;

    /// Drops a collection and every document in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn drop_collection(&self, name: &str) -> StorageResult<()>;

    /// Inserts a document and returns it as stored.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Duplicate`] on a unique field collision.
    async fn insert(&self, collection: &str, document: Document) -> StorageResult<Document>;

    /// Returns the documents matching `filter`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        page: Page,
    ) -> StorageResult<Vec<Document>>;

    /// Returns the first document matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn find_one(&self, collection: &str, filter: &Filter) -> StorageResult<Option<Document>> {
        Ok(self
            .find(collection, filter, Page::new(0, 1))
            .await?
            .into_iter()
            .next())
    }

    /// Counts the documents matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn count(&self, collection: &str, filter: &Filter) -> StorageResult<u64>;

    /// Replaces the first document matching `filter`.
    ///
    /// The stored `_id` is preserved. Returns the stored document, or `None`
    /// if nothing matched.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Duplicate`] on a unique field collision.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        document: Document,
    ) -> StorageResult<Option<Document>>;

    /// Deletes every document matching `filter` and returns how many were
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn delete(&self, collection: &str, filter: &Filter) -> StorageResult<u64>;
}
