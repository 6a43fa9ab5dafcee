//! In-memory document store.

use crate::backend::{CollectionOptions, Document, DocumentStore, ID_FIELD};
use crate::error::{StorageError, StorageResult};
use crate::filter::{values_at, Filter, Page};
use crate::id::DocumentId;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Default)]
struct CollectionState {
    options: CollectionOptions,
    documents: Vec<Document>,
}

impl CollectionState {
    fn purge_expired(&mut self, now: u64) {
        if let Some(field) = self.options.expires_field.clone() {
            self.documents.retain(|doc| !is_expired(doc, &field, now));
        }
    }

    fn visible<'a>(&'a self, filter: &'a Filter, now: u64) -> impl Iterator<Item = &'a Document> {
        let expires = self.options.expires_field.as_deref();
        self.documents.iter().filter(move |doc| {
            !expires.is_some_and(|field| is_expired(doc, field, now)) && filter.matches(doc)
        })
    }

    /// Returns the first unique-field collision between `doc` and the stored
    /// documents, ignoring the document at `skip`.
    fn collision(&self, doc: &Document, skip: Option<usize>) -> Option<(String, Value)> {
        let unique = self.options.unique.iter().map(String::as_str);
        let fields = std::iter::once(ID_FIELD).chain(unique);
        for field in fields {
            for value in values_at(doc, field) {
                if value.is_null() {
                    continue;
                }
                let taken = self
                    .documents
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| Some(*i) != skip)
                    .any(|(_, other)| values_at(other, field).contains(&value));
                if taken {
                    return Some((field.to_string(), value.clone()));
                }
            }
        }
        None
    }
}

fn is_expired(doc: &Document, field: &str, now: u64) -> bool {
    doc.get(field)
        .and_then(Value::as_u64)
        .is_some_and(|expires| expires <= now)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn duplicate(collection: &str, field: String, value: &Value) -> StorageError {
    StorageError::Duplicate {
        collection: collection.to_string(),
        field,
        value: value.to_string(),
    }
}

/// An in-memory document store.
///
/// This store keeps every collection in memory and is suitable for:
/// - Unit and integration tests
/// - Embedding SIS without an external database
///
/// Every successful insert, update or delete bumps a write counter, which
/// lets tests assert that a rejected operation never reached the store.
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across tasks.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, CollectionState>>,
    writes: AtomicU64,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of successful document writes so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns a copy of every visible document in a collection.
    ///
    /// Useful for testing and debugging.
    pub fn snapshot(&self, collection: &str) -> Vec<Document> {
        let collections = self.collections.read();
        let filter = Filter::new();
        collections
            .get(collection)
            .map(|state| state.visible(&filter, now_millis()).cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the names of every known collection, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn bump(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn create_collection(&self, name: &str, options: CollectionOptions) -> StorageResult<()> {
        let mut collections = self.collections.write();
        let state = collections.entry(name.to_string()).or_default();
        let previous = std::mem::replace(&mut state.options, options);

        // Existing documents must already satisfy the new unique fields.
        let violation = state
            .documents
            .iter()
            .enumerate()
            .find_map(|(i, doc)| state.collision(doc, Some(i)));
        match violation {
            Some((field, value)) => {
                state.options = previous;
                Err(duplicate(name, field, &value))
            }
            None => Ok(()),
        }
    }

    async fn drop_collection(&self, name: &str) -> StorageResult<()> {
        if self.collections.write().remove(name).is_some() {
            self.bump();
        }
        Ok(())
    }

    async fn insert(&self, collection: &str, mut document: Document) -> StorageResult<Document> {
        let mut collections = self.collections.write();
        let state = collections.entry(collection.to_string()).or_default();
        state.purge_expired(now_millis());

        if !document.contains_key(ID_FIELD) {
            document.insert(ID_FIELD.into(), Value::String(DocumentId::new().to_string()));
        }
        if let Some((field, value)) = state.collision(&document, None) {
            return Err(duplicate(collection, field, &value));
        }

        state.documents.push(document.clone());
        self.bump();
        Ok(document)
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        page: Page,
    ) -> StorageResult<Vec<Document>> {
        let collections = self.collections.read();
        let Some(state) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let matches = state.visible(filter, now_millis()).skip(page.offset);
        Ok(match page.limit {
            Some(limit) => matches.take(limit).cloned().collect(),
            None => matches.cloned().collect(),
        })
    }

    async fn count(&self, collection: &str, filter: &Filter) -> StorageResult<u64> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map_or(0, |state| state.visible(filter, now_millis()).count() as u64))
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        mut document: Document,
    ) -> StorageResult<Option<Document>> {
        let mut collections = self.collections.write();
        let Some(state) = collections.get_mut(collection) else {
            return Ok(None);
        };
        state.purge_expired(now_millis());

        let Some(index) = state.documents.iter().position(|doc| filter.matches(doc)) else {
            return Ok(None);
        };
        match state.documents[index].get(ID_FIELD).cloned() {
            Some(id) => document.insert(ID_FIELD.into(), id),
            None => document.remove(ID_FIELD),
        };
        if let Some((field, value)) = state.collision(&document, Some(index)) {
            return Err(duplicate(collection, field, &value));
        }

        state.documents[index] = document.clone();
        self.bump();
        Ok(Some(document))
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> StorageResult<u64> {
        let mut collections = self.collections.write();
        let Some(state) = collections.get_mut(collection) else {
            return Ok(0);
        };
        state.purge_expired(now_millis());

        let before = state.documents.len();
        state.documents.retain(|doc| !filter.matches(doc));
        let removed = (before - state.documents.len()) as u64;
        if removed > 0 {
            self.bump();
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn memory_insert_assigns_id() {
        let store = InMemoryStore::new();
        let saved = store.insert("things", doc(json!({ "name": "foo" }))).await.unwrap();
        let id = saved.get(ID_FIELD).and_then(Value::as_str).unwrap();
        assert!(DocumentId::parse(id).is_ok());
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn memory_find_in_insertion_order() {
        let store = InMemoryStore::new();
        for name in ["a", "b", "c"] {
            store.insert("things", doc(json!({ "name": name }))).await.unwrap();
        }
        let all = store.find("things", &Filter::new(), Page::all()).await.unwrap();
        let names: Vec<_> = all.iter().map(|d| d["name"].as_str().unwrap()).collect();
        assert_eq!(names, ["a", "b", "c"]);

        let page = store.find("things", &Filter::new(), Page::new(1, 1)).await.unwrap();
        assert_eq!(page[0]["name"], "b");
    }

    #[tokio::test]
    async fn memory_unknown_collection_is_empty() {
        let store = InMemoryStore::new();
        assert!(store.find("nope", &Filter::new(), Page::all()).await.unwrap().is_empty());
        assert_eq!(store.count("nope", &Filter::new()).await.unwrap(), 0);
        assert_eq!(store.delete("nope", &Filter::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn memory_unique_violation_on_insert() {
        let store = InMemoryStore::new();
        store
            .create_collection("things", CollectionOptions::new().unique("name"))
            .await
            .unwrap();
        store.insert("things", doc(json!({ "name": "foo" }))).await.unwrap();
        let err = store.insert("things", doc(json!({ "name": "foo" }))).await.unwrap_err();
        assert!(matches!(err, StorageError::Duplicate { ref field, .. } if field == "name"));
        assert_eq!(store.snapshot("things").len(), 1);
    }

    #[tokio::test]
    async fn memory_unique_violation_on_update() {
        let store = InMemoryStore::new();
        store
            .create_collection("things", CollectionOptions::new().unique("name"))
            .await
            .unwrap();
        store.insert("things", doc(json!({ "name": "foo" }))).await.unwrap();
        store.insert("things", doc(json!({ "name": "bar" }))).await.unwrap();

        let err = store
            .update_one("things", &Filter::new().eq("name", "bar"), doc(json!({ "name": "foo" })))
            .await
            .unwrap_err();
        assert!(err.is_constraint_violation());

        // Updating a document to its own value is fine.
        let same = store
            .update_one(
                "things",
                &Filter::new().eq("name", "bar"),
                doc(json!({ "name": "bar", "x": 1 })),
            )
            .await
            .unwrap();
        assert!(same.is_some());
    }

    #[tokio::test]
    async fn memory_update_preserves_id() {
        let store = InMemoryStore::new();
        let saved = store.insert("things", doc(json!({ "name": "foo" }))).await.unwrap();
        let id = saved[ID_FIELD].clone();

        let updated = store
            .update_one(
                "things",
                &Filter::new().eq(ID_FIELD, id.clone()),
                doc(json!({ "_id": "something-else", "name": "baz" })),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated[ID_FIELD], id);
        assert_eq!(updated["name"], "baz");
    }

    #[tokio::test]
    async fn memory_update_no_match() {
        let store = InMemoryStore::new();
        store.insert("things", doc(json!({ "name": "foo" }))).await.unwrap();
        let writes = store.writes();
        let result = store
            .update_one("things", &Filter::new().eq("name", "nope"), doc(json!({})))
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn memory_delete_by_filter() {
        let store = InMemoryStore::new();
        for (name, kind) in [("a", 1), ("b", 2), ("c", 1)] {
            store
                .insert("things", doc(json!({ "name": name, "kind": kind })))
                .await
                .unwrap();
        }
        let removed = store.delete("things", &Filter::new().eq("kind", 1)).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count("things", &Filter::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn memory_expired_documents_are_invisible() {
        let store = InMemoryStore::new();
        store
            .create_collection("tokens", CollectionOptions::new().expires("expires"))
            .await
            .unwrap();
        let past = now_millis() - 1_000;
        let future = now_millis() + 60_000;
        store
            .insert("tokens", doc(json!({ "name": "old", "expires": past })))
            .await
            .unwrap();
        store
            .insert("tokens", doc(json!({ "name": "new", "expires": future })))
            .await
            .unwrap();

        let visible = store.find("tokens", &Filter::new(), Page::all()).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0]["name"], "new");
    }

    #[tokio::test]
    async fn memory_create_collection_rejects_existing_duplicates() {
        let store = InMemoryStore::new();
        store.insert("things", doc(json!({ "name": "foo" }))).await.unwrap();
        store.insert("things", doc(json!({ "name": "foo" }))).await.unwrap();
        let result = store
            .create_collection("things", CollectionOptions::new().unique("name"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn memory_drop_collection() {
        let store = InMemoryStore::new();
        store.insert("things", doc(json!({ "name": "foo" }))).await.unwrap();
        store.drop_collection("things").await.unwrap();
        assert!(store.collection_names().is_empty());
        assert!(store.snapshot("things").is_empty());
    }
}
