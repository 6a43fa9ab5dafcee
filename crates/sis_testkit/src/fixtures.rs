//! Test fixtures and registry helpers.
//!
//! Provides a registry over an in-memory store with every collaborator
//! observable, plus the users and schemas most tests start from.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use sis_core::{
    Config, DispatchError, Event, HookDispatcher, HookFiring, Registry, Role, Schema, SisResult,
    StoreCommitLogger, User,
};
use sis_storage::{
    CollectionOptions, Document, DocumentStore, Filter, InMemoryStore, Page, StorageResult,
};
use std::sync::Arc;
use std::time::Duration;

/// First canned owner group.
pub const GROUP_1: &str = "test_group1";
/// Second canned owner group.
pub const GROUP_2: &str = "test_group2";

/// Converts a JSON object literal into a [`Document`].
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// The super user.
pub fn superman() -> User {
    User::super_user("superman")
}

/// A user with the admin role in `groups`.
pub fn admin_of(name: &str, groups: &[&str]) -> User {
    groups
        .iter()
        .fold(User::new(name), |user, group| user.with_role(*group, Role::Admin))
}

/// A user with the user role in `groups`.
pub fn member_of(name: &str, groups: &[&str]) -> User {
    groups
        .iter()
        .fold(User::new(name), |user, group| user.with_role(*group, Role::User))
}

/// The canned users: `admin1` (admin of group 1), `admin2` (admin of group
/// 2), `admin3` (admin of both), `user1`, `user2`, `user3` (members of
/// group 1, group 2 and both).
pub fn canned_users() -> Vec<User> {
    vec![
        admin_of("admin1", &[GROUP_1]),
        admin_of("admin2", &[GROUP_2]),
        admin_of("admin3", &[GROUP_1, GROUP_2]),
        member_of("user1", &[GROUP_1]),
        member_of("user2", &[GROUP_2]),
        member_of("user3", &[GROUP_1, GROUP_2]),
    ]
}

/// Renders a user as a `sis_users` document.
pub fn user_document(user: &User) -> Document {
    let roles: serde_json::Map<String, Value> = user
        .roles
        .iter()
        .map(|(group, role)| (group.clone(), Value::String(role.as_str().to_string())))
        .collect();
    doc(serde_json::json!({
        "name": user.name,
        "email": format!("{}@test.dev", user.name),
        "super_user": user.super_user,
        "roles": roles,
    }))
}

/// A closed schema owned by `owners`.
pub fn schema(name: &str, owners: &[&str], definition: Value) -> Schema {
    Schema::new(
        name,
        owners.iter().map(|g| g.to_string()).collect(),
        definition,
    )
}

/// Hook dispatcher that records every firing.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    firings: Mutex<Vec<HookFiring>>,
    failing: bool,
}

impl RecordingDispatcher {
    /// Creates a dispatcher that accepts every firing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a dispatcher that records every firing and then fails it.
    pub fn failing() -> Self {
        Self {
            firings: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    /// Returns the firings seen so far.
    pub fn firings(&self) -> Vec<HookFiring> {
        self.firings.lock().clone()
    }

    /// Returns the firings of one event.
    pub fn firings_of(&self, event: Event) -> Vec<HookFiring> {
        self.firings
            .lock()
            .iter()
            .filter(|f| f.payload.event == event)
            .cloned()
            .collect()
    }

    /// Forgets every recorded firing.
    pub fn clear(&self) {
        self.firings.lock().clear();
    }
}

impl HookDispatcher for RecordingDispatcher {
    fn dispatch(&self, firing: HookFiring) -> Result<(), DispatchError> {
        let hook = firing.hook.name.clone();
        self.firings.lock().push(firing);
        if self.failing {
            return Err(DispatchError(format!("{hook} is unreachable")));
        }
        Ok(())
    }
}

/// A document store that delays every read.
///
/// Writes pass straight through. Used to push the pre-persist stages of a
/// mutation past the operation timeout.
#[derive(Debug)]
pub struct DelayedStore {
    inner: Arc<InMemoryStore>,
    delay: Duration,
}

impl DelayedStore {
    /// Wraps `inner`, delaying reads by `delay`.
    pub fn new(inner: Arc<InMemoryStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl DocumentStore for DelayedStore {
    async fn create_collection(&self, name: &str, options: CollectionOptions) -> StorageResult<()> {
        self.inner.create_collection(name, options).await
    }

    async fn drop_collection(&self, name: &str) -> StorageResult<()> {
        self.inner.drop_collection(name).await
    }

    async fn insert(&self, collection: &str, document: Document) -> StorageResult<Document> {
        self.inner.insert(collection, document).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        page: Page,
    ) -> StorageResult<Vec<Document>> {
        tokio::time::sleep(self.delay).await;
        self.inner.find(collection, filter, page).await
    }

    async fn count(&self, collection: &str, filter: &Filter) -> StorageResult<u64> {
        tokio::time::sleep(self.delay).await;
        self.inner.count(collection, filter).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        document: Document,
    ) -> StorageResult<Option<Document>> {
        self.inner.update_one(collection, filter, document).await
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> StorageResult<u64> {
        self.inner.delete(collection, filter).await
    }
}

/// A registry over an in-memory store with a recording dispatcher.
pub struct TestRegistry {
    /// The registry under test.
    pub registry: Registry,
    /// The backing store, for write counts and snapshots.
    pub store: Arc<InMemoryStore>,
    /// The hook dispatcher.
    pub hooks: Arc<RecordingDispatcher>,
}

impl TestRegistry {
    /// Opens a registry with the default configuration.
    pub async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    /// Opens a registry with `config`.
    pub async fn with_config(config: Config) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let backend: Arc<InMemoryStore> = Arc::clone(&store);
        Self::over(backend, store, config, RecordingDispatcher::new()).await
    }

    /// Opens a registry whose hook dispatcher fails every firing.
    pub async fn with_failing_hooks(config: Config) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let backend: Arc<InMemoryStore> = Arc::clone(&store);
        Self::over(backend, store, config, RecordingDispatcher::failing()).await
    }

    /// Opens a registry whose reads are delayed by `delay`.
    pub async fn delayed(config: Config, delay: Duration) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let delayed = Arc::new(DelayedStore::new(Arc::clone(&store), delay));
        Self::over(delayed, store, config, RecordingDispatcher::new()).await
    }

    /// Opens a registry over `backend`, observing writes through `store`.
    pub async fn over(
        backend: Arc<dyn DocumentStore>,
        store: Arc<InMemoryStore>,
        config: Config,
        dispatcher: RecordingDispatcher,
    ) -> Self {
        let hooks = Arc::new(dispatcher);
        let dispatcher: Arc<RecordingDispatcher> = Arc::clone(&hooks);
        let commits = Arc::new(StoreCommitLogger::new(Arc::clone(&backend)));
        let registry = Registry::open_with_collaborators(
            backend,
            config,
            commits,
            dispatcher,
            tracing::info_span!("sis_test"),
        )
        .await
        .expect("Failed to open test registry");
        Self {
            registry,
            store,
            hooks,
        }
    }

    /// Creates a schema as the super user.
    ///
    /// # Panics
    ///
    /// Panics if the schema is rejected.
    pub async fn add_schema(&self, schema: Schema) -> Document {
        self.registry
            .schemas()
            .add(schema.to_document(), Some(&superman()))
            .await
            .expect("Failed to add schema")
    }

    /// Creates an entity of `schema` as `user`.
    pub async fn add_entity(
        &self,
        schema: &str,
        entity: Value,
        user: &User,
    ) -> SisResult<Document> {
        self.registry
            .entities(schema)?
            .add(doc(entity), Some(user))
            .await
    }

    /// Stores the canned users in `sis_users`.
    ///
    /// # Panics
    ///
    /// Panics if a user is rejected.
    pub async fn add_canned_users(&self) {
        let users = self.registry.users();
        for user in canned_users() {
            users
                .add(user_document(&user), Some(&superman()))
                .await
                .expect("Failed to add canned user");
        }
    }

    /// Returns the number of writes that reached the store.
    pub fn writes(&self) -> u64 {
        self.store.writes()
    }
}

impl std::ops::Deref for TestRegistry {
    type Target = Registry;

    fn deref(&self) -> &Self::Target {
        &self.registry
    }
}

/// Returns the `_id` of a stored document.
///
/// # Panics
///
/// Panics if the document has no string id.
pub fn id_of(document: &Document) -> String {
    document
        .get(sis_storage::ID_FIELD)
        .and_then(Value::as_str)
        .expect("document has no _id")
        .to_string()
}
