//! Registry facade.

use crate::auth::User;
use crate::config::Config;
use crate::error::{SisError, SisResult};
use crate::fields::{SCHEMA_HIERA, SCHEMA_HOOKS, SCHEMA_SCHEMAS, SCHEMA_USERS};
use crate::history::{CommitLogger, CommitRecord, StoreCommitLogger};
use crate::manager::{
    EntityManager, EntityPolicy, HieraManager, HieraPolicy, HookManager, HookPolicy, Manager,
    ManagerContext, SchemaManager, SchemaPolicy, UserManager, UserPolicy,
};
use crate::meta;
use crate::notify::{HookDispatcher, NoopDispatcher};
use crate::schema::{CompiledModel, Schema, SchemaCatalog};
use sis_storage::{CollectionOptions, DocumentStore, Filter, Page};
use std::sync::Arc;
use tracing::{info, warn, Span};

/// Models of the built-in collections that have managers.
struct BuiltinModels {
    schemas: Arc<CompiledModel>,
    hooks: Arc<CompiledModel>,
    hiera: Arc<CompiledModel>,
    users: Arc<CompiledModel>,
}

impl BuiltinModels {
    fn resolve(catalog: &SchemaCatalog) -> SisResult<Self> {
        let model = |name: &str| {
            catalog
                .builtin(name)
                .map(|b| Arc::clone(&b.model))
                .ok_or_else(|| SisError::internal(format!("built-in collection {name} missing")))
        };
        Ok(Self {
            schemas: model(SCHEMA_SCHEMAS)?,
            hooks: model(SCHEMA_HOOKS)?,
            hiera: model(SCHEMA_HIERA)?,
            users: model(SCHEMA_USERS)?,
        })
    }
}

/// Entry point to SIS over one document store.
///
/// Opening a registry creates the built-in collections and reloads every
/// stored schema into the catalog. Managers handed out by the registry
/// share its context and are cheap to create.
///
/// # Example
///
/// ```rust,ignore
/// use sis_core::{Registry, Schema, User};
/// use sis_storage::InMemoryStore;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let registry = Registry::open(Arc::new(InMemoryStore::new())).await?;
/// let root = User::super_user("root");
///
/// let schema = Schema::new("hosts", vec!["ops".into()], json!({ "name": "String" }));
/// registry.schemas().add(schema.to_document(), Some(&root)).await?;
///
/// let hosts = registry.entities("hosts")?;
/// let doc = json!({ "name": "web01" }).as_object().cloned().unwrap();
/// hosts.add(doc, Some(&root)).await?;
/// ```
pub struct Registry {
    ctx: Arc<ManagerContext>,
    models: BuiltinModels,
}

impl Registry {
    /// Opens a registry with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the built-in collections cannot be
    /// created or the stored schemas cannot be read.
    pub async fn open(store: Arc<dyn DocumentStore>) -> SisResult<Self> {
        Self::open_with_config(store, Config::default()).await
    }

    /// Opens a registry with a custom configuration.
    ///
    /// # Errors
    ///
    /// See [`Registry::open`].
    pub async fn open_with_config(
        store: Arc<dyn DocumentStore>,
        config: Config,
    ) -> SisResult<Self> {
        let commits: Arc<dyn CommitLogger> = Arc::new(StoreCommitLogger::new(Arc::clone(&store)));
        Self::open_with_collaborators(
            store,
            config,
            commits,
            Arc::new(NoopDispatcher),
            tracing::info_span!("sis"),
        )
        .await
    }

    /// Opens a registry with explicit collaborators.
    ///
    /// `span` is the parent span of every manager operation.
    ///
    /// # Errors
    ///
    /// See [`Registry::open`].
    pub async fn open_with_collaborators(
        store: Arc<dyn DocumentStore>,
        config: Config,
        commits: Arc<dyn CommitLogger>,
        dispatcher: Arc<dyn HookDispatcher>,
        span: Span,
    ) -> SisResult<Self> {
        let catalog = Arc::new(SchemaCatalog::new(config.max_definition_depth)?);
        for builtin in catalog.builtins() {
            store
                .create_collection(builtin.name, builtin.options.clone())
                .await?;
        }
        let models = BuiltinModels::resolve(&catalog)?;

        let ctx = Arc::new(ManagerContext::new(
            store, config, catalog, commits, dispatcher, span,
        ));
        let registry = Self { ctx, models };
        registry.reload().await?;
        Ok(registry)
    }

    /// Reloads every stored schema into the catalog and makes sure its
    /// entity collection exists.
    ///
    /// Schemas that no longer compile are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn reload(&self) -> SisResult<()> {
        let docs = self
            .ctx
            .store
            .find(SCHEMA_SCHEMAS, &Filter::new(), Page::all())
            .await?;
        let mut batch = Vec::with_capacity(docs.len());
        for doc in &docs {
            match Schema::from_document(doc) {
                Ok(schema) => batch.push((schema, meta::version(doc))),
                Err(err) => warn!(error = %err, "skipping unreadable schema document"),
            }
        }
        for (name, err) in self.ctx.catalog.load(batch) {
            warn!(schema = %name, error = %err, "stored schema does not compile");
        }

        let names = self.ctx.catalog.names();
        for name in &names {
            let Some(compiled) = self.ctx.catalog.get(name) else {
                continue;
            };
            let mut options = CollectionOptions::new();
            for path in compiled.model.unique_paths() {
                options = options.unique(path);
            }
            self.ctx.store.create_collection(name, options).await?;
        }
        info!(schemas = names.len(), "schemas loaded");
        Ok(())
    }

    /// Returns the manager of schema documents.
    pub fn schemas(&self) -> SchemaManager {
        Manager::new(
            SchemaPolicy::new(Arc::clone(&self.models.schemas)),
            Arc::clone(&self.ctx),
        )
    }

    /// Returns the manager of the entities of schema `name`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such schema is registered.
    pub fn entities(&self, name: &str) -> SisResult<EntityManager> {
        let compiled = self
            .ctx
            .catalog
            .get(name)
            .ok_or_else(|| SisError::not_found(SCHEMA_SCHEMAS, name))?;
        Ok(Manager::new(EntityPolicy::new(compiled), Arc::clone(&self.ctx)))
    }

    /// Returns the manager of hook definitions.
    pub fn hooks(&self) -> HookManager {
        Manager::new(
            HookPolicy::new(Arc::clone(&self.models.hooks)),
            Arc::clone(&self.ctx),
        )
    }

    /// Returns the manager of hiera entries.
    pub fn hiera(&self) -> HieraManager {
        Manager::new(
            HieraPolicy::new(Arc::clone(&self.models.hiera)),
            Arc::clone(&self.ctx),
        )
    }

    /// Returns the manager of user records.
    pub fn users(&self) -> UserManager {
        Manager::new(
            UserPolicy::new(Arc::clone(&self.models.users)),
            Arc::clone(&self.ctx),
        )
    }

    /// Loads a user by name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown user.
    pub async fn user(&self, name: &str) -> SisResult<User> {
        let doc = self.users().get(name).await?;
        User::from_document(&doc)
    }

    /// Returns the commit history of one document, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit log cannot be read.
    pub async fn history(&self, kind: &str, entity_id: &str) -> SisResult<Vec<CommitRecord>> {
        self.ctx.commits.history(kind, entity_id).await
    }

    /// Returns the schema catalog.
    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.ctx.catalog
    }

    /// Returns the document store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.ctx.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    /// Returns the shared manager context.
    pub fn context(&self) -> &Arc<ManagerContext> {
        &self.ctx
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("context", &self.ctx)
            .finish_non_exhaustive()
    }
}
