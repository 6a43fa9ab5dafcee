//! Shared state handed to every manager.

use crate::config::Config;
use crate::history::CommitLogger;
use crate::notify::HookDispatcher;
use crate::schema::SchemaCatalog;
use sis_storage::DocumentStore;
use std::sync::Arc;
use tracing::Span;

/// Context shared by all managers of a registry.
pub struct ManagerContext {
    /// Document store.
    pub store: Arc<dyn DocumentStore>,
    /// Configuration.
    pub config: Config,
    /// Compiled schemas and built-in collections.
    pub catalog: Arc<SchemaCatalog>,
    /// Commit log.
    pub commits: Arc<dyn CommitLogger>,
    /// Hook dispatcher.
    pub dispatcher: Arc<dyn HookDispatcher>,
    /// Parent span of every manager operation.
    pub span: Span,
}

impl ManagerContext {
    /// Creates a new context.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: Config,
        catalog: Arc<SchemaCatalog>,
        commits: Arc<dyn CommitLogger>,
        dispatcher: Arc<dyn HookDispatcher>,
        span: Span,
    ) -> Self {
        Self {
            store,
            config,
            catalog,
            commits,
            dispatcher,
            span,
        }
    }
}

impl std::fmt::Debug for ManagerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerContext")
            .field("config", &self.config)
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}
