//! Registry and manager configuration.

use std::time::Duration;

/// Default cap on the number of documents returned by a single list call.
pub const MAX_RESULTS: usize = 10_000;

/// Configuration shared by every manager of a registry.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether mutations are authorized against the calling user.
    pub auth: bool,

    /// Whether commit records are written for collections tracking history.
    pub log_commits: bool,

    /// Whether matching hooks are handed to the dispatcher after a mutation.
    pub fire_hooks: bool,

    /// Whether every mutation is rejected.
    pub readonly: bool,

    /// Upper bound on the page size of list calls.
    pub max_results: usize,

    /// Time budget for the stages that run before persist (none = unbounded).
    pub operation_timeout: Option<Duration>,

    /// Maximum nesting depth accepted in a schema definition.
    pub max_definition_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth: true,
            log_commits: true,
            fire_hooks: true,
            readonly: false,
            max_results: MAX_RESULTS,
            operation_timeout: None,
            max_definition_depth: 32,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether mutations are authorized.
    #[must_use]
    pub const fn auth(mut self, value: bool) -> Self {
        self.auth = value;
        self
    }

    /// Sets whether commit records are written.
    #[must_use]
    pub const fn log_commits(mut self, value: bool) -> Self {
        self.log_commits = value;
        self
    }

    /// Sets whether hooks fire.
    #[must_use]
    pub const fn fire_hooks(mut self, value: bool) -> Self {
        self.fire_hooks = value;
        self
    }

    /// Sets whether mutations are rejected.
    #[must_use]
    pub const fn readonly(mut self, value: bool) -> Self {
        self.readonly = value;
        self
    }

    /// Sets the page size cap.
    #[must_use]
    pub const fn max_results(mut self, value: usize) -> Self {
        self.max_results = value;
        self
    }

    /// Sets the pre-persist time budget.
    #[must_use]
    pub const fn operation_timeout(mut self, value: Duration) -> Self {
        self.operation_timeout = Some(value);
        self
    }

    /// Sets the maximum definition depth.
    #[must_use]
    pub const fn max_definition_depth(mut self, value: usize) -> Self {
        self.max_definition_depth = value;
        self
    }
}
