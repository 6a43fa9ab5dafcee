//! Hook definitions in `sis_hooks`.

use crate::auth::User;
use crate::error::{SisError, SisResult};
use crate::fields::SCHEMA_HOOKS;
use crate::manager::context::ManagerContext;
use crate::manager::policy::{authorize_by_owner, ManagerPolicy};
use crate::notify::Hook;
use crate::schema::CompiledModel;
use crate::types::Event;
use async_trait::async_trait;
use sis_storage::Document;
use std::sync::Arc;

/// Pipeline stages for hook definitions.
#[derive(Debug, Clone)]
pub struct HookPolicy {
    model: Arc<CompiledModel>,
}

impl HookPolicy {
    /// Creates the policy with the built-in `sis_hooks` model.
    pub fn new(model: Arc<CompiledModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ManagerPolicy for HookPolicy {
    fn collection(&self) -> &str {
        SCHEMA_HOOKS
    }

    fn id_field(&self) -> &str {
        "name"
    }

    fn model(&self) -> &CompiledModel {
        &self.model
    }

    fn track_history(&self) -> bool {
        true
    }

    async fn validate(
        &self,
        ctx: &Arc<ManagerContext>,
        doc: &mut Document,
        stored: Option<&Document>,
    ) -> SisResult<()> {
        let hook = Hook::from_document(doc)?;
        if let Some(stored) = stored {
            if stored.get("name") != doc.get("name") {
                return Err(SisError::bad_request("Hook name cannot be changed"));
            }
        }
        if hook.events.is_empty() {
            return Err(SisError::bad_request("events cannot be empty"));
        }
        let watched = &hook.entity_type;
        if !ctx.catalog.contains(watched) && ctx.catalog.builtin(watched).is_none() {
            return Err(SisError::bad_request(format!(
                "entity_type {watched} is not a known schema"
            )));
        }
        Ok(())
    }

    fn authorize(
        &self,
        event: Event,
        stored: Option<&Document>,
        merged: &Document,
        user: &User,
    ) -> SisResult<()> {
        authorize_by_owner(event, stored, merged, user, false)
    }
}
