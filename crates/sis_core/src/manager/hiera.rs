//! Hierarchical key/value data in `sis_hiera`.

use crate::auth::User;
use crate::error::{SisError, SisResult};
use crate::fields::SCHEMA_HIERA;
use crate::manager::context::ManagerContext;
use crate::manager::policy::{authorize_by_owner, ManagerPolicy};
use crate::schema::CompiledModel;
use crate::types::Event;
use async_trait::async_trait;
use serde_json::Value;
use sis_storage::Document;
use std::sync::Arc;

/// Pipeline stages for hiera entries.
#[derive(Debug, Clone)]
pub struct HieraPolicy {
    model: Arc<CompiledModel>,
}

impl HieraPolicy {
    /// Creates the policy with the built-in `sis_hiera` model.
    pub fn new(model: Arc<CompiledModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ManagerPolicy for HieraPolicy {
    fn collection(&self) -> &str {
        SCHEMA_HIERA
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
        _ctx: &Arc<ManagerContext>,
        doc: &mut Document,
        stored: Option<&Document>,
    ) -> SisResult<()> {
        if !matches!(doc.get("hieradata"), Some(Value::Object(_))) {
            return Err(SisError::bad_request("hieradata must be an object"));
        }
        if let Some(stored) = stored {
            if stored.get("name") != doc.get("name") {
                return Err(SisError::bad_request("Hiera name cannot be changed"));
            }
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
