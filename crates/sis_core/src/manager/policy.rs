//! Per-collection behavior plugged into the generic pipeline.

use crate::auth::{authorize_owners, User};
use crate::error::SisResult;
use crate::fields::ID_FIELD;
use crate::manager::context::ManagerContext;
use crate::meta;
use crate::schema::CompiledModel;
use crate::types::{DeleteOptions, Event};
use async_trait::async_trait;
use sis_storage::Document;
use std::sync::Arc;

/// The collection-specific stages of the mutation pipeline.
///
/// [`super::Manager`] drives every mutation through the same sequence and
/// calls into the policy at fixed points:
///
/// 1. [`prepare`](Self::prepare) on the raw caller input
/// 2. structural validation against [`model`](Self::model)
/// 3. [`validate`](Self::validate) on the full (merged) document
/// 4. [`authorize`](Self::authorize)
/// 5. [`resolve`](Self::resolve) (reference checks)
/// 6. persist
/// 7. [`after_save`](Self::after_save) / [`after_delete`](Self::after_delete)
///
/// Stages 1 to 5 only read from the store. Any error aborts the operation
/// before anything is written. Errors from stage 7 are logged; the write
/// stands.
#[async_trait]
pub trait ManagerPolicy: Send + Sync {
    /// Backing collection.
    fn collection(&self) -> &str;

    /// Field documents are addressed by.
    fn id_field(&self) -> &str {
        ID_FIELD
    }

    /// Structural model of the collection's documents.
    fn model(&self) -> &CompiledModel;

    /// Whether mutations are recorded in the commit log.
    fn track_history(&self) -> bool;

    /// Adjusts caller input (a full document on insert, the partial on
    /// update) before structural validation.
    fn prepare(&self, _event: Event, _input: &mut Document) -> SisResult<()> {
        Ok(())
    }

    /// Checks the complete document. `stored` is the current document on
    /// update.
    async fn validate(
        &self,
        _ctx: &Arc<ManagerContext>,
        _doc: &mut Document,
        _stored: Option<&Document>,
    ) -> SisResult<()> {
        Ok(())
    }

    /// Decides whether `user` may apply the mutation.
    ///
    /// `stored` is the current document on update and delete; `merged` is
    /// the document as it will be persisted (the stored one on delete).
    fn authorize(
        &self,
        event: Event,
        stored: Option<&Document>,
        merged: &Document,
        user: &User,
    ) -> SisResult<()>;

    /// Checks references against the live store.
    async fn resolve(&self, _ctx: &Arc<ManagerContext>, _doc: &Document) -> SisResult<()> {
        Ok(())
    }

    /// Last check before a delete is persisted.
    async fn before_delete(
        &self,
        _ctx: &Arc<ManagerContext>,
        _doc: &Document,
        _options: DeleteOptions,
    ) -> SisResult<()> {
        Ok(())
    }

    /// Runs after an insert or update was persisted.
    async fn after_save(
        &self,
        _ctx: &Arc<ManagerContext>,
        _event: Event,
        _doc: &Document,
    ) -> SisResult<()> {
        Ok(())
    }

    /// Runs after a delete was persisted.
    async fn after_delete(&self, _ctx: &Arc<ManagerContext>, _doc: &Document) -> SisResult<()> {
        Ok(())
    }
}

/// Authorizes a mutation against the owner groups in `_sis.owner`.
///
/// The subject is the stored document (the new one on insert). An update
/// that changes the owners must also be permitted over the new owners.
///
/// # Errors
///
/// Returns `Unauthorized` if either check fails.
pub fn authorize_by_owner(
    event: Event,
    stored: Option<&Document>,
    merged: &Document,
    user: &User,
    any_owner_can_modify: bool,
) -> SisResult<()> {
    let owners = meta::owners(stored.unwrap_or(merged)).unwrap_or_default();
    authorize_owners(&owners, user, any_owner_can_modify)?;
    if event == Event::Update {
        let merged_owners = meta::owners(merged).unwrap_or_default();
        if merged_owners != owners {
            authorize_owners(&merged_owners, user, any_owner_can_modify)?;
        }
    }
    Ok(())
}
