//! Entities of user-defined schemas.

use crate::auth::{authorize_owners, permission_for, User};
use crate::error::{SisError, SisResult};
use crate::fields::ID_FIELD;
use crate::manager::context::ManagerContext;
use crate::manager::pipeline::Manager;
use crate::manager::policy::ManagerPolicy;
use crate::meta;
use crate::schema::{CompiledModel, CompiledSchema, ReferenceDescriptor, ReferenceKind, SlotAction};
use crate::types::{Event, ListResult};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;
use sis_storage::{Document, Filter, Page};
use std::collections::HashMap;
use std::sync::Arc;

/// Manager of the entities of one schema.
pub type EntityManager = Manager<EntityPolicy>;

/// Pipeline stages for entities of a compiled schema.
#[derive(Debug, Clone)]
pub struct EntityPolicy {
    schema: Arc<CompiledSchema>,
}

impl EntityPolicy {
    /// Creates the policy of `schema`.
    pub fn new(schema: Arc<CompiledSchema>) -> Self {
        Self { schema }
    }

    /// Returns the compiled schema.
    pub fn schema(&self) -> &Arc<CompiledSchema> {
        &self.schema
    }
}

/// Reduces a populated sub-document in a reference slot to its id.
///
/// On insert a sub-document is rejected; on update it becomes its `_id`, or
/// is dropped when it has none.
fn fix_sub_object(value: &mut Value, is_update: bool) -> SisResult<SlotAction> {
    let id = match value {
        Value::Object(obj) => obj.get(ID_FIELD).cloned(),
        _ => return Ok(SlotAction::Keep),
    };
    if !is_update {
        return Err(SisError::bad_request(
            "Unable to add reference document.  Must be an object id",
        ));
    }
    match id {
        Some(id) => {
            *value = id;
            Ok(SlotAction::Keep)
        }
        None => Ok(SlotAction::Remove),
    }
}

#[async_trait]
impl ManagerPolicy for EntityPolicy {
    fn collection(&self) -> &str {
        &self.schema.schema.name
    }

    fn model(&self) -> &CompiledModel {
        &self.schema.model
    }

    fn track_history(&self) -> bool {
        self.schema.schema.track_history
    }

    fn prepare(&self, event: Event, input: &mut Document) -> SisResult<()> {
        if input.is_empty() {
            return Err(SisError::bad_request("entity cannot be empty"));
        }
        let is_update = event == Event::Update;
        for reference in &self.schema.references {
            reference.for_each_slot_mut(input, &mut |value| fix_sub_object(value, is_update))?;
        }
        Ok(())
    }

    async fn validate(
        &self,
        _ctx: &Arc<ManagerContext>,
        doc: &mut Document,
        _stored: Option<&Document>,
    ) -> SisResult<()> {
        if let Some(owners) = meta::owners(doc) {
            let schema_owners = &self.schema.schema.owner;
            if owners.iter().any(|group| !schema_owners.contains(group)) {
                return Err(SisError::bad_request(
                    "entity owners must be a subset of the schema owners.",
                ));
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
        let schema = &self.schema.schema;
        let subject = stored.unwrap_or(merged);

        // an entity's own owner list takes precedence over schema flags
        if let Some(owners) = meta::explicit_owners(subject) {
            authorize_owners(&owners, user, schema.any_owner_can_modify)?;
            if event == Event::Update {
                let merged_owners =
                    meta::explicit_owners(merged).unwrap_or_else(|| schema.owner.clone());
                if merged_owners != owners {
                    authorize_owners(&merged_owners, user, schema.any_owner_can_modify)?;
                }
            }
            return Ok(());
        }

        if schema.is_open_to_all() {
            let is_creator = stored.and_then(meta::created_by) == Some(user.name.as_str());
            if event == Event::Insert || is_creator {
                return Ok(());
            }
            return Err(SisError::unauthorized(
                "Only the creator of an entity in an open schema may modify it.",
            ));
        }

        if permission_for(&schema.owner, user).can_modify() {
            Ok(())
        } else {
            Err(SisError::unauthorized(
                "Insufficient privileges to operate on entities in this schema.",
            ))
        }
    }

    async fn resolve(&self, ctx: &Arc<ManagerContext>, doc: &Document) -> SisResult<()> {
        ensure_references(ctx, &self.schema.references, doc).await
    }
}

/// Checks that every id referenced by `doc` exists in its target schema.
///
/// One lookup per id, all issued concurrently in descriptor order; the
/// first failure wins.
async fn ensure_references(
    ctx: &Arc<ManagerContext>,
    references: &[ReferenceDescriptor],
    doc: &Document,
) -> SisResult<()> {
    let checks: Vec<_> = references
        .iter()
        .flat_map(|reference| {
            reference
                .values(doc)
                .into_iter()
                .map(move |value| check_reference(ctx, &reference.target, id_string(value)))
        })
        .collect();
    if checks.is_empty() {
        return Ok(());
    }
    tracing::debug!(stage = "resolve", lookups = checks.len(), "checking references");
    try_join_all(checks).await?;
    Ok(())
}

async fn check_reference(ctx: &Arc<ManagerContext>, target: &str, id: String) -> SisResult<()> {
    let compiled = ctx.catalog.get(target).ok_or_else(|| {
        SisError::bad_request(format!("Referenced schema {target} does not exist."))
    })?;
    let manager = EntityManager::new(EntityPolicy::new(compiled), Arc::clone(ctx));
    if manager.exists(&id).await? {
        Ok(())
    } else {
        Err(SisError::bad_request(format!(
            "Reference with id {id} does not exist."
        )))
    }
}

fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Manager<EntityPolicy> {
    /// Returns an entity with its references replaced by the referenced
    /// documents.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id.
    pub async fn get_populated(&self, id: &str) -> SisResult<Document> {
        let mut doc = self.get(id).await?;
        self.populate(&mut doc).await?;
        Ok(doc)
    }

    /// Lists entities with their references populated.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_populated(&self, filter: &Filter, page: Page) -> SisResult<ListResult> {
        let mut result = self.list(filter, page).await?;
        for doc in &mut result.items {
            self.populate(doc).await?;
        }
        Ok(result)
    }

    /// Replaces reference ids in `doc` with the referenced documents.
    ///
    /// A missing single reference becomes `null`; a missing element of a
    /// reference array is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn populate(&self, doc: &mut Document) -> SisResult<()> {
        let references = &self.policy().schema().references;

        let mut wanted: Vec<(String, String)> = Vec::new();
        for reference in references {
            for value in reference.values(doc) {
                let key = (reference.target.clone(), id_string(value));
                if value.is_string() && !wanted.contains(&key) {
                    wanted.push(key);
                }
            }
        }
        if wanted.is_empty() {
            return Ok(());
        }

        let found = try_join_all(wanted.iter().map(|(target, id)| self.lookup(target, id))).await?;
        let resolved: HashMap<(String, String), Document> = wanted
            .into_iter()
            .zip(found)
            .filter_map(|(key, doc)| doc.map(|doc| (key, doc)))
            .collect();

        for reference in references {
            reference.for_each_slot_mut(doc, &mut |value| {
                let Some(id) = value.as_str() else {
                    return Ok(SlotAction::Keep);
                };
                let key = (reference.target.clone(), id.to_string());
                match resolved.get(&key) {
                    Some(target) => {
                        *value = Value::Object(target.clone());
                        Ok(SlotAction::Keep)
                    }
                    None if reference.kind == ReferenceKind::Single => {
                        *value = Value::Null;
                        Ok(SlotAction::Keep)
                    }
                    None => Ok(SlotAction::Remove),
                }
            })?;
        }
        Ok(())
    }

    async fn lookup(&self, target: &str, id: &str) -> SisResult<Option<Document>> {
        let Some(compiled) = self.context().catalog.get(target) else {
            return Ok(None);
        };
        let manager = EntityManager::new(EntityPolicy::new(compiled), Arc::clone(self.context()));
        match manager.get(id).await {
            Ok(doc) => Ok(Some(doc)),
            Err(SisError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
