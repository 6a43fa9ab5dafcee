//! Schema documents in `sis_schemas`.

use crate::auth::{authorize_owners, permission_for, User};
use crate::error::{SisError, SisResult};
use crate::fields::{REFERENCES_FIELD, SCHEMA_SCHEMAS};
use crate::manager::context::ManagerContext;
use crate::manager::policy::ManagerPolicy;
use crate::meta;
use crate::schema::{CompiledModel, CompiledSchema, Schema, SchemaCatalog};
use crate::types::{DeleteOptions, Event};
use async_trait::async_trait;
use serde_json::Value;
use sis_storage::{values_at, CollectionOptions, Document, Filter, Page, StorageError};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// Field schema documents are addressed by.
const NAME_FIELD: &str = "name";

/// Pipeline stages for schema documents.
///
/// A schema is compiled while it is validated, so an invalid definition
/// never reaches the store. The compiled model is registered in the
/// catalog after the write and removed after a delete.
#[derive(Debug, Clone)]
pub struct SchemaPolicy {
    model: Arc<CompiledModel>,
}

impl SchemaPolicy {
    /// Creates the policy with the built-in `sis_schemas` model.
    pub fn new(model: Arc<CompiledModel>) -> Self {
        Self { model }
    }

    fn compile(ctx: &ManagerContext, doc: &Document) -> SisResult<Arc<CompiledSchema>> {
        let schema = Schema::from_document(doc)?;
        ctx.catalog.compile(schema, meta::version(doc))
    }
}

fn check_locked_fields(
    schema: &Schema,
    compiled: &CompiledSchema,
    stored: Option<&Schema>,
) -> SisResult<()> {
    for field in &schema.locked_fields {
        if compiled.model.resolve(field).is_none() {
            return Err(SisError::bad_request(format!(
                "locked field {field} is not in the definition"
            )));
        }
    }
    if let Some(stored) = stored {
        for field in &stored.locked_fields {
            if !schema.locked_fields.contains(field) || compiled.model.resolve(field).is_none() {
                return Err(SisError::bad_request(format!(
                    "Cannot remove locked field {field}"
                )));
            }
        }
    }
    Ok(())
}

/// Rejects a definition whose unique fields the schema's live entities
/// already collide on, before the definition is stored.
async fn ensure_unique_satisfied(
    ctx: &ManagerContext,
    compiled: &CompiledSchema,
) -> SisResult<()> {
    let paths = compiled.model.unique_paths();
    if paths.is_empty() {
        return Ok(());
    }
    let name = &compiled.schema.name;
    let entities = ctx.store.find(name, &Filter::new(), Page::all()).await?;
    for path in paths {
        let mut seen = HashSet::new();
        for value in entities.iter().flat_map(|doc| values_at(doc, &path)) {
            if !value.is_null() && !seen.insert(value.to_string()) {
                return Err(StorageError::Duplicate {
                    collection: name.clone(),
                    field: path.clone(),
                    value: value.to_string(),
                }
                .into());
            }
        }
    }
    Ok(())
}

fn is_creator(doc: &Document, user: &User) -> bool {
    meta::created_by(doc) == Some(user.name.as_str())
}

#[async_trait]
impl ManagerPolicy for SchemaPolicy {
    fn collection(&self) -> &str {
        SCHEMA_SCHEMAS
    }

    fn id_field(&self) -> &str {
        NAME_FIELD
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
        let schema = Schema::from_document(doc)?;
        if SchemaCatalog::is_reserved_name(&schema.name) {
            return Err(SisError::bad_request(format!(
                "{} is a reserved schema name",
                schema.name
            )));
        }
        let stored_schema = stored.map(Schema::from_document).transpose()?;
        if let Some(previous) = &stored_schema {
            if previous.name != schema.name {
                return Err(SisError::bad_request("Schema name cannot be changed"));
            }
        }
        if schema.owner.is_empty() && !schema.is_open_to_all() {
            return Err(SisError::bad_request("Schema owner cannot be empty"));
        }

        let version = stored.map_or(0, |s| meta::version(s) + 1);
        let compiled = ctx.catalog.compile(schema.clone(), version)?;
        check_locked_fields(&schema, &compiled, stored_schema.as_ref())?;

        ensure_unique_satisfied(ctx, &compiled).await?;

        let references = compiled
            .referenced_schemas()
            .into_iter()
            .map(Value::String)
            .collect();
        doc.insert(REFERENCES_FIELD.to_owned(), Value::Array(references));
        Ok(())
    }

    fn authorize(
        &self,
        event: Event,
        stored: Option<&Document>,
        merged: &Document,
        user: &User,
    ) -> SisResult<()> {
        let subject = stored.unwrap_or(merged);
        let owners = meta::owners(subject).unwrap_or_default();
        let schema = Schema::from_document(subject)?;

        if schema.is_open {
            if event == Event::Insert || is_creator(subject, user) {
                return Ok(());
            }
            if !permission_for(&owners, user).can_modify() {
                return Err(SisError::unauthorized(format!(
                    "Only the creator of schema {} may modify it.",
                    schema.name
                )));
            }
        } else {
            authorize_owners(&owners, user, false)?;
        }

        if event == Event::Update {
            let merged_owners = meta::owners(merged).unwrap_or_default();
            if merged_owners != owners && !merged_owners.is_empty() {
                authorize_owners(&merged_owners, user, false)?;
            }
        }
        Ok(())
    }

    async fn before_delete(
        &self,
        ctx: &Arc<ManagerContext>,
        doc: &Document,
        options: DeleteOptions,
    ) -> SisResult<()> {
        let schema = Schema::from_document(doc)?;
        if schema.sis_locked {
            return Err(SisError::bad_request(format!(
                "Schema {} is locked",
                schema.name
            )));
        }
        let live = ctx.store.count(&schema.name, &Filter::new()).await?;
        if live > 0 && !options.force {
            return Err(SisError::bad_request(format!(
                "Schema {} has {live} entities. Delete them first or force the delete.",
                schema.name
            )));
        }
        let dependents = ctx.catalog.dependents(&schema.name);
        if !dependents.is_empty() {
            warn!(schema = %schema.name, ?dependents, "deleting a schema other schemas reference");
        }
        Ok(())
    }

    async fn after_save(
        &self,
        ctx: &Arc<ManagerContext>,
        _event: Event,
        doc: &Document,
    ) -> SisResult<()> {
        let compiled = Self::compile(ctx, doc)?;
        let mut options = CollectionOptions::new();
        for path in compiled.model.unique_paths() {
            options = options.unique(path);
        }
        ctx.store.create_collection(&compiled.schema.name, options).await?;
        ctx.catalog.register(compiled);
        Ok(())
    }

    async fn after_delete(&self, ctx: &Arc<ManagerContext>, doc: &Document) -> SisResult<()> {
        let name = doc.get(NAME_FIELD).and_then(Value::as_str).unwrap_or_default();
        ctx.catalog.remove(name);
        ctx.store.drop_collection(name).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn policy() -> SchemaPolicy {
        let catalog = SchemaCatalog::new(8).unwrap();
        let model = Arc::clone(&catalog.builtin(SCHEMA_SCHEMAS).unwrap().model);
        SchemaPolicy::new(model)
    }

    #[test]
    fn closed_schemas_need_full_coverage() {
        let schema = doc(json!({
            "name": "s",
            "definition": {},
            "_sis": { "owner": ["g1", "g2"] }
        }));
        let partial = User::new("u").with_role("g1", Role::Admin);
        let full = User::new("a")
            .with_role("g1", Role::Admin)
            .with_role("g2", Role::User);

        assert!(policy().authorize(Event::Insert, None, &schema, &partial).is_err());
        policy().authorize(Event::Insert, None, &schema, &full).unwrap();
    }

    #[test]
    fn open_schemas_are_managed_by_their_creator() {
        let schema = doc(json!({
            "name": "s",
            "definition": {},
            "is_open": true,
            "_sis": { "_created_by": "alice" }
        }));
        let alice = User::new("alice");
        let bob = User::new("bob");
        policy().authorize(Event::Insert, None, &schema, &bob).unwrap();
        policy().authorize(Event::Update, Some(&schema), &schema, &alice).unwrap();
        let err = policy()
            .authorize(Event::Delete, Some(&schema), &schema, &bob)
            .unwrap_err();
        assert_eq!(err.status(), 401);
    }

    #[test]
    fn public_schemas_need_owner_permission() {
        let schema = doc(json!({
            "name": "s",
            "definition": {},
            "is_public": true,
            "_sis": { "owner": ["g1"], "_created_by": "bob" }
        }));
        let bob = User::new("bob");
        let admin = User::new("a").with_role("g1", Role::Admin);
        for (event, stored) in [
            (Event::Insert, None),
            (Event::Update, Some(&schema)),
            (Event::Delete, Some(&schema)),
        ] {
            let err = policy().authorize(event, stored, &schema, &bob).unwrap_err();
            assert_eq!(err.status(), 401);
            policy().authorize(event, stored, &schema, &admin).unwrap();
        }
    }

    #[test]
    fn locked_fields_must_stay() {
        let catalog = SchemaCatalog::new(8).unwrap();
        let mut schema = Schema::new(
            "s",
            vec!["g".into()],
            json!({ "a": "String", "b": "String" }),
        );
        schema.locked_fields = vec!["a".into()];
        let compiled = catalog.compile(schema.clone(), 0).unwrap();
        check_locked_fields(&schema, &compiled, None).unwrap();

        let mut next = Schema::new("s", vec!["g".into()], json!({ "b": "String" }));
        next.locked_fields = vec![];
        let recompiled = catalog.compile(next.clone(), 1).unwrap();
        let err = check_locked_fields(&next, &recompiled, Some(&schema)).unwrap_err();
        assert_eq!(err.to_string(), "Bad request: Cannot remove locked field a");

        let mut missing = schema.clone();
        missing.locked_fields = vec!["zzz".into()];
        assert!(check_locked_fields(&missing, &compiled, None).is_err());
    }
}
