//! Definitions of the built-in collections.

use crate::error::{SisError, SisResult};
use crate::fields::{
    SCHEMA_COMMITS, SCHEMA_HIERA, SCHEMA_HOOKS, SCHEMA_SCHEMAS, SCHEMA_TOKENS, SCHEMA_USERS,
};
use crate::schema::compiler::SchemaCompiler;
use crate::schema::model::CompiledModel;
use serde_json::{json, Value};
use sis_storage::CollectionOptions;
use std::sync::Arc;

/// Field of `sis_tokens` holding the expiry timestamp.
pub const TOKEN_EXPIRES_FIELD: &str = "expires";

/// A compiled built-in collection.
#[derive(Debug, Clone)]
pub struct BuiltinCollection {
    /// Collection name.
    pub name: &'static str,
    /// Compiled definition.
    pub model: Arc<CompiledModel>,
    /// Store options (unique fields, expiry).
    pub options: CollectionOptions,
    /// Whether mutations are recorded in the commit log.
    pub track_history: bool,
}

fn definition(name: &str) -> Value {
    let events = json!(["insert", "update", "delete"]);
    match name {
        SCHEMA_SCHEMAS => json!({
            "name": { "type": "String", "required": true, "unique": true, "match": "^[a-z0-9_]+$" },
            "description": "String",
            "sis_locked": { "type": "Boolean", "default": false },
            "definition": { "type": {}, "required": true },
            "locked_fields": ["String"],
            "track_history": { "type": "Boolean", "default": true },
            "is_open": { "type": "Boolean", "default": false },
            "is_public": { "type": "Boolean", "default": false },
            "any_owner_can_modify": { "type": "Boolean", "default": true },
            "_references": ["String"]
        }),
        SCHEMA_HOOKS => json!({
            "name": { "type": "String", "required": true, "unique": true, "match": "^[a-z0-9_]+$" },
            "target": {
                "type": {
                    "url": { "type": "String", "required": true },
                    "action": { "type": "String", "required": true, "enum": ["GET", "POST", "PUT"] }
                },
                "required": true
            },
            "retry_count": { "type": "Number", "min": 0, "max": 20, "default": 0 },
            "retry_delay": { "type": "Number", "min": 1, "max": 60, "default": 1 },
            "events": { "type": [{ "type": "String", "enum": events }], "required": true },
            "entity_type": { "type": "String", "required": true },
            "sis_locked": { "type": "Boolean", "default": false }
        }),
        SCHEMA_HIERA => json!({
            "name": { "type": "String", "required": true, "unique": true },
            "hieradata": { "type": {}, "required": true }
        }),
        SCHEMA_COMMITS => json!({
            "type": { "type": "String", "required": true },
            "entity_id": { "type": "String", "required": true },
            "entity_oid": { "type": "String", "required": true },
            "action": { "type": "String", "required": true, "enum": events },
            "commit_data": "Mixed",
            "date_modified": { "type": "Number", "index": true },
            "modified_by": "String"
        }),
        SCHEMA_USERS => json!({
            "name": {
                "type": "String",
                "required": true,
                "unique": true,
                "match": "^[a-z0-9_\\-]+$"
            },
            "email": {
                "type": "String",
                "required": true,
                "match": "^([\\w\\-.]+@([\\w\\-]+\\.)+[\\w\\-]{2,4})?$"
            },
            "verified": { "type": "Boolean", "default": false },
            "super_user": { "type": "Boolean", "default": false },
            "roles": { "type": {}, "default": {} }
        }),
        SCHEMA_TOKENS => json!({
            "name": { "type": "String", "unique": true },
            "desc": "String",
            "expires": { "type": "Date", "expires": 0 },
            "username": { "type": "String", "required": true }
        }),
        _ => Value::Null,
    }
}

/// Names of the built-in collections, in creation order.
pub const BUILTIN_NAMES: [&str; 6] = [
    SCHEMA_SCHEMAS,
    SCHEMA_HOOKS,
    SCHEMA_HIERA,
    SCHEMA_COMMITS,
    SCHEMA_USERS,
    SCHEMA_TOKENS,
];

/// Compiles every built-in definition.
///
/// # Errors
///
/// Returns an internal error if a definition fails to compile.
pub fn compile_builtins(max_depth: usize) -> SisResult<Vec<BuiltinCollection>> {
    let known = |_: &str| false;
    let compiler = SchemaCompiler::new(&known, max_depth).allow_reserved();
    BUILTIN_NAMES
        .iter()
        .map(|&name| {
            let model = compiler
                .compile(&definition(name))
                .map_err(|e| SisError::internal(format!("built-in {name}: {e}")))?;
            let mut options = CollectionOptions::new();
            for path in model.unique_paths() {
                options = options.unique(path);
            }
            if name == SCHEMA_TOKENS {
                options = options.expires(TOKEN_EXPIRES_FIELD);
            }
            Ok(BuiltinCollection {
                name,
                model: Arc::new(model),
                options,
                track_history: !matches!(name, SCHEMA_COMMITS | SCHEMA_TOKENS),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_compile() {
        let builtins = compile_builtins(32).unwrap();
        assert_eq!(builtins.len(), BUILTIN_NAMES.len());

        let schemas = &builtins[0];
        assert_eq!(schemas.options.unique, ["name"]);
        assert!(schemas.model.field("_references").is_some());

        let tokens = builtins.iter().find(|b| b.name == SCHEMA_TOKENS).unwrap();
        assert_eq!(tokens.options.expires_field.as_deref(), Some("expires"));
        assert!(!tokens.track_history);

        let hooks = builtins.iter().find(|b| b.name == SCHEMA_HOOKS).unwrap();
        assert!(hooks.model.resolve("target.action").unwrap().required);
    }

    #[test]
    fn user_email_pattern() {
        let builtins = compile_builtins(32).unwrap();
        let users = builtins.iter().find(|b| b.name == SCHEMA_USERS).unwrap();
        let email = users.model.field("email").unwrap().pattern.clone().unwrap();
        assert!(email.is_match("someone@example.com"));
        assert!(email.is_match(""));
        assert!(!email.is_match("not an email"));
    }
}
