//! Cache of compiled schemas.

use crate::error::{SisError, SisResult};
use crate::fields::BUILTIN_PREFIX;
use crate::schema::builtin::{compile_builtins, BuiltinCollection};
use crate::schema::compiler::SchemaCompiler;
use crate::schema::definition::Schema;
use crate::schema::model::CompiledModel;
use crate::schema::references::{extract_references, ReferenceDescriptor};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A schema together with its compiled model and reference descriptors.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    /// The schema document.
    pub schema: Schema,
    /// Version tag (`_v`) of the schema document this was compiled from.
    pub version: u64,
    /// Structural model of the definition.
    pub model: Arc<CompiledModel>,
    /// Reference paths, in declaration order.
    pub references: Vec<ReferenceDescriptor>,
}

impl CompiledSchema {
    /// Returns the names of the schemas this one references, deduplicated,
    /// in first-seen order.
    pub fn referenced_schemas(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for reference in &self.references {
            if !out.contains(&reference.target) {
                out.push(reference.target.clone());
            }
        }
        out
    }
}

/// Thread-safe registry of compiled schemas, keyed by name.
///
/// Entries are replaced only by a compilation of an equal or newer version,
/// so a slow writer cannot roll the cache back.
pub struct SchemaCatalog {
    max_depth: usize,
    schemas: RwLock<HashMap<String, Arc<CompiledSchema>>>,
    builtins: Vec<BuiltinCollection>,
}

impl SchemaCatalog {
    /// Creates an empty catalog and compiles the built-in collections.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a built-in definition fails to compile.
    pub fn new(max_depth: usize) -> SisResult<Self> {
        Ok(Self {
            max_depth,
            schemas: RwLock::new(HashMap::new()),
            builtins: compile_builtins(max_depth)?,
        })
    }

    /// Compiles a schema against the schemas currently registered.
    ///
    /// A schema may reference itself. An already registered compilation of
    /// the same name and version is reused.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the definition does not compile.
    pub fn compile(&self, schema: Schema, version: u64) -> SisResult<Arc<CompiledSchema>> {
        if let Some(cached) = self.get(&schema.name) {
            if cached.version == version && cached.schema.definition == schema.definition {
                return Ok(cached);
            }
        }
        let own_name = schema.name.clone();
        let known = |name: &str| name == own_name || self.contains(name);
        self.compile_with(schema, version, &known)
    }

    fn compile_with(
        &self,
        schema: Schema,
        version: u64,
        known: &dyn Fn(&str) -> bool,
    ) -> SisResult<Arc<CompiledSchema>> {
        let model = SchemaCompiler::new(known, self.max_depth).compile(&schema.definition)?;
        let references = extract_references(&model, self.max_depth)?;
        Ok(Arc::new(CompiledSchema {
            schema,
            version,
            model: Arc::new(model),
            references,
        }))
    }

    /// Compiles and registers a batch of stored schemas.
    ///
    /// Schemas of the batch may reference each other regardless of order.
    /// Returns the names that failed to compile, with their errors.
    pub fn load(&self, batch: Vec<(Schema, u64)>) -> Vec<(String, SisError)> {
        let names: Vec<String> = batch.iter().map(|(schema, _)| schema.name.clone()).collect();
        let known = |name: &str| names.iter().any(|n| n == name) || self.contains(name);
        let mut failures = Vec::new();
        for (schema, version) in batch {
            let name = schema.name.clone();
            match self.compile_with(schema, version, &known) {
                Ok(compiled) => {
                    self.register(compiled);
                }
                Err(err) => failures.push((name, err)),
            }
        }
        failures
    }

    /// Registers a compiled schema, replacing an older version.
    ///
    /// Returns the entry that is current after the call.
    pub fn register(&self, compiled: Arc<CompiledSchema>) -> Arc<CompiledSchema> {
        let mut schemas = self.schemas.write();
        match schemas.get(&compiled.schema.name) {
            Some(current) if current.version > compiled.version => Arc::clone(current),
            _ => {
                tracing::info!(
                    schema = %compiled.schema.name,
                    version = compiled.version,
                    references = compiled.references.len(),
                    "schema registered"
                );
                schemas.insert(compiled.schema.name.clone(), Arc::clone(&compiled));
                compiled
            }
        }
    }

    /// Removes a schema.
    pub fn remove(&self, name: &str) -> Option<Arc<CompiledSchema>> {
        let removed = self.schemas.write().remove(name);
        if removed.is_some() {
            tracing::info!(schema = %name, "schema removed");
        }
        removed
    }

    /// Returns a registered schema.
    pub fn get(&self, name: &str) -> Option<Arc<CompiledSchema>> {
        self.schemas.read().get(name).cloned()
    }

    /// Returns true if a schema is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.schemas.read().contains_key(name)
    }

    /// Returns the registered schema names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the names of registered schemas that reference `name`.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .schemas
            .read()
            .values()
            .filter(|s| s.schema.name != name && s.references.iter().any(|r| r.target == name))
            .map(|s| s.schema.name.clone())
            .collect();
        out.sort();
        out
    }

    /// Returns a built-in collection.
    pub fn builtin(&self, name: &str) -> Option<&BuiltinCollection> {
        self.builtins.iter().find(|b| b.name == name)
    }

    /// Returns every built-in collection.
    pub fn builtins(&self) -> &[BuiltinCollection] {
        &self.builtins
    }

    /// Returns true if `name` is reserved for built-in collections.
    pub fn is_reserved_name(name: &str) -> bool {
        name.starts_with(BUILTIN_PREFIX)
    }

    /// Returns the maximum nesting depth accepted by the compiler.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}

impl std::fmt::Debug for SchemaCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCatalog")
            .field("schemas", &self.names())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(name: &str, definition: serde_json::Value) -> Schema {
        Schema::new(name, vec!["g".into()], definition)
    }

    #[test]
    fn compile_rejects_unknown_targets_until_registered() {
        let catalog = SchemaCatalog::new(32).unwrap();
        let ref_2 = schema("ref_2", json!({ "refs": [{ "type": "ObjectId", "ref": "ref_1" }] }));
        assert_eq!(catalog.compile(ref_2.clone(), 0).unwrap_err().status(), 400);

        let ref_1 = catalog.compile(schema("ref_1", json!({ "name": "String" })), 0).unwrap();
        catalog.register(ref_1);
        let compiled = catalog.compile(ref_2, 0).unwrap();
        assert_eq!(compiled.referenced_schemas(), ["ref_1"]);
        catalog.register(compiled);
        assert_eq!(catalog.dependents("ref_1"), ["ref_2"]);
    }

    #[test]
    fn self_reference_is_allowed() {
        let catalog = SchemaCatalog::new(32).unwrap();
        let tree = schema("tree", json!({ "parent": { "type": "ObjectId", "ref": "tree" } }));
        let compiled = catalog.compile(tree, 0).unwrap();
        assert_eq!(compiled.references[0].target, "tree");
    }

    #[test]
    fn register_keeps_newest_version() {
        let catalog = SchemaCatalog::new(32).unwrap();
        let v1 = catalog.compile(schema("s", json!({ "a": "String" })), 1).unwrap();
        let v0 = catalog.compile(schema("s", json!({ "b": "String" })), 0).unwrap();
        catalog.register(v1);
        let current = catalog.register(v0);
        assert_eq!(current.version, 1);
        assert!(current.model.field("a").is_some());

        assert!(catalog.remove("s").is_some());
        assert!(!catalog.contains("s"));
        assert!(catalog.remove("s").is_none());
    }

    #[test]
    fn compile_reuses_cached_version() {
        let catalog = SchemaCatalog::new(32).unwrap();
        let compiled = catalog.compile(schema("s", json!({ "a": "String" })), 3).unwrap();
        let registered = catalog.register(compiled);
        let again = catalog.compile(schema("s", json!({ "a": "String" })), 3).unwrap();
        assert!(Arc::ptr_eq(&registered, &again));
    }

    #[test]
    fn load_accepts_forward_references() {
        let catalog = SchemaCatalog::new(32).unwrap();
        let failures = catalog.load(vec![
            (schema("b", json!({ "a": { "type": "ObjectId", "ref": "a" } })), 0),
            (schema("a", json!({ "name": "String" })), 2),
            (schema("c", json!({ "x": { "type": "ObjectId", "ref": "missing" } })), 0),
        ]);
        assert_eq!(catalog.names(), ["a", "b"]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "c");
        assert_eq!(catalog.get("a").unwrap().version, 2);
    }

    #[test]
    fn builtin_names_are_reserved() {
        let catalog = SchemaCatalog::new(32).unwrap();
        assert!(SchemaCatalog::is_reserved_name("sis_anything"));
        assert!(!SchemaCatalog::is_reserved_name("entities"));
        assert!(catalog.builtin("sis_hooks").is_some());
        assert!(catalog.builtin("hooks").is_none());
    }
}
