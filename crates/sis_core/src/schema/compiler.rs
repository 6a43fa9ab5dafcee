//! Turns a declarative definition tree into a [`CompiledModel`].
//!
//! Accepted field specs:
//!
//! | spec                               | kind                              |
//! |------------------------------------|-----------------------------------|
//! | `"String"`, `"Number"`, ...        | [`FieldKind::Primitive`]          |
//! | `"Mixed"`, `{}`                    | [`FieldKind::Mixed`]              |
//! | `{ "type": "ObjectId", "ref": s }` | [`FieldKind::Reference`]          |
//! | `[spec]`, `[]`                     | [`FieldKind::Array`]              |
//! | `[{ field: spec, .. }]`            | [`FieldKind::DocumentArray`]      |
//! | `{ field: spec, .. }`              | [`FieldKind::Embedded`]           |
//! | `{ "type": spec, options.. }`      | `spec` plus constraints           |
//!
//! Constraint options are `required`, `unique`, `enum`, `match`, `min`,
//! `max` and `default`. Other options are accepted and ignored.

use crate::error::{SisError, SisResult};
use crate::fields::is_reserved;
use crate::schema::model::{CompiledModel, FieldKind, FieldSpec, Primitive};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Compiles schema definitions.
///
/// The compiler is pure: it reads the definition and a predicate naming the
/// schemas a reference may target, and never touches the store.
pub struct SchemaCompiler<'a> {
    known: &'a dyn Fn(&str) -> bool,
    max_depth: usize,
    allow_reserved: bool,
}

impl<'a> SchemaCompiler<'a> {
    /// Creates a compiler accepting references to schemas for which `known`
    /// returns true.
    pub fn new(known: &'a dyn Fn(&str) -> bool, max_depth: usize) -> Self {
        Self {
            known,
            max_depth,
            allow_reserved: false,
        }
    }

    /// Accepts `_`-prefixed field names. Only built-in definitions use this.
    #[must_use]
    pub(crate) fn allow_reserved(mut self) -> Self {
        self.allow_reserved = true;
        self
    }

    /// Compiles a top-level definition.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the definition is not a non-empty object, a
    /// field name is reserved, a type is unknown, a reference targets an
    /// unknown schema, or nesting exceeds the depth limit.
    pub fn compile(&self, definition: &Value) -> SisResult<CompiledModel> {
        match definition {
            Value::Object(map) if map.is_empty() => {
                Err(SisError::bad_request("schema definition cannot be empty"))
            }
            Value::Object(map) => self.compile_object(map, "", 0),
            _ => Err(SisError::bad_request("schema definition must be an object")),
        }
    }

    fn compile_object(
        &self,
        map: &Map<String, Value>,
        prefix: &str,
        depth: usize,
    ) -> SisResult<CompiledModel> {
        if depth > self.max_depth {
            return Err(SisError::bad_request(format!(
                "definition at {} exceeds the maximum depth of {}",
                display_path(prefix),
                self.max_depth
            )));
        }
        let mut fields = Vec::with_capacity(map.len());
        for (name, spec) in map {
            let path = join(prefix, name);
            self.check_name(name, &path)?;
            fields.push((name.clone(), self.compile_field(spec, &path, depth)?));
        }
        Ok(CompiledModel::from_fields(fields))
    }

    fn check_name(&self, name: &str, path: &str) -> SisResult<()> {
        if name.is_empty() || name.contains('.') || name.starts_with('$') {
            return Err(SisError::bad_request(format!("{path} is not a valid field name")));
        }
        if is_reserved(name) && !self.allow_reserved {
            return Err(SisError::bad_request(format!("{path} is a reserved field")));
        }
        Ok(())
    }

    fn compile_field(&self, spec: &Value, path: &str, depth: usize) -> SisResult<FieldSpec> {
        match spec {
            Value::String(name) => Ok(FieldSpec::new(named_kind(name, path)?)),
            Value::Array(items) => self.compile_array(items, path, depth),
            Value::Object(map) if map.is_empty() => Ok(FieldSpec::new(FieldKind::Mixed)),
            Value::Object(map) => match map.get("type") {
                // `{ type: { type: .. } }` declares a sub-field named `type`
                Some(Value::Object(inner)) if inner.contains_key("type") => {
                    self.embedded(map, path, depth)
                }
                Some(ty) => self.compile_typed(map, ty, path, depth),
                None => self.embedded(map, path, depth),
            },
            other => Err(SisError::bad_request(format!(
                "{path} has an invalid type {other}"
            ))),
        }
    }

    fn embedded(&self, map: &Map<String, Value>, path: &str, depth: usize) -> SisResult<FieldSpec> {
        let model = self.compile_object(map, path, depth + 1)?;
        Ok(FieldSpec::new(FieldKind::Embedded(Arc::new(model))))
    }

    fn compile_array(&self, items: &[Value], path: &str, depth: usize) -> SisResult<FieldSpec> {
        let kind = match items {
            [] => FieldKind::Array(Box::new(FieldSpec::new(FieldKind::Mixed))),
            [Value::Object(map)] if !map.is_empty() && !map.contains_key("type") => {
                let model = self.compile_object(map, path, depth + 1)?;
                FieldKind::DocumentArray(Arc::new(model))
            }
            [element] => FieldKind::Array(Box::new(self.compile_field(element, path, depth + 1)?)),
            _ => {
                return Err(SisError::bad_request(format!(
                    "{path} must declare a single array element type"
                )))
            }
        };
        Ok(FieldSpec::new(kind))
    }

    fn compile_typed(
        &self,
        map: &Map<String, Value>,
        ty: &Value,
        path: &str,
        depth: usize,
    ) -> SisResult<FieldSpec> {
        let target = match map.get("ref") {
            None => None,
            Some(Value::String(target)) => Some(target.as_str()),
            Some(other) => {
                return Err(SisError::bad_request(format!(
                    "{path} has an invalid ref {other}"
                )))
            }
        };

        let mut spec = match ty {
            Value::String(name) => FieldSpec::new(named_kind(name, path)?),
            Value::Array(items) => self.compile_array(items, path, depth)?,
            Value::Object(inner) if inner.is_empty() => FieldSpec::new(FieldKind::Mixed),
            Value::Object(inner) => self.embedded(inner, path, depth)?,
            other => {
                return Err(SisError::bad_request(format!(
                    "{path} has an invalid type {other}"
                )))
            }
        };

        if let Some(target) = target {
            spec.kind = match spec.kind {
                FieldKind::Primitive(Primitive::ObjectId) => self.reference(target, path)?,
                FieldKind::Array(element)
                    if matches!(element.kind, FieldKind::Primitive(Primitive::ObjectId)) =>
                {
                    let mut element = *element;
                    element.kind = self.reference(target, path)?;
                    FieldKind::Array(Box::new(element))
                }
                _ => {
                    return Err(SisError::bad_request(format!(
                        "{path} declares a ref but is not of type ObjectId"
                    )))
                }
            };
        }

        apply_options(&mut spec, map, path)?;
        Ok(spec)
    }

    fn reference(&self, target: &str, path: &str) -> SisResult<FieldKind> {
        if !(self.known)(target) {
            return Err(SisError::bad_request(format!(
                "{path} references unknown schema {target}"
            )));
        }
        Ok(FieldKind::Reference {
            target: target.to_string(),
        })
    }
}

fn named_kind(name: &str, path: &str) -> SisResult<FieldKind> {
    if name.eq_ignore_ascii_case("mixed") {
        return Ok(FieldKind::Mixed);
    }
    Primitive::from_name(name)
        .map(FieldKind::Primitive)
        .ok_or_else(|| SisError::bad_request(format!("{path} has an unknown type {name}")))
}

fn apply_options(spec: &mut FieldSpec, map: &Map<String, Value>, path: &str) -> SisResult<()> {
    spec.required = flag(map, "required", path)?;
    spec.unique = flag(map, "unique", path)?;
    if let Some(values) = map.get("enum") {
        spec.enum_values = values
            .as_array()
            .cloned()
            .ok_or_else(|| SisError::bad_request(format!("{path}: enum must be an array")))?;
    }
    if let Some(pattern) = map.get("match") {
        let source = pattern
            .as_str()
            .ok_or_else(|| SisError::bad_request(format!("{path}: match must be a string")))?;
        let regex = Regex::new(source)
            .map_err(|e| SisError::bad_request(format!("{path}: invalid match pattern: {e}")))?;
        spec.pattern = Some(regex);
    }
    spec.min = bound(map, "min", path)?;
    spec.max = bound(map, "max", path)?;
    spec.default = map.get("default").cloned();
    Ok(())
}

fn flag(map: &Map<String, Value>, key: &str, path: &str) -> SisResult<bool> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(value)) => Ok(*value),
        Some(_) => Err(SisError::bad_request(format!("{path}: {key} must be a boolean"))),
    }
}

fn bound(map: &Map<String, Value>, key: &str, path: &str) -> SisResult<Option<f64>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(_) => Err(SisError::bad_request(format!("{path}: {key} must be a number"))),
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}
