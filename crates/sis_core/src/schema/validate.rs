//! Structural validation and type coercion against a [`CompiledModel`].

use crate::error::{SisError, SisResult};
use crate::fields::is_reserved;
use crate::schema::model::{CompiledModel, FieldKind, FieldSpec, Primitive};
use serde_json::{Map, Number, Value};
use sis_storage::{Document, DocumentId};

/// How much of a document is being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// A complete document: defaults are applied and required fields enforced.
    Full,
    /// A partial update: only present fields are checked, `null` is kept as a
    /// removal marker.
    Partial,
}

/// Validates `doc` in place.
///
/// Values are coerced to their declared types, unknown non-reserved fields
/// are dropped, and `_`-prefixed fields are left untouched for the caller's
/// own reserved-field rules.
///
/// # Errors
///
/// Returns `BadRequest` naming the first offending path.
pub fn validate_document(
    model: &CompiledModel,
    doc: &mut Document,
    mode: ValidationMode,
) -> SisResult<()> {
    validate_object(model, doc, mode, "")
}

fn validate_object(
    model: &CompiledModel,
    doc: &mut Map<String, Value>,
    mode: ValidationMode,
    prefix: &str,
) -> SisResult<()> {
    doc.retain(|key, _| is_reserved(key) || model.field(key).is_some());

    for (name, spec) in model.fields() {
        let path = join(prefix, name);
        match doc.get_mut(name) {
            None => {
                if mode == ValidationMode::Full {
                    fill_missing(doc, name, spec, &path)?;
                }
            }
            Some(Value::Null) => {
                if mode == ValidationMode::Full {
                    if spec.required {
                        return Err(required(&path));
                    }
                    doc.remove(name);
                }
            }
            Some(value) => validate_value(spec, value, mode, &path)?,
        }
    }
    Ok(())
}

fn fill_missing(
    doc: &mut Map<String, Value>,
    name: &str,
    spec: &FieldSpec,
    path: &str,
) -> SisResult<()> {
    if let Some(default) = &spec.default {
        let mut value = default.clone();
        validate_value(spec, &mut value, ValidationMode::Full, path)?;
        doc.insert(name.to_string(), value);
        return Ok(());
    }
    if spec.required {
        return Err(required(path));
    }
    // embedded objects still pick up nested defaults and required checks
    if let FieldKind::Embedded(sub) = &spec.kind {
        let mut inner = Map::new();
        validate_object(sub, &mut inner, ValidationMode::Full, path)?;
        if !inner.is_empty() {
            doc.insert(name.to_string(), Value::Object(inner));
        }
    }
    Ok(())
}

fn validate_value(
    spec: &FieldSpec,
    value: &mut Value,
    mode: ValidationMode,
    path: &str,
) -> SisResult<()> {
    match &spec.kind {
        FieldKind::Mixed => Ok(()),
        FieldKind::Primitive(primitive) => {
            coerce(*primitive, value, path)?;
            check_constraints(spec, value, path)
        }
        FieldKind::Reference { .. } => {
            coerce(Primitive::ObjectId, value, path)?;
            check_constraints(spec, value, path)
        }
        FieldKind::Array(element) => {
            let mut items = into_items(value.take());
            items.retain(|item| !item.is_null());
            for item in &mut items {
                validate_value(element, item, ValidationMode::Full, path)?;
                check_constraints(spec, item, path)?;
            }
            *value = Value::Array(items);
            Ok(())
        }
        FieldKind::DocumentArray(sub) => {
            let mut items = into_items(value.take());
            for (index, item) in items.iter_mut().enumerate() {
                let element_path = format!("{path}.{index}");
                match item {
                    Value::Object(map) => {
                        validate_object(sub, map, ValidationMode::Full, &element_path)?
                    }
                    _ => {
                        return Err(SisError::bad_request(format!(
                            "{element_path} must be an object"
                        )))
                    }
                }
            }
            *value = Value::Array(items);
            Ok(())
        }
        FieldKind::Embedded(sub) => match value {
            Value::Object(map) => validate_object(sub, map, mode, path),
            _ => Err(SisError::bad_request(format!("{path} must be an object"))),
        },
    }
}

/// Treats a scalar as a one-element array.
fn into_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        single => vec![single],
    }
}

fn coerce(primitive: Primitive, value: &mut Value, path: &str) -> SisResult<()> {
    let coerced = match (primitive, &*value) {
        (Primitive::String, Value::String(_)) => return Ok(()),
        (Primitive::String, Value::Number(n)) => Value::String(n.to_string()),
        (Primitive::String, Value::Bool(b)) => Value::String(b.to_string()),

        (Primitive::Number | Primitive::Date, Value::Number(_)) => return Ok(()),
        (Primitive::Number | Primitive::Date, Value::String(s)) => parse_number(s.trim())
            .ok_or_else(|| cast_error(primitive, value, path))?,

        (Primitive::Boolean, Value::Bool(_)) => return Ok(()),
        (Primitive::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(cast_error(primitive, value, path)),
        },
        (Primitive::Boolean, Value::Number(n)) => match n.as_f64() {
            Some(x) if x == 0.0 => Value::Bool(false),
            Some(x) if x == 1.0 => Value::Bool(true),
            _ => return Err(cast_error(primitive, value, path)),
        },

        (Primitive::ObjectId, Value::String(s)) => DocumentId::parse(s)
            .map(|id| Value::String(id.to_string()))
            .map_err(|_| cast_error(primitive, value, path))?,

        _ => return Err(cast_error(primitive, value, path)),
    };
    *value = coerced;
    Ok(())
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(int) = s.parse::<i64>() {
        return Some(Value::Number(int.into()));
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn check_constraints(spec: &FieldSpec, value: &Value, path: &str) -> SisResult<()> {
    if !spec.enum_values.is_empty() && !spec.enum_values.contains(value) {
        return Err(SisError::bad_request(format!(
            "{path}: {value} is not a valid enum value"
        )));
    }
    if let (Some(pattern), Value::String(s)) = (&spec.pattern, value) {
        if !pattern.is_match(s) {
            return Err(SisError::bad_request(format!(
                "{path}: {s} does not match {}",
                pattern.as_str()
            )));
        }
    }
    if let Some(n) = value.as_f64() {
        if spec.min.is_some_and(|min| n < min) || spec.max.is_some_and(|max| n > max) {
            return Err(SisError::bad_request(format!("{path}: {n} is out of range")));
        }
    }
    Ok(())
}

fn required(path: &str) -> SisError {
    SisError::bad_request(format!("{path} is required"))
}

fn cast_error(primitive: Primitive, value: &Value, path: &str) -> SisError {
    SisError::bad_request(format!("{path}: cannot cast {value} to {}", primitive.name()))
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}
