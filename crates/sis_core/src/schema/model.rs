//! Compiled structural model of a schema definition.

use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

/// Scalar field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// UTF-8 text.
    String,
    /// JSON number.
    Number,
    /// `true` / `false`.
    Boolean,
    /// Milliseconds since the Unix epoch.
    Date,
    /// A document id that does not reference a schema.
    ObjectId,
}

impl Primitive {
    /// Parses a declared type name (`"String"`, `"number"`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "date" => Some(Self::Date),
            "objectid" => Some(Self::ObjectId),
            _ => None,
        }
    }

    /// Returns the canonical type name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Number => "Number",
            Self::Boolean => "Boolean",
            Self::Date => "Date",
            Self::ObjectId => "ObjectId",
        }
    }
}

/// The shape of a field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// A scalar value.
    Primitive(Primitive),
    /// Any JSON value; not inspected.
    Mixed,
    /// The id of a document in another schema.
    Reference {
        /// Name of the referenced schema.
        target: String,
    },
    /// An array of scalars, references or mixed values.
    Array(Box<FieldSpec>),
    /// An array of sub-documents sharing their own model.
    DocumentArray(Arc<CompiledModel>),
    /// A nested object whose fields are part of this model.
    Embedded(Arc<CompiledModel>),
}

/// A compiled field: its kind plus declared constraints.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// The field's shape.
    pub kind: FieldKind,
    /// Whether the field must be present.
    pub required: bool,
    /// Whether the store must keep the field's values unique.
    pub unique: bool,
    /// Allowed values (empty = unconstrained).
    pub enum_values: Vec<Value>,
    /// Pattern string values must match.
    pub pattern: Option<Regex>,
    /// Inclusive lower bound for numbers.
    pub min: Option<f64>,
    /// Inclusive upper bound for numbers.
    pub max: Option<f64>,
    /// Value applied when the field is missing on a full validation.
    pub default: Option<Value>,
}

impl FieldSpec {
    /// Creates an unconstrained spec of the given kind.
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            required: false,
            unique: false,
            enum_values: Vec::new(),
            pattern: None,
            min: None,
            max: None,
            default: None,
        }
    }

    /// Returns the referenced schema if this field holds a reference.
    pub fn reference_target(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Reference { target } => Some(target),
            _ => None,
        }
    }
}

/// The structural model of a (sub-)document: its fields in declaration order.
#[derive(Debug, Clone, Default)]
pub struct CompiledModel {
    fields: Vec<(String, FieldSpec)>,
}

impl CompiledModel {
    pub(crate) fn from_fields(fields: Vec<(String, FieldSpec)>) -> Self {
        Self { fields }
    }

    /// Iterates the top-level fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    /// Returns a top-level field.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, spec)| spec)
    }

    /// Returns the number of top-level fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the model declares no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Resolves a dotted path to the field it names.
    ///
    /// Paths descend through embedded objects and into the element model of
    /// document arrays, so `items.ref` names the `ref` field of every element
    /// of `items`.
    pub fn resolve(&self, path: &str) -> Option<&FieldSpec> {
        let mut model = self;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let spec = model.field(segment)?;
            if segments.peek().is_none() {
                return Some(spec);
            }
            model = match &spec.kind {
                FieldKind::Embedded(sub) | FieldKind::DocumentArray(sub) => sub,
                _ => return None,
            };
        }
        None
    }

    /// Returns true if any field, at any embedded depth, is required.
    pub fn has_required(&self) -> bool {
        self.fields.iter().any(|(_, spec)| {
            spec.required
                || matches!(&spec.kind, FieldKind::Embedded(sub) if sub.has_required())
        })
    }

    /// Returns the dotted paths of unique fields, outside document arrays.
    pub fn unique_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_unique("", &mut out);
        out
    }

    fn collect_unique(&self, prefix: &str, out: &mut Vec<String>) {
        for (name, spec) in &self.fields {
            let path = format!("{prefix}{name}");
            if spec.unique {
                out.push(path.clone());
            }
            if let FieldKind::Embedded(sub) = &spec.kind {
                sub.collect_unique(&format!("{path}."), out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedded(fields: Vec<(&str, FieldSpec)>) -> Arc<CompiledModel> {
        Arc::new(CompiledModel::from_fields(
            fields.into_iter().map(|(n, s)| (n.to_string(), s)).collect(),
        ))
    }

    #[test]
    fn primitive_names() {
        assert_eq!(Primitive::from_name("String"), Some(Primitive::String));
        assert_eq!(Primitive::from_name("number"), Some(Primitive::Number));
        assert_eq!(Primitive::from_name("ObjectId"), Some(Primitive::ObjectId));
        assert_eq!(Primitive::from_name("Blob"), None);
    }

    #[test]
    fn resolve_walks_embedded_and_document_arrays() {
        let mut unique = FieldSpec::new(FieldKind::Primitive(Primitive::String));
        unique.unique = true;
        let items = embedded(vec![(
            "ref",
            FieldSpec::new(FieldKind::Reference {
                target: "ref_1".into(),
            }),
        )]);
        let target = embedded(vec![("url", unique)]);
        let model = CompiledModel::from_fields(vec![
            ("name".into(), FieldSpec::new(FieldKind::Primitive(Primitive::String))),
            ("items".into(), FieldSpec::new(FieldKind::DocumentArray(items))),
            ("target".into(), FieldSpec::new(FieldKind::Embedded(target))),
        ]);

        assert!(model.resolve("name").is_some());
        assert_eq!(model.resolve("items.ref").unwrap().reference_target(), Some("ref_1"));
        assert!(model.resolve("target.url").is_some());
        assert!(model.resolve("name.x").is_none());
        assert!(model.resolve("missing").is_none());
        assert_eq!(model.unique_paths(), vec!["target.url".to_string()]);
    }

    #[test]
    fn has_required_looks_into_embedded() {
        let mut required = FieldSpec::new(FieldKind::Mixed);
        required.required = true;
        let model = CompiledModel::from_fields(vec![(
            "outer".into(),
            FieldSpec::new(FieldKind::Embedded(embedded(vec![("inner", required)]))),
        )]);
        assert!(model.has_required());
        assert!(!CompiledModel::default().has_required());
    }
}
