//! Schema compilation, validation and reference extraction.
//!
//! A schema's definition is compiled once per version into a
//! [`CompiledModel`]; the [`ReferenceDescriptor`]s extracted from it drive
//! reference checks and population. Both are cached in the
//! [`SchemaCatalog`].

mod builtin;
mod catalog;
mod compiler;
mod definition;
mod model;
mod references;
mod validate;

pub use builtin::{BuiltinCollection, BUILTIN_NAMES, TOKEN_EXPIRES_FIELD};
pub use catalog::{CompiledSchema, SchemaCatalog};
pub use compiler::SchemaCompiler;
pub use definition::Schema;
pub use model::{CompiledModel, FieldKind, FieldSpec, Primitive};
pub use references::{extract_references, ReferenceDescriptor, ReferenceKind, SlotAction};
pub use validate::{validate_document, ValidationMode};
