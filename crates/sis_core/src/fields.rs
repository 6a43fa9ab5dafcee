//! Well-known field and collection names.
//!
//! Collection names are part of the on-disk contract and must not change.

pub use sis_storage::ID_FIELD;

/// Marker that prefixes every reserved field.
pub const RESERVED_PREFIX: char = '_';

/// Container for the per-document metadata block.
pub const META_FIELD: &str = "_sis";
/// Integer version tag, bumped on every update.
pub const VERSION_FIELD: &str = "_v";
/// Schema field listing the schemas it references.
pub const REFERENCES_FIELD: &str = "_references";

/// Metadata format version.
pub const META_VERSION: &str = "_version";
/// Creation timestamp (ms since epoch).
pub const META_CREATED_AT: &str = "_created_at";
/// Last update timestamp (ms since epoch).
pub const META_UPDATED_AT: &str = "_updated_at";
/// Name of the creating user.
pub const META_CREATED_BY: &str = "_created_by";
/// Name of the last updating user.
pub const META_UPDATED_BY: &str = "_updated_by";

/// Owner groups of an entity.
pub const OWNER: &str = "owner";
/// Free-form tags.
pub const TAGS: &str = "tags";
/// Locked documents cannot be deleted.
pub const LOCKED: &str = "locked";
/// Immutable documents cannot be updated or deleted.
pub const IMMUTABLE: &str = "immutable";

/// Metadata fields a caller may write.
pub const MUTABLE_META_FIELDS: [&str; 4] = [TAGS, IMMUTABLE, OWNER, LOCKED];

/// Current metadata format.
pub const CURRENT_VERSION: &str = "v1.1";

/// Schema definitions.
pub const SCHEMA_SCHEMAS: &str = "sis_schemas";
/// Hook definitions.
pub const SCHEMA_HOOKS: &str = "sis_hooks";
/// Hierarchical metadata.
pub const SCHEMA_HIERA: &str = "sis_hiera";
/// Commit history.
pub const SCHEMA_COMMITS: &str = "sis_commits";
/// Users.
pub const SCHEMA_USERS: &str = "sis_users";
/// Auth tokens.
pub const SCHEMA_TOKENS: &str = "sis_tokens";

/// Prefix reserved for built-in collections.
pub const BUILTIN_PREFIX: &str = "sis_";

/// Returns true if `name` is a reserved field name.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}
