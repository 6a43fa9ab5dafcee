//! Property-based test generators using proptest.
//!
//! Provides strategies for users, owner lists and partial updates that
//! stay inside what the managers accept.

use crate::fixtures::doc;
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use sis_core::{Role, Roles, User};
use sis_storage::Document;

/// The pool of owner groups generated users and owner lists draw from.
pub const GROUP_POOL: [&str; 4] = ["test_group1", "test_group2", "test_group3", "test_group4"];

/// Strategy for generating a group name from [`GROUP_POOL`].
pub fn group_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(GROUP_POOL.to_vec()).prop_map(str::to_string)
}

/// Strategy for generating a role.
pub fn role_strategy() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::User), Just(Role::Admin)]
}

/// Strategy for generating role maps over [`GROUP_POOL`].
pub fn roles_strategy() -> impl Strategy<Value = Roles> {
    prop::collection::btree_map(group_strategy(), role_strategy(), 0..=GROUP_POOL.len())
}

/// Strategy for generating non-super users.
pub fn user_strategy() -> impl Strategy<Value = User> {
    ("[a-z][a-z0-9_]{0,11}", roles_strategy()).prop_map(|(name, roles)| User {
        name,
        roles,
        super_user: false,
    })
}

/// Strategy for generating non-empty owner lists without duplicates.
pub fn owners_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::sample::subsequence(GROUP_POOL.to_vec(), 1..=GROUP_POOL.len())
        .prop_map(|groups| groups.into_iter().map(str::to_string).collect())
}

/// Definition of the schema [`partial_update_strategy`] targets.
pub fn update_schema_definition() -> Value {
    json!({
        "name": "String",
        "count": "Number",
        "flag": "Boolean",
        "tags": ["String"],
        "info": { "note": "String", "level": "Number" }
    })
}

/// A document that satisfies [`update_schema_definition`].
pub fn update_schema_seed() -> Document {
    doc(json!({
        "name": "seed",
        "count": 1,
        "flag": false,
        "tags": ["a"],
        "info": { "note": "n", "level": 1 }
    }))
}

fn nullable<S>(inner: S) -> impl Strategy<Value = Value>
where
    S: Strategy<Value = Value> + 'static,
{
    prop_oneof![1 => Just(Value::Null), 4 => inner]
}

/// Strategy for generating partial updates against
/// [`update_schema_definition`]: any subset of its fields, each either a
/// well-typed value or `null`.
pub fn partial_update_strategy() -> impl Strategy<Value = Document> {
    let name = nullable("[a-z]{1,8}".prop_map(Value::from));
    let count = nullable((-1000i64..1000).prop_map(Value::from));
    let flag = nullable(any::<bool>().prop_map(Value::from));
    let tags = nullable(prop::collection::vec("[a-z]{1,4}", 0..4).prop_map(Value::from));
    let info = nullable(
        (prop::option::of("[a-z]{1,6}"), prop::option::of(0i64..10)).prop_map(|(note, level)| {
            let mut map = Map::new();
            if let Some(note) = note {
                map.insert("note".into(), Value::from(note));
            }
            if let Some(level) = level {
                map.insert("level".into(), Value::from(level));
            }
            Value::Object(map)
        }),
    );

    (
        prop::option::of(name),
        prop::option::of(count),
        prop::option::of(flag),
        prop::option::of(tags),
        prop::option::of(info),
    )
        .prop_map(|(name, count, flag, tags, info)| {
            let mut partial = Document::new();
            for (key, value) in [
                ("name", name),
                ("count", count),
                ("flag", flag),
                ("tags", tags),
                ("info", info),
            ] {
                if let Some(value) = value {
                    partial.insert(key.to_string(), value);
                }
            }
            partial
        })
}
