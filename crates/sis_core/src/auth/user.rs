//! Users and their group roles.

use crate::error::{SisError, SisResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sis_storage::Document;
use std::collections::BTreeMap;
use std::fmt;

/// Role held within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular member.
    User,
    /// Group administrator.
    Admin,
}

impl Role {
    /// Returns the wire name of the role.
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    /// Parses a wire name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Group name → role.
pub type Roles = BTreeMap<String, Role>;

/// An authenticated caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique user name.
    pub name: String,
    /// Role per group.
    #[serde(default)]
    pub roles: Roles,
    /// Super users pass every authorization check.
    #[serde(default)]
    pub super_user: bool,
}

impl User {
    /// Creates a user without roles.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: Roles::new(),
            super_user: false,
        }
    }

    /// Creates a super user.
    pub fn super_user(name: impl Into<String>) -> Self {
        Self {
            super_user: true,
            ..Self::new(name)
        }
    }

    /// Adds a role.
    #[must_use]
    pub fn with_role(mut self, group: impl Into<String>, role: Role) -> Self {
        self.roles.insert(group.into(), role);
        self
    }

    /// Returns the user's role in `group`.
    pub fn role_in(&self, group: &str) -> Option<Role> {
        self.roles.get(group).copied()
    }

    /// Returns true if the user administers at least one group.
    pub fn is_admin_anywhere(&self) -> bool {
        self.roles.values().any(|r| *r == Role::Admin)
    }

    /// Reads a user from a `sis_users` document.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the name is missing or the roles are invalid.
    pub fn from_document(doc: &Document) -> SisResult<Self> {
        let name = doc
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| SisError::bad_request("user name is required"))?;
        let roles = match doc.get("roles") {
            None | Some(Value::Null) => Roles::new(),
            Some(value) => parse_roles(value)?,
        };
        Ok(Self {
            name: name.to_string(),
            roles,
            super_user: doc.get("super_user").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

/// Parses a `{ group: "user" | "admin" }` map.
///
/// # Errors
///
/// Returns `BadRequest` if `value` is not an object or holds an unknown role.
pub fn parse_roles(value: &Value) -> SisResult<Roles> {
    let map = value
        .as_object()
        .ok_or_else(|| SisError::bad_request("roles must be an object"))?;
    map.iter()
        .map(|(group, role)| {
            role.as_str()
                .and_then(Role::parse)
                .map(|role| (group.clone(), role))
                .ok_or_else(|| {
                    SisError::bad_request(format!("invalid role {role} for group {group}"))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_and_lookup() {
        let user = User::new("admin1")
            .with_role("g1", Role::Admin)
            .with_role("g2", Role::User);
        assert_eq!(user.role_in("g1"), Some(Role::Admin));
        assert_eq!(user.role_in("g3"), None);
        assert!(user.is_admin_anywhere());
        assert!(User::super_user("root").super_user);
    }

    #[test]
    fn from_document_parses_roles() {
        let doc = match json!({ "name": "u", "roles": { "g1": "admin", "g2": "user" } }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let user = User::from_document(&doc).unwrap();
        assert_eq!(user.roles.len(), 2);
        assert!(!user.super_user);
    }

    #[test]
    fn invalid_roles_rejected() {
        assert!(parse_roles(&json!({ "g1": "owner" })).is_err());
        assert!(parse_roles(&json!(["admin"])).is_err());
        assert!(parse_roles(&json!({})).unwrap().is_empty());
    }
}
