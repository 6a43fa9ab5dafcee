//! Permission computation over owner groups.

use crate::auth::user::{Role, Roles, User};
use crate::error::{SisError, SisResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Effective permission of a user over a resource.
///
/// Ordered by declaration. [`PermissionLevel::Admin`] and
/// [`PermissionLevel::UserAllGroups`] both allow modification;
/// [`PermissionLevel::User`] does so only where the resource allows any
/// owner to modify it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PermissionLevel {
    /// No membership in the owner groups.
    #[serde(rename = "none")]
    None,
    /// Member of some owner groups.
    #[serde(rename = "user")]
    User,
    /// Administrator of every owner group.
    #[serde(rename = "admin")]
    Admin,
    /// Member of every owner group, not administrator of all.
    #[serde(rename = "all_groups")]
    UserAllGroups,
}

impl PermissionLevel {
    /// Returns the wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::User => "user",
            Self::Admin => "admin",
            Self::UserAllGroups => "all_groups",
        }
    }

    /// Returns true for full group coverage.
    pub const fn can_modify(self) -> bool {
        matches!(self, Self::Admin | Self::UserAllGroups)
    }

    /// Returns true if the level allows modification, given whether partial
    /// coverage suffices.
    pub const fn permits(self, any_owner_can_modify: bool) -> bool {
        match self {
            Self::Admin | Self::UserAllGroups => true,
            Self::User => any_owner_can_modify,
            Self::None => false,
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computes `user`'s permission over a resource owned by `owners`.
pub fn permission_for(owners: &[String], user: &User) -> PermissionLevel {
    if user.super_user {
        return PermissionLevel::Admin;
    }
    let held: Vec<Role> = owners.iter().filter_map(|g| user.role_in(g)).collect();
    if held.is_empty() {
        PermissionLevel::None
    } else if held.len() < owners.len() {
        PermissionLevel::User
    } else if held.iter().all(|r| *r == Role::Admin) {
        PermissionLevel::Admin
    } else {
        PermissionLevel::UserAllGroups
    }
}

/// Checks that `user_roles` cover every group of `required`.
///
/// An admin role covers any requirement. A user role covers a group only
/// when `admin_only` is false and the required role is not admin.
pub fn ensure_role_subset(user_roles: &Roles, required: &Roles, admin_only: bool) -> bool {
    required.iter().all(|(group, needed)| match user_roles.get(group) {
        None => false,
        Some(Role::Admin) => true,
        Some(Role::User) => !admin_only && *needed != Role::Admin,
    })
}

/// Fails with `Unauthorized` unless `user` may modify a resource owned by
/// `owners`.
///
/// # Errors
///
/// Returns `Unauthorized` when the permission is insufficient.
pub fn authorize_owners(
    owners: &[String],
    user: &User,
    any_owner_can_modify: bool,
) -> SisResult<PermissionLevel> {
    let level = permission_for(owners, user);
    if level.permits(any_owner_can_modify) {
        Ok(level)
    } else {
        Err(SisError::unauthorized(format!(
            "User {} has insufficient privileges ({level}) over owners {owners:?}",
            user.name
        )))
    }
}
