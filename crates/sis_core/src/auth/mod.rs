//! Group and role based authorization.
//!
//! Everything here is a pure function of a [`User`] and the owner groups of
//! a resource; the per-collection policies decide which owners apply.

mod permission;
mod user;

pub use permission::{authorize_owners, ensure_role_subset, permission_for, PermissionLevel};
pub use user::{parse_roles, Role, Roles, User};
