//! Managers: the generic mutation pipeline and its per-collection policies.
//!
//! A [`Manager`] owns the order of the stages; a [`ManagerPolicy`] supplies
//! what differs between collections. Entities of user schemas use
//! [`EntityPolicy`], the built-in collections use the other policies.

mod context;
mod entity;
mod hiera;
mod hooks;
mod merge;
mod pipeline;
mod policy;
mod schema;
mod users;

pub use context::ManagerContext;
pub use entity::{EntityManager, EntityPolicy};
pub use hiera::HieraPolicy;
pub use hooks::HookPolicy;
pub use merge::apply_update;
pub use pipeline::Manager;
pub use policy::{authorize_by_owner, ManagerPolicy};
pub use schema::SchemaPolicy;
pub use users::UserPolicy;

/// Manager of `sis_schemas`.
pub type SchemaManager = Manager<SchemaPolicy>;
/// Manager of `sis_hooks`.
pub type HookManager = Manager<HookPolicy>;
/// Manager of `sis_hiera`.
pub type HieraManager = Manager<HieraPolicy>;
/// Manager of `sis_users`.
pub type UserManager = Manager<UserPolicy>;
