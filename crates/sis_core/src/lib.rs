//! # SIS Core
//!
//! Runtime-defined schemas with authorized, reference-checked CRUD.
//!
//! This crate provides:
//! - A compiler from declarative schema definitions to structural models
//! - Extraction of every reference path in a model, including references
//!   nested in sub-document arrays
//! - Group and role based authorization
//! - A generic mutation pipeline (validate, authorize, resolve, persist,
//!   audit, notify) with per-collection policies
//! - Commit history and hook matching
//! - The [`Registry`] facade over a [`sis_storage::DocumentStore`]

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
mod config;
mod error;
pub mod fields;
pub mod history;
pub mod manager;
pub mod meta;
pub mod notify;
mod registry;
pub mod schema;
mod types;

pub use auth::{PermissionLevel, Role, Roles, User};
pub use config::{Config, MAX_RESULTS};
pub use error::{ErrorPayload, SisError, SisResult};
pub use history::{CommitLogger, CommitRecord, StoreCommitLogger};
pub use manager::{EntityManager, Manager, ManagerContext, ManagerPolicy};
pub use notify::{DispatchError, Hook, HookDispatcher, HookFiring, HookPayload, NoopDispatcher};
pub use registry::Registry;
pub use schema::{CompiledSchema, ReferenceDescriptor, ReferenceKind, Schema, SchemaCatalog};
pub use types::{DeleteOptions, Event, ListResult};
