//! # SIS Storage
//!
//! Document store trait and implementations for SIS.
//!
//! This crate is the persistence seam of the system. A store keeps named
//! collections of JSON documents and offers:
//!
//! - insert / find / update / delete by filter
//! - a uniqueness constraint on declared fields
//! - expiry of documents by a timestamp field
//!
//! The store knows nothing about schemas, owners or references. SIS performs
//! validation, authorization and reference checks before a write ever
//! reaches a [`DocumentStore`].
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and embedding
//!
//! ## Example
//!
//! ```rust,ignore
//! use sis_storage::{DocumentStore, Filter, InMemoryStore, Page};
//! use serde_json::json;
//!
//! let store = InMemoryStore::new();
//! let doc = json!({ "name": "foo" }).as_object().cloned().unwrap();
//! let saved = store.insert("things", doc).await?;
//! let found = store.find("things", &Filter::new().eq("name", "foo"), Page::all()).await?;
//! assert_eq!(found.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod filter;
mod id;
mod memory;

pub use backend::{CollectionOptions, Document, DocumentStore, ID_FIELD};
pub use error::{StorageError, StorageResult};
pub use filter::{values_at, Filter, Page};
pub use id::DocumentId;
pub use memory::InMemoryStore;
