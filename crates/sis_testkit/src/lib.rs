//! # SIS Testkit
//!
//! Test utilities for SIS.
//!
//! This crate provides:
//! - A wired in-memory registry with a recording hook dispatcher
//! - Canned users and schema helpers
//! - A store wrapper that delays reads, for timeout tests
//! - Property-based test generators using proptest
//! - Test logging bootstrap
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sis_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn creates_entities() {
//!     let t = TestRegistry::new().await;
//!     t.add_schema(schema("hosts", &["test_group1"], json!({ "name": "String" }))).await;
//!     let host = t.add_entity("hosts", json!({ "name": "web01" }), &superman()).await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use serde_json::json;
}

pub use fixtures::*;
pub use generators::*;
