//! Core type definitions for SIS.

use serde::{Deserialize, Serialize};
use sis_storage::Document;
use std::fmt;

/// Kind of mutation applied to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Event {
    /// Document was inserted.
    Insert,
    /// Document was updated.
    Update,
    /// Document was deleted.
    Delete,
}

impl Event {
    /// Every event, in declaration order.
    pub const ALL: [Event; 3] = [Event::Insert, Event::Update, Event::Delete];

    /// Returns the wire name of the event.
    pub const fn as_str(self) -> &'static str {
        match self {
            Event::Insert => "insert",
            Event::Update => "update",
            Event::Delete => "delete",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options accepted by delete operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Delete even when dependent data still exists (a schema with live
    /// entities).
    pub force: bool,
}

impl DeleteOptions {
    /// Options for a forced delete.
    #[must_use]
    pub const fn forced() -> Self {
        Self { force: true }
    }
}

/// One page of a list call together with the total number of matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListResult {
    /// Documents in the requested page.
    pub items: Vec<Document>,
    /// Number of documents matching the filter across all pages.
    pub total: u64,
}
