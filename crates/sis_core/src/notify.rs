//! Hook matching and the dispatcher seam.
//!
//! The core only decides *that* a hook fires and with what payload. Delivery,
//! including retries per the hook's `retry_count`/`retry_delay`, belongs to
//! the [`HookDispatcher`].

use crate::error::{SisError, SisResult};
use crate::fields::SCHEMA_HOOKS;
use crate::meta;
use crate::types::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sis_storage::{Document, DocumentStore, Filter, Page};
use std::fmt;
use thiserror::Error;

/// Delivery target of a hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookTarget {
    /// Endpoint URL.
    pub url: String,
    /// HTTP method (`GET`, `POST` or `PUT`).
    pub action: String,
}

/// A stored hook definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    /// Unique hook name.
    pub name: String,
    /// Where to deliver.
    pub target: HookTarget,
    /// Delivery attempts after the first failure.
    #[serde(default)]
    pub retry_count: u32,
    /// Seconds between attempts.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u32,
    /// Events the hook fires on.
    pub events: Vec<Event>,
    /// Collection the hook watches.
    pub entity_type: String,
    /// Owner groups (`_sis.owner`).
    #[serde(skip)]
    pub owner: Vec<String>,
}

fn default_retry_delay() -> u32 {
    1
}

impl Hook {
    /// Reads a hook from its stored document.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the document is not a valid hook.
    pub fn from_document(doc: &Document) -> SisResult<Self> {
        let mut hook: Hook = serde_json::from_value(Value::Object(doc.clone()))
            .map_err(|e| SisError::bad_request(format!("invalid hook: {e}")))?;
        hook.owner = meta::owners(doc).unwrap_or_default();
        Ok(hook)
    }
}

/// Body handed to the hook target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookPayload {
    /// Name of the firing hook.
    pub hook: String,
    /// Collection of the mutated document.
    pub entity_type: String,
    /// Kind of mutation.
    pub event: Event,
    /// The document after the mutation (before it, for deletes).
    pub data: Document,
    /// Acting user.
    pub actor: Option<String>,
}

/// One hook to deliver.
#[derive(Debug, Clone, PartialEq)]
pub struct HookFiring {
    /// The hook definition, including retry settings.
    pub hook: Hook,
    /// What to deliver.
    pub payload: HookPayload,
}

/// A dispatcher rejected a firing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("hook dispatch failed: {0}")]
pub struct DispatchError(pub String);

/// Consumer of hook firings.
///
/// `dispatch` must not block on delivery: it hands the firing off and
/// returns. An error is logged and never undoes the mutation.
pub trait HookDispatcher: Send + Sync {
    /// Accepts a firing for delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the firing could not be accepted.
    fn dispatch(&self, firing: HookFiring) -> Result<(), DispatchError>;
}

/// Dispatcher that drops every firing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDispatcher;

impl HookDispatcher for NoopDispatcher {
    fn dispatch(&self, _firing: HookFiring) -> Result<(), DispatchError> {
        Ok(())
    }
}

/// Returns the hooks watching `collection` for `event`.
///
/// Documents that no longer parse as hooks are skipped.
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn matching_hooks(
    store: &dyn DocumentStore,
    collection: &str,
    event: Event,
) -> SisResult<Vec<Hook>> {
    let filter = Filter::new()
        .eq("entity_type", collection)
        .eq("events", event.as_str());
    let docs = store.find(SCHEMA_HOOKS, &filter, Page::all()).await?;
    Ok(docs
        .iter()
        .filter_map(|doc| Hook::from_document(doc).ok())
        .collect())
}

/// Builds the firings of `hooks` for one mutation.
pub fn firings(
    hooks: Vec<Hook>,
    collection: &str,
    event: Event,
    data: &Document,
    actor: Option<&str>,
) -> Vec<HookFiring> {
    hooks
        .into_iter()
        .map(|hook| HookFiring {
            payload: HookPayload {
                hook: hook.name.clone(),
                entity_type: collection.to_string(),
                event,
                data: data.clone(),
                actor: actor.map(str::to_string),
            },
            hook,
        })
        .collect()
}

impl fmt::Display for HookFiring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} -> {} {}",
            self.hook.name,
            self.payload.entity_type,
            self.payload.event,
            self.hook.target.action,
            self.hook.target.url
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sis_storage::InMemoryStore;

    fn hook_doc(name: &str, entity_type: &str, events: Value) -> Document {
        match json!({
            "name": name,
            "target": { "url": "http://example.com/hook", "action": "POST" },
            "events": events,
            "entity_type": entity_type,
            "_sis": { "owner": ["g1"] }
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn hook_from_document() {
        let hook = Hook::from_document(&hook_doc("h", "s", json!(["insert"]))).unwrap();
        assert_eq!(hook.retry_delay, 1);
        assert_eq!(hook.retry_count, 0);
        assert_eq!(hook.owner, ["g1"]);
        assert_eq!(hook.events, [Event::Insert]);
    }

    #[tokio::test]
    async fn matching_by_entity_type_and_event() {
        let store = InMemoryStore::new();
        for doc in [
            hook_doc("on_insert", "s", json!(["insert"])),
            hook_doc("on_all", "s", json!(["insert", "update", "delete"])),
            hook_doc("other", "t", json!(["insert"])),
        ] {
            store.insert(SCHEMA_HOOKS, doc).await.unwrap();
        }

        let names = |hooks: Vec<Hook>| hooks.into_iter().map(|h| h.name).collect::<Vec<_>>();
        assert_eq!(
            names(matching_hooks(&store, "s", Event::Insert).await.unwrap()),
            ["on_insert", "on_all"]
        );
        assert_eq!(
            names(matching_hooks(&store, "s", Event::Delete).await.unwrap()),
            ["on_all"]
        );
        assert!(matching_hooks(&store, "u", Event::Insert).await.unwrap().is_empty());
    }

    #[test]
    fn firings_carry_payload() {
        let hook = Hook::from_document(&hook_doc("h", "s", json!(["update"]))).unwrap();
        let data = match json!({ "name": "x" }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let out = firings(vec![hook], "s", Event::Update, &data, Some("alice"));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload.actor.as_deref(), Some("alice"));
        assert_eq!(out[0].payload.data["name"], "x");
        assert!(NoopDispatcher.dispatch(out[0].clone()).is_ok());
    }
}
