//! The generic mutation pipeline.

use crate::auth::User;
use crate::error::{SisError, SisResult};
use crate::fields::{ID_FIELD, IMMUTABLE};
use crate::history::CommitRecord;
use crate::manager::context::ManagerContext;
use crate::manager::merge::apply_update;
use crate::manager::policy::ManagerPolicy;
use crate::meta;
use crate::notify::{firings, matching_hooks};
use crate::schema::{validate_document, ValidationMode};
use crate::types::{DeleteOptions, Event, ListResult};
use serde_json::Value;
use sis_storage::{Document, DocumentId, Filter, Page};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn, Instrument, Span};

/// Collection-agnostic CRUD over one collection.
///
/// Every mutation runs validate → authorize → resolve → persist → audit →
/// notify. All stages before persist are read-only against the store and
/// run under the configured operation timeout, so a failure or timeout
/// leaves nothing written. Post-persist, audit and notify failures are
/// logged and never undo a persisted mutation.
pub struct Manager<P> {
    policy: P,
    ctx: Arc<ManagerContext>,
    span: Span,
}

impl<P: ManagerPolicy> Manager<P> {
    /// Creates a manager for `policy`'s collection.
    pub fn new(policy: P, ctx: Arc<ManagerContext>) -> Self {
        let span = tracing::debug_span!(
            parent: &ctx.span,
            "manager",
            collection = %policy.collection()
        );
        Self { policy, ctx, span }
    }

    /// Returns the policy.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Returns the shared context.
    pub fn context(&self) -> &Arc<ManagerContext> {
        &self.ctx
    }

    /// Returns the backing collection.
    pub fn collection(&self) -> &str {
        self.policy.collection()
    }

    /// Returns the document addressed by `id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing matches, including ids that cannot be
    /// parsed.
    pub async fn get(&self, id: &str) -> SisResult<Document> {
        self.find(id)
            .instrument(self.span.clone())
            .await?
            .ok_or_else(|| self.not_found(id))
    }

    /// Returns true if a document is addressed by `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn exists(&self, id: &str) -> SisResult<bool> {
        Ok(self.find(id).instrument(self.span.clone()).await?.is_some())
    }

    /// Returns one page of the documents matching `filter`, with the total
    /// count. The page size is capped by `max_results`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list(&self, filter: &Filter, page: Page) -> SisResult<ListResult> {
        let page = page.clamp(self.ctx.config.max_results);
        async {
            let items = self.ctx.store.find(self.collection(), filter, page).await?;
            let total = self.ctx.store.count(self.collection(), filter).await?;
            Ok::<_, SisError>(ListResult { items, total })
        }
        .instrument(self.span.clone())
        .await
    }

    /// Creates a document.
    ///
    /// # Errors
    ///
    /// `BadRequest` for invalid input, broken references or unique field
    /// collisions, `Unauthorized` when the user may not create it.
    pub async fn add(&self, doc: Document, user: Option<&User>) -> SisResult<Document> {
        self.add_inner(doc, user).instrument(self.span.clone()).await
    }

    /// Applies a partial update to the document addressed by `id`.
    ///
    /// # Errors
    ///
    /// As [`Manager::add`], plus `NotFound` for an unknown id.
    pub async fn update(
        &self,
        id: &str,
        partial: Document,
        user: Option<&User>,
    ) -> SisResult<Document> {
        self.update_inner(id, partial, user)
            .instrument(self.span.clone())
            .await
    }

    /// Deletes the document addressed by `id` and returns it.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `BadRequest` for locked or immutable
    /// documents, `Unauthorized` when the user may not delete it.
    pub async fn delete(&self, id: &str, user: Option<&User>) -> SisResult<Document> {
        self.delete_with(id, user, DeleteOptions::default()).await
    }

    /// Deletes with explicit options.
    ///
    /// # Errors
    ///
    /// See [`Manager::delete`].
    pub async fn delete_with(
        &self,
        id: &str,
        user: Option<&User>,
        options: DeleteOptions,
    ) -> SisResult<Document> {
        self.delete_inner(id, user, options)
            .instrument(self.span.clone())
            .await
    }

    async fn add_inner(&self, doc: Document, user: Option<&User>) -> SisResult<Document> {
        self.ensure_writable()?;
        let prepared = self.bounded(self.prepare_insert(doc, user)).await?;

        let saved = self.ctx.store.insert(self.collection(), prepared).await?;
        debug!(stage = "persist", event = %Event::Insert, "document inserted");

        self.after_save(Event::Insert, &saved).await;
        self.record(Event::Insert, None, Some(&saved), user).await;
        self.notify(Event::Insert, &saved, user).await;
        Ok(saved)
    }

    async fn prepare_insert(&self, mut doc: Document, user: Option<&User>) -> SisResult<Document> {
        meta::sanitize_input(&mut doc, Event::Insert)?;
        self.policy.prepare(Event::Insert, &mut doc)?;
        validate_document(self.policy.model(), &mut doc, ValidationMode::Full)?;
        self.policy.validate(&self.ctx, &mut doc, None).await?;
        debug!(stage = "validate", event = %Event::Insert, "document validated");

        self.authorize(Event::Insert, None, &doc, user)?;
        self.policy.resolve(&self.ctx, &doc).await?;
        debug!(stage = "resolve", event = %Event::Insert, "references resolved");

        meta::stamp_insert(&mut doc, actor(user), meta::now_millis());
        Ok(doc)
    }

    async fn update_inner(
        &self,
        id: &str,
        partial: Document,
        user: Option<&User>,
    ) -> SisResult<Document> {
        self.ensure_writable()?;
        let (stored, merged) = self.bounded(self.prepare_update(id, partial, user)).await?;

        let saved = self
            .ctx
            .store
            .update_one(self.collection(), &oid_filter(&stored), merged)
            .await?
            .ok_or_else(|| self.not_found(id))?;
        debug!(stage = "persist", event = %Event::Update, "document updated");

        self.after_save(Event::Update, &saved).await;
        self.record(Event::Update, Some(&stored), Some(&saved), user)
            .await;
        self.notify(Event::Update, &saved, user).await;
        Ok(saved)
    }

    async fn prepare_update(
        &self,
        id: &str,
        mut partial: Document,
        user: Option<&User>,
    ) -> SisResult<(Document, Document)> {
        let stored = self.find(id).await?.ok_or_else(|| self.not_found(id))?;

        meta::sanitize_input(&mut partial, Event::Update)?;
        self.policy.prepare(Event::Update, &mut partial)?;
        validate_document(self.policy.model(), &mut partial, ValidationMode::Partial)?;
        if meta::is_immutable(&stored) && !clears_immutable(&partial) {
            return Err(SisError::bad_request(format!(
                "{} {id} is immutable",
                self.collection()
            )));
        }

        let mut merged = apply_update(self.policy.model(), &stored, &partial);
        validate_document(self.policy.model(), &mut merged, ValidationMode::Full)?;
        self.policy
            .validate(&self.ctx, &mut merged, Some(&stored))
            .await?;
        debug!(stage = "validate", event = %Event::Update, "document validated");

        self.authorize(Event::Update, Some(&stored), &merged, user)?;
        self.policy.resolve(&self.ctx, &merged).await?;
        debug!(stage = "resolve", event = %Event::Update, "references resolved");

        meta::stamp_update(&mut merged, &stored, actor(user), meta::now_millis());
        Ok((stored, merged))
    }

    async fn delete_inner(
        &self,
        id: &str,
        user: Option<&User>,
        options: DeleteOptions,
    ) -> SisResult<Document> {
        self.ensure_writable()?;
        let stored = self.bounded(self.prepare_delete(id, user, options)).await?;

        let removed = self
            .ctx
            .store
            .delete(self.collection(), &oid_filter(&stored))
            .await?;
        if removed == 0 {
            return Err(self.not_found(id));
        }
        debug!(stage = "persist", event = %Event::Delete, "document deleted");

        if let Err(err) = self.policy.after_delete(&self.ctx, &stored).await {
            warn!(event = %Event::Delete, error = %err, "post-delete stage failed");
        }
        self.record(Event::Delete, Some(&stored), None, user).await;
        self.notify(Event::Delete, &stored, user).await;
        Ok(stored)
    }

    async fn prepare_delete(
        &self,
        id: &str,
        user: Option<&User>,
        options: DeleteOptions,
    ) -> SisResult<Document> {
        let stored = self.find(id).await?.ok_or_else(|| self.not_found(id))?;
        if meta::is_locked(&stored) {
            return Err(SisError::bad_request(format!(
                "{} {id} is locked",
                self.collection()
            )));
        }
        if meta::is_immutable(&stored) {
            return Err(SisError::bad_request(format!(
                "{} {id} is immutable",
                self.collection()
            )));
        }
        self.authorize(Event::Delete, Some(&stored), &stored, user)?;
        self.policy.before_delete(&self.ctx, &stored, options).await?;
        Ok(stored)
    }

    fn authorize(
        &self,
        event: Event,
        stored: Option<&Document>,
        merged: &Document,
        user: Option<&User>,
    ) -> SisResult<()> {
        if !self.ctx.config.auth {
            return Ok(());
        }
        let user = user.ok_or_else(|| SisError::unauthorized("Authentication required."))?;
        if !user.super_user {
            self.policy.authorize(event, stored, merged, user)?;
        }
        debug!(stage = "authorize", event = %event, user = %user.name, "authorized");
        Ok(())
    }

    async fn find(&self, id: &str) -> SisResult<Option<Document>> {
        let filter = if self.policy.id_field() == ID_FIELD {
            // an id that does not parse cannot match anything
            match DocumentId::parse(id) {
                Ok(oid) => Filter::by_id(&oid),
                Err(_) => return Ok(None),
            }
        } else {
            Filter::new().eq(self.policy.id_field(), id)
        };
        Ok(self.ctx.store.find_one(self.collection(), &filter).await?)
    }

    async fn bounded<T>(&self, stages: impl Future<Output = SisResult<T>>) -> SisResult<T> {
        match self.ctx.config.operation_timeout {
            None => stages.await,
            Some(limit) => tokio::time::timeout(limit, stages).await.map_err(|_| {
                SisError::internal(format!(
                    "{} operation timed out after {limit:?}",
                    self.collection()
                ))
            })?,
        }
    }

    async fn after_save(&self, event: Event, saved: &Document) {
        if let Err(err) = self.policy.after_save(&self.ctx, event, saved).await {
            warn!(event = %event, error = %err, "post-save stage failed");
        }
    }

    async fn record(
        &self,
        event: Event,
        before: Option<&Document>,
        after: Option<&Document>,
        user: Option<&User>,
    ) {
        if !self.ctx.config.log_commits || !self.policy.track_history() {
            return;
        }
        let record = CommitRecord::of(
            self.collection(),
            self.policy.id_field(),
            event,
            before,
            after,
            actor(user),
            meta::now_millis(),
        );
        if let Err(err) = self.ctx.commits.append(record).await {
            warn!(event = %event, error = %err, "failed to append commit record");
        }
    }

    async fn notify(&self, event: Event, doc: &Document, user: Option<&User>) {
        if !self.ctx.config.fire_hooks {
            return;
        }
        let hooks = match matching_hooks(self.ctx.store.as_ref(), self.collection(), event).await {
            Ok(hooks) => hooks,
            Err(err) => {
                warn!(event = %event, error = %err, "failed to look up hooks");
                return;
            }
        };
        for firing in firings(hooks, self.collection(), event, doc, actor(user)) {
            let hook = firing.hook.name.clone();
            match self.ctx.dispatcher.dispatch(firing) {
                Ok(()) => debug!(stage = "notify", hook = %hook, "hook dispatched"),
                Err(err) => warn!(hook = %hook, error = %err, "hook dispatch failed"),
            }
        }
    }

    fn ensure_writable(&self) -> SisResult<()> {
        if self.ctx.config.readonly {
            return Err(SisError::bad_request("SIS is in readonly mode"));
        }
        Ok(())
    }

    fn not_found(&self, id: &str) -> SisError {
        SisError::not_found(self.collection(), id)
    }
}

impl<P: ManagerPolicy> std::fmt::Debug for Manager<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("collection", &self.policy.collection())
            .finish_non_exhaustive()
    }
}

fn actor(user: Option<&User>) -> Option<&str> {
    user.map(|u| u.name.as_str())
}

fn oid_filter(doc: &Document) -> Filter {
    Filter::new().eq(ID_FIELD, doc.get(ID_FIELD).cloned().unwrap_or(Value::Null))
}

fn clears_immutable(partial: &Document) -> bool {
    meta::meta(partial)
        .and_then(|m| m.get(IMMUTABLE))
        .is_some_and(|v| matches!(v, Value::Null | Value::Bool(false)))
}
