//! User records in `sis_users`.

use crate::auth::{ensure_role_subset, User};
use crate::error::{SisError, SisResult};
use crate::fields::SCHEMA_USERS;
use crate::manager::context::ManagerContext;
use crate::manager::policy::ManagerPolicy;
use crate::schema::CompiledModel;
use crate::types::Event;
use async_trait::async_trait;
use sis_storage::Document;
use std::sync::Arc;

/// Pipeline stages for user records.
///
/// Only super users manage super users. Anyone else needs the admin role
/// in every group the target holds a role in, before and after the change.
/// A user may edit their own record as long as their roles stay the same.
#[derive(Debug, Clone)]
pub struct UserPolicy {
    model: Arc<CompiledModel>,
}

impl UserPolicy {
    /// Creates the policy with the built-in `sis_users` model.
    pub fn new(model: Arc<CompiledModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ManagerPolicy for UserPolicy {
    fn collection(&self) -> &str {
        SCHEMA_USERS
    }

    fn id_field(&self) -> &str {
        "name"
    }

    fn model(&self) -> &CompiledModel {
        &self.model
    }

    fn track_history(&self) -> bool {
        true
    }

    async fn validate(
        &self,
        _ctx: &Arc<ManagerContext>,
        doc: &mut Document,
        stored: Option<&Document>,
    ) -> SisResult<()> {
        let user = User::from_document(doc)?;
        if user.roles.is_empty() && !user.super_user {
            return Err(SisError::bad_request("roles cannot be empty"));
        }
        if let Some(stored) = stored {
            if stored.get("name") != doc.get("name") {
                return Err(SisError::bad_request("User name cannot be changed"));
            }
        }
        Ok(())
    }

    fn authorize(
        &self,
        event: Event,
        stored: Option<&Document>,
        merged: &Document,
        caller: &User,
    ) -> SisResult<()> {
        let target = User::from_document(merged)?;
        let previous = stored.map(User::from_document).transpose()?;

        if target.super_user || previous.as_ref().is_some_and(|p| p.super_user) {
            return Err(SisError::unauthorized(
                "Only super users may manage super users.",
            ));
        }
        if let Some(previous) = &previous {
            if event == Event::Update
                && previous.name == caller.name
                && previous.roles == target.roles
            {
                return Ok(());
            }
        }
        if !caller.is_admin_anywhere() {
            return Err(SisError::unauthorized(format!(
                "User {} is not an admin of any group.",
                caller.name
            )));
        }
        let covers_new = ensure_role_subset(&caller.roles, &target.roles, true);
        let covers_old = match &previous {
            Some(p) => ensure_role_subset(&caller.roles, &p.roles, true),
            None => true,
        };
        if covers_new && covers_old {
            Ok(())
        } else {
            Err(SisError::unauthorized(format!(
                "User {} must be an admin of every group of {}.",
                caller.name, target.name
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::schema::SchemaCatalog;
    use serde_json::{json, Value};

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn policy() -> UserPolicy {
        let catalog = SchemaCatalog::new(8).unwrap();
        UserPolicy::new(Arc::clone(&catalog.builtin(SCHEMA_USERS).unwrap().model))
    }

    #[test]
    fn admins_manage_users_of_their_groups() {
        let admin = User::new("admin1").with_role("g1", Role::Admin);
        let in_group = doc(json!({ "name": "u1", "roles": { "g1": "user" } }));
        let elsewhere = doc(json!({ "name": "u2", "roles": { "g2": "user" } }));

        policy().authorize(Event::Insert, None, &in_group, &admin).unwrap();
        let err = policy()
            .authorize(Event::Insert, None, &elsewhere, &admin)
            .unwrap_err();
        assert_eq!(err.status(), 401);
    }

    #[test]
    fn super_users_are_out_of_reach() {
        let admin = User::new("admin1").with_role("g1", Role::Admin);
        let promoted = doc(json!({ "name": "u1", "roles": { "g1": "user" }, "super_user": true }));
        assert!(policy().authorize(Event::Insert, None, &promoted, &admin).is_err());
    }

    #[test]
    fn users_edit_themselves_but_not_their_roles() {
        let me = User::new("u1").with_role("g1", Role::User);
        let stored = doc(json!({ "name": "u1", "email": "a@b.io", "roles": { "g1": "user" } }));
        let renamed = doc(json!({ "name": "u1", "email": "c@d.io", "roles": { "g1": "user" } }));
        let raised = doc(json!({ "name": "u1", "roles": { "g1": "admin" } }));

        policy().authorize(Event::Update, Some(&stored), &renamed, &me).unwrap();
        assert!(policy().authorize(Event::Update, Some(&stored), &raised, &me).is_err());
    }
}
