//! `Vault` facade: the request-level entry points over the store and query
//! layers.
//!
//! Every operation takes the caller's [`User`] explicitly; there is no
//! ambient request state.

mod annotations;
mod objects;

use std::sync::Arc;

use tracing::info;

use crate::auth::require_capability;
use crate::config::VaultConfig;
use crate::errors::{VaultError, VaultResult};
use crate::hooks::{NoopHooks, ObjectHooks};
use crate::models::{Capability, Group, MetakeyDefinition, User};
use crate::query::planner::QueryPlanner;
use crate::store::database::Database;
use crate::store::{metakeys, sharing};

pub struct Vault {
    config: VaultConfig,
    db: Database,
    planner: QueryPlanner,
    hooks: Arc<dyn ObjectHooks>,
}

impl Vault {
    /// Open (and initialise) the store described by `config`.
    ///
    /// The configured public group is created when missing.
    pub fn open(config: VaultConfig) -> VaultResult<Self> {
        let db = Database::new(&config)?;
        db.init_schema()?;
        db.with_immediate_tx(|tx| {
            if sharing::resolve_group(tx, &config.public_group)?.is_none() {
                sharing::create_group(tx, &config.public_group, false, false)?;
            }
            Ok(())
        })?;
        let planner = QueryPlanner::from_config(&config);
        Ok(Self {
            config,
            db,
            planner,
            hooks: Arc::new(NoopHooks),
        })
    }

    /// Replace the post-commit notification receiver.
    pub fn with_hooks(mut self, hooks: Arc<dyn ObjectHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Resolve the request context for `login`.
    pub fn authenticate(&self, login: &str) -> VaultResult<User> {
        let login = login.trim();
        if login.is_empty() {
            return Err(VaultError::AuthenticationRequired);
        }
        self.db
            .with_conn(|conn| sharing::load_user(conn, login))?
            .ok_or(VaultError::AuthenticationRequired)
    }

    // -----------------------------------------------------------------------
    // Registry administration
    // -----------------------------------------------------------------------

    /// Create a user holding every capability, for initial provisioning.
    pub fn bootstrap_admin(&self, login: &str) -> VaultResult<User> {
        let public_group = self.config.public_group.clone();
        self.db.with_immediate_tx(|tx| {
            sharing::create_user(tx, login, &public_group)?;
            for capability in Capability::ALL {
                sharing::grant_capability(tx, login.trim(), capability)?;
            }
            Ok(())
        })?;
        info!(login, "admin account created");
        self.authenticate(login)
    }

    pub fn create_user(&self, actor: &User, login: &str) -> VaultResult<User> {
        require_capability(actor, Capability::ManageUsers, "manage users")?;
        let public_group = self.config.public_group.clone();
        self.db
            .with_immediate_tx(|tx| sharing::create_user(tx, login, &public_group))?;
        info!(login, "user created");
        self.authenticate(login)
    }

    pub fn create_group(&self, actor: &User, name: &str) -> VaultResult<Group> {
        require_capability(actor, Capability::ManageUsers, "manage groups")?;
        let group = self
            .db
            .with_immediate_tx(|tx| sharing::create_group(tx, name, false, false))?;
        info!(group = %group.name, "group created");
        Ok(group)
    }

    /// Request a new group. It stays pending, and grants nothing, until an
    /// administrator approves it. The requester becomes its first member.
    pub fn request_group(&self, user: &User, name: &str) -> VaultResult<Group> {
        let group = self.db.with_immediate_tx(|tx| {
            let group = sharing::create_group(tx, name, true, false)?;
            sharing::add_member(tx, &group.name, &user.login)?;
            Ok(group)
        })?;
        info!(group = %group.name, requester = %user.login, "group requested");
        Ok(group)
    }

    pub fn approve_group(&self, actor: &User, name: &str) -> VaultResult<Group> {
        require_capability(actor, Capability::ManageUsers, "manage groups")?;
        let group = self
            .db
            .with_immediate_tx(|tx| sharing::approve_group(tx, name))?;
        info!(group = %group.name, "group approved");
        Ok(group)
    }

    pub fn add_member(&self, actor: &User, group_name: &str, login: &str) -> VaultResult<()> {
        require_capability(actor, Capability::ManageUsers, "manage groups")?;
        self.db
            .with_immediate_tx(|tx| sharing::add_member(tx, group_name, login))
    }

    pub fn grant_capability(
        &self,
        actor: &User,
        group_name: &str,
        capability: Capability,
    ) -> VaultResult<()> {
        require_capability(actor, Capability::ManageUsers, "manage groups")?;
        self.db
            .with_immediate_tx(|tx| sharing::grant_capability(tx, group_name, capability))?;
        info!(group = group_name, capability = capability.as_str(), "capability granted");
        Ok(())
    }

    pub fn define_metakey(&self, actor: &User, definition: &MetakeyDefinition) -> VaultResult<()> {
        require_capability(actor, Capability::ManageUsers, "manage attribute keys")?;
        self.db
            .with_immediate_tx(|tx| metakeys::define(tx, definition))
    }

    pub fn set_metakey_permission(
        &self,
        actor: &User,
        key: &str,
        group_name: &str,
        can_read: bool,
        can_set: bool,
    ) -> VaultResult<()> {
        require_capability(actor, Capability::ManageUsers, "manage attribute keys")?;
        self.db.with_immediate_tx(|tx| {
            metakeys::set_permission(tx, key, group_name, can_read, can_set)
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::fixture;
    use super::*;

    #[test]
    fn unknown_logins_are_unauthenticated() {
        let fx = fixture();
        assert!(matches!(
            fx.vault.authenticate("ghost"),
            Err(VaultError::AuthenticationRequired)
        ));
        assert!(matches!(
            fx.vault.authenticate(""),
            Err(VaultError::AuthenticationRequired)
        ));
    }

    #[test]
    fn new_users_join_public_and_private_groups() {
        let fx = fixture();
        let alice = fx.user("alice", &["teamA"]);
        let names: Vec<_> = alice.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"public") && names.contains(&"alice") && names.contains(&"teamA"));
        assert!(alice.capabilities.is_empty());
    }

    #[test]
    fn administration_requires_manage_users() {
        let fx = fixture();
        let alice = fx.user("alice", &[]);
        let err = fx.vault.create_user(&alice, "mallory").unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(
            fx.vault.create_group(&alice, "mine").unwrap_err().status_code(),
            403
        );
    }

    #[test]
    fn capabilities_are_the_union_of_group_grants() {
        let fx = fixture();
        fx.user("alice", &["teamA"]);
        fx.vault
            .grant_capability(&fx.admin, "teamA", Capability::AddingParents)
            .unwrap();
        let alice = fx.grant("alice", Capability::SharingObjects);
        assert!(alice.capabilities.contains(&Capability::AddingParents));
        assert!(alice.capabilities.contains(&Capability::SharingObjects));
    }

    #[test]
    fn requested_groups_stay_pending_until_approved() {
        let fx = fixture();
        let alice = fx.user("alice", &[]);
        let group = fx.vault.request_group(&alice, "research").unwrap();
        assert!(group.pending_group);
        let alice = fx.vault.authenticate("alice").unwrap();
        assert!(!alice.groups.iter().any(|g| g.name == "research"));

        fx.vault.approve_group(&fx.admin, "research").unwrap();
        let alice = fx.vault.authenticate("alice").unwrap();
        assert!(alice.groups.iter().any(|g| g.name == "research"));
    }

    #[test]
    fn reopening_keeps_the_public_group() {
        let fx = fixture();
        let again = Vault::open(fx.vault.config().clone()).unwrap();
        let bob = again.create_user(&fx.admin, "bob").unwrap();
        assert!(bob.groups.iter().any(|g| g.name == "public"));
    }
}
