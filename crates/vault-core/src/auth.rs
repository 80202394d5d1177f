//! Capability model: permission checks and object visibility.

use crate::errors::{VaultError, VaultResult};
use crate::models::{Capability, User};

/// Does `user` hold `capability`?
pub fn has_capability(user: &User, capability: Capability) -> bool {
    user.capabilities.contains(&capability)
}

/// Fail with `AuthorizationDenied` unless `user` holds `capability`.
pub fn require_capability(user: &User, capability: Capability, action: &str) -> VaultResult<()> {
    if has_capability(user, capability) {
        Ok(())
    } else {
        Err(VaultError::AuthorizationDenied(format!(
            "You are not permitted to {action}"
        )))
    }
}

/// Is an object shared with `shared_with` (group ids) visible to `user`?
///
/// True when the sets intersect; `access_all_objects` bypasses the test.
pub fn is_visible(user: &User, shared_with: &[i64]) -> bool {
    has_capability(user, Capability::AccessAllObjects)
        || shared_with.iter().any(|gid| user.is_member_of(*gid))
}

/// The visibility scope of a request, used to bind compiled predicates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Viewer {
    group_ids: Vec<i64>,
    unrestricted: bool,
}

impl Viewer {
    pub fn of(user: &User) -> Self {
        Self {
            group_ids: user.group_ids(),
            unrestricted: has_capability(user, Capability::AccessAllObjects),
        }
    }

    pub fn group_ids(&self) -> &[i64] {
        &self.group_ids
    }

    pub fn is_unrestricted(&self) -> bool {
        self.unrestricted
    }
}
