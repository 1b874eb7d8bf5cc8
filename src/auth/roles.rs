// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Roles for authorization.
//!
//! Roles are data, not code: any number can be created at runtime. Two are
//! built in and created at startup.
//!
//! ## Built-in Roles
//!
//! - `admin` - user and role administration, audit log access
//! - `user` - own account, sessions and password only

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::storage::{RoleRepository, Store, StoreResult, StoredRole};

pub const ADMIN_ROLE: &str = "admin";
pub const USER_ROLE: &str = "user";

const BUILTIN_ROLES: [(&str, &str); 2] = [
    (ADMIN_ROLE, "Full administrative access"),
    (USER_ROLE, "Standard portal user"),
];

/// Create the built-in roles if they are missing.
pub fn ensure_builtin_roles(store: &Store, now: DateTime<Utc>) -> StoreResult<Vec<StoredRole>> {
    let repo = RoleRepository::new(store);
    BUILTIN_ROLES
        .iter()
        .map(|(name, description)| repo.ensure(name, description, now))
        .collect()
}

/// Resolve a user's role reference to a live role record.
///
/// A deleted or missing role resolves to `None`.
pub fn resolve_role(store: &Store, role_id: &str) -> StoreResult<Option<StoredRole>> {
    match RoleRepository::new(store).get(role_id) {
        Ok(role) if !role.deleted => Ok(Some(role)),
        Ok(_) | Err(crate::storage::StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Set of role names allowed through a capability gate.
#[derive(Debug, Clone)]
pub struct AllowedRoles(Arc<[String]>);

impl AllowedRoles {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(roles.into_iter().map(Into::into).collect())
    }

    pub fn admin_only() -> Self {
        Self::new([ADMIN_ROLE])
    }

    /// Case-insensitive membership test.
    pub fn permits(&self, role: &str) -> bool {
        self.0.iter().any(|allowed| allowed.eq_ignore_ascii_case(role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_store;

    #[test]
    fn permits_ignores_case() {
        let allowed = AllowedRoles::new(["admin", "Evaluator"]);
        assert!(allowed.permits("ADMIN"));
        assert!(allowed.permits("evaluator"));
        assert!(!allowed.permits("user"));
        assert!(!AllowedRoles::new(Vec::<String>::new()).permits("admin"));
    }

    #[test]
    fn builtin_roles_are_created_once() {
        let (store, _dir) = temp_store();
        let first = ensure_builtin_roles(&store, Utc::now()).unwrap();
        let second = ensure_builtin_roles(&store, Utc::now()).unwrap();
        assert_eq!(first, second);
        assert_eq!(RoleRepository::new(&store).list(true).unwrap().len(), 2);
    }

    #[test]
    fn deleted_or_missing_role_does_not_resolve() {
        let (store, _dir) = temp_store();
        let repo = RoleRepository::new(&store);
        let role = StoredRole::new("temp", "", Utc::now());
        repo.create(&role).unwrap();

        assert_eq!(resolve_role(&store, &role.id).unwrap().unwrap().name, "temp");
        repo.soft_delete(&role.id).unwrap();
        assert!(resolve_role(&store, &role.id).unwrap().is_none());
        assert!(resolve_role(&store, "missing").unwrap().is_none());
    }
}
