// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Role records. Deletion is logical and refused while any user holds the role.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};

use super::users::StoredUser;
use super::{from_json, to_json, Store, StoreError, StoreResult, ROLES, ROLE_NAMES, USERS};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredRole {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl StoredRole {
    pub fn new(name: &str, description: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            description: description.trim().to_string(),
            deleted: false,
            created_at: now,
        }
    }
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

pub struct RoleRepository<'a> {
    store: &'a Store,
}

impl<'a> RoleRepository<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Insert a role. Names are unique ignoring case, deleted roles included.
    pub fn create(&self, role: &StoredRole) -> StoreResult<()> {
        let key = name_key(&role.name);
        let write_txn = self.store.db().begin_write()?;
        {
            let mut names = write_txn.open_table(ROLE_NAMES)?;
            if names.get(key.as_str())?.is_some() {
                return Err(StoreError::AlreadyExists(format!("Role {}", role.name)));
            }
            names.insert(key.as_str(), role.id.as_str())?;

            let mut roles = write_txn.open_table(ROLES)?;
            roles.insert(role.id.as_str(), to_json(role)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Fetch a role by id, deleted or not.
    pub fn get(&self, role_id: &str) -> StoreResult<StoredRole> {
        let read_txn = self.store.db().begin_read()?;
        let roles = read_txn.open_table(ROLES)?;
        match roles.get(role_id)? {
            Some(value) => from_json(value.value()),
            None => Err(StoreError::NotFound("Role".to_string())),
        }
    }

    pub fn find_by_name(&self, name: &str) -> StoreResult<Option<StoredRole>> {
        let read_txn = self.store.db().begin_read()?;
        let names = read_txn.open_table(ROLE_NAMES)?;
        let Some(role_id) = names.get(name_key(name).as_str())?.map(|v| v.value().to_string()) else {
            return Ok(None);
        };
        let roles = read_txn.open_table(ROLES)?;
        let role = roles
            .get(role_id.as_str())?
            .map(|v| from_json::<StoredRole>(v.value()))
            .transpose()?;
        Ok(role)
    }

    pub fn list(&self, include_deleted: bool) -> StoreResult<Vec<StoredRole>> {
        let read_txn = self.store.db().begin_read()?;
        let roles = read_txn.open_table(ROLES)?;
        let mut result = Vec::new();
        for entry in roles.iter()? {
            let (_, value) = entry?;
            let role: StoredRole = from_json(value.value())?;
            if include_deleted || !role.deleted {
                result.push(role);
            }
        }
        result.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(result)
    }

    /// Flag the role deleted. `InUse` while any user references it.
    ///
    /// The reference check and the flag flip share one write transaction, so
    /// a user cannot be assigned the role in between.
    pub fn soft_delete(&self, role_id: &str) -> StoreResult<StoredRole> {
        let write_txn = self.store.db().begin_write()?;
        let role = {
            let mut roles = write_txn.open_table(ROLES)?;
            let mut role = roles
                .get(role_id)?
                .map(|v| from_json::<StoredRole>(v.value()))
                .transpose()?
                .filter(|r| !r.deleted)
                .ok_or_else(|| StoreError::NotFound("Role".to_string()))?;

            let users = write_txn.open_table(USERS)?;
            for entry in users.iter()? {
                let (_, value) = entry?;
                let user: StoredUser = from_json(value.value())?;
                if user.role_id == role_id {
                    return Err(StoreError::InUse(format!("Role {}", role.name)));
                }
            }

            role.deleted = true;
            roles.insert(role_id, to_json(&role)?.as_slice())?;
            role
        };
        write_txn.commit()?;
        Ok(role)
    }

    /// Return the role named `name`, creating it if missing.
    pub fn ensure(&self, name: &str, description: &str, now: DateTime<Utc>) -> StoreResult<StoredRole> {
        if let Some(existing) = self.find_by_name(name)? {
            return Ok(existing);
        }
        let role = StoredRole::new(name, description, now);
        match self.create(&role) {
            Ok(()) => Ok(role),
            // Lost a race with another creator
            Err(StoreError::AlreadyExists(_)) => self
                .find_by_name(name)?
                .ok_or_else(|| StoreError::NotFound("Role".to_string())),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_store;
    use crate::storage::users::tests::sample_user;
    use crate::storage::UserRepository;

    #[test]
    fn create_and_find_by_name_ignores_case() {
        let (store, _dir) = temp_store();
        let repo = RoleRepository::new(&store);
        let role = StoredRole::new("Evaluator", "Scores submissions", Utc::now());
        repo.create(&role).unwrap();

        let found = repo.find_by_name("evaluator").unwrap().unwrap();
        assert_eq!(found.id, role.id);
        assert_eq!(found.name, "Evaluator");
        assert!(repo.find_by_name("reviewer").unwrap().is_none());
    }

    #[test]
    fn duplicate_name_rejected() {
        let (store, _dir) = temp_store();
        let repo = RoleRepository::new(&store);
        repo.create(&StoredRole::new("admin", "", Utc::now())).unwrap();
        let result = repo.create(&StoredRole::new("ADMIN", "", Utc::now()));
        assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
    }

    #[test]
    fn soft_delete_refused_while_referenced() {
        let (store, _dir) = temp_store();
        let repo = RoleRepository::new(&store);
        let role = StoredRole::new("editor", "", Utc::now());
        repo.create(&role).unwrap();
        UserRepository::new(&store)
            .create(&sample_user("ana@example.com", &role.id))
            .unwrap();

        let result = repo.soft_delete(&role.id);
        assert!(matches!(result, Err(StoreError::InUse(_))));
        assert!(!repo.get(&role.id).unwrap().deleted);
    }

    #[test]
    fn soft_delete_flags_unreferenced_role() {
        let (store, _dir) = temp_store();
        let repo = RoleRepository::new(&store);
        let role = StoredRole::new("editor", "", Utc::now());
        repo.create(&role).unwrap();

        let deleted = repo.soft_delete(&role.id).unwrap();
        assert!(deleted.deleted);
        assert!(repo.get(&role.id).unwrap().deleted);
        assert!(repo.list(false).unwrap().is_empty());
        assert_eq!(repo.list(true).unwrap().len(), 1);

        // Second delete finds nothing live
        assert!(matches!(repo.soft_delete(&role.id), Err(StoreError::NotFound(_))));
        // Name stays reserved
        let reuse = repo.create(&StoredRole::new("Editor", "", Utc::now()));
        assert!(matches!(reuse, Err(StoreError::AlreadyExists(_))));
    }

    #[test]
    fn ensure_is_idempotent() {
        let (store, _dir) = temp_store();
        let repo = RoleRepository::new(&store);
        let first = repo.ensure("admin", "Full access", Utc::now()).unwrap();
        let second = repo.ensure("Admin", "ignored", Utc::now()).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(repo.list(true).unwrap().len(), 1);
    }
}
