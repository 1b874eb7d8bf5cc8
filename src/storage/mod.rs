// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Embedded Store
//!
//! All persistent state lives in a single redb database (pure Rust, ACID).
//! Values are JSON documents; secondary indexes are separate tables kept in
//! step with their primary table inside the same write transaction.
//!
//! ## Table Layout
//!
//! ```text
//! users            user_id            → StoredUser
//! user_emails      normalized email   → user_id
//! active_tokens    bearer token       → TokenEntry (user_id, expiry)
//! roles            role_id            → StoredRole
//! role_names       lowercase name     → role_id
//! sessions         session_id         → StoredSession
//! user_sessions    user_id|session_id → created_at (unix seconds)
//! audit_log        !millis|!seq|id    → AuditRecord   (newest first)
//! audit_ids        record_id          → audit_log key
//! audit_seq        counter name       → last sequence number
//! ```
//!
//! redb serializes write transactions, so every read-modify-write that
//! happens inside one `begin_write()` is atomic with respect to concurrent
//! requests. Token-list changes rely on this.

use std::path::Path;

use redb::{Database, ReadableDatabase, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::ApiError;

pub mod audit;
pub mod roles;
pub mod sessions;
pub mod users;

pub use audit::{AuditQuery, AuditRecord, AuditRepository, AuditSink};
pub use roles::{RoleRepository, StoredRole};
pub use sessions::{token_fingerprint, RevokeOutcome, SessionRepository, StoredSession};
pub use users::{normalize_email, StoredUser, UserRepository};

// =============================================================================
// Table Definitions
// =============================================================================

pub(crate) const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
pub(crate) const USER_EMAILS: TableDefinition<&str, &str> = TableDefinition::new("user_emails");
pub(crate) const ACTIVE_TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("active_tokens");
pub(crate) const ROLES: TableDefinition<&str, &[u8]> = TableDefinition::new("roles");
pub(crate) const ROLE_NAMES: TableDefinition<&str, &str> = TableDefinition::new("role_names");
pub(crate) const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
pub(crate) const USER_SESSIONS: TableDefinition<&str, i64> = TableDefinition::new("user_sessions");
pub(crate) const AUDIT_LOG: TableDefinition<&[u8], &[u8]> = TableDefinition::new("audit_log");
pub(crate) const AUDIT_IDS: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_ids");
pub(crate) const AUDIT_SEQ: TableDefinition<&str, u64> = TableDefinition::new("audit_seq");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("in use: {0}")]
    InUse(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::not_found(format!("{what} not found")),
            StoreError::AlreadyExists(what) => ApiError::conflict(format!("{what} already exists")),
            StoreError::InUse(what) => ApiError::conflict(format!("{what} is still in use")),
            other => ApiError::internal(other.to_string()),
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// Handle to the embedded database. Cheap to share behind an `Arc`.
pub struct Store {
    db: Database,
}

impl Store {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USER_EMAILS)?;
            let _ = write_txn.open_table(ACTIVE_TOKENS)?;
            let _ = write_txn.open_table(ROLES)?;
            let _ = write_txn.open_table(ROLE_NAMES)?;
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_table(USER_SESSIONS)?;
            let _ = write_txn.open_table(AUDIT_LOG)?;
            let _ = write_txn.open_table(AUDIT_IDS)?;
            let _ = write_txn.open_table(AUDIT_SEQ)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    /// Verify the database answers a read transaction.
    pub fn health_check(&self) -> StoreResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(USERS)?;
        Ok(())
    }
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Store;

    pub fn temp_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        (store, dir)
    }
}
