// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credential store: user records and their active-token lists.
//!
//! The active-token list is the authoritative revocation mechanism. Every
//! mutation of it happens inside one write transaction together with the
//! `active_tokens` index, so concurrent logins cannot lose each other's
//! appends.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use super::roles::StoredRole;
use super::sessions::{deactivate_sessions_in, token_fingerprint, RevokeOutcome};
use super::{
    from_json, to_json, Store, StoreError, StoreResult, ACTIVE_TOKENS, ROLES, USERS, USER_EMAILS,
};

/// User record as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredUser {
    pub id: String,
    /// Normalized email (see [`normalize_email`]).
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub role_id: String,
    pub disabled: bool,
    pub verified: bool,
    /// Active bearer tokens in issuance order.
    #[serde(default)]
    pub tokens: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Index entry for an issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenEntry {
    user_id: String,
    expires_at: DateTime<Utc>,
}

/// Canonical form used for uniqueness and lookup of emails.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().nfkc().collect::<String>().to_lowercase()
}

pub struct UserRepository<'a> {
    store: &'a Store,
}

impl<'a> UserRepository<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Insert a new user. Fails if the email is taken or the role is missing
    /// or deleted.
    ///
    /// The role is checked in the same write transaction as the insert, so a
    /// concurrent role delete either sees this user or makes this call fail.
    pub fn create(&self, user: &StoredUser) -> StoreResult<()> {
        let email = normalize_email(&user.email);
        let mut user = user.clone();
        user.email = email.clone();

        let write_txn = self.store.db().begin_write()?;
        {
            let roles = write_txn.open_table(ROLES)?;
            let live = roles
                .get(user.role_id.as_str())?
                .map(|v| from_json::<StoredRole>(v.value()))
                .transpose()?
                .is_some_and(|role| !role.deleted);
            if !live {
                return Err(StoreError::NotFound("Role".to_string()));
            }

            let mut emails = write_txn.open_table(USER_EMAILS)?;
            if emails.get(email.as_str())?.is_some() {
                return Err(StoreError::AlreadyExists(format!("User with email {email}")));
            }
            emails.insert(email.as_str(), user.id.as_str())?;

            let mut users = write_txn.open_table(USERS)?;
            if users.get(user.id.as_str())?.is_some() {
                return Err(StoreError::AlreadyExists(format!("User {}", user.id)));
            }
            users.insert(user.id.as_str(), to_json(&user)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, user_id: &str) -> StoreResult<StoredUser> {
        let read_txn = self.store.db().begin_read()?;
        let users = read_txn.open_table(USERS)?;
        match users.get(user_id)? {
            Some(value) => from_json(value.value()),
            None => Err(StoreError::NotFound("User".to_string())),
        }
    }

    pub fn find_by_email(&self, email: &str) -> StoreResult<Option<StoredUser>> {
        let email = normalize_email(email);
        let read_txn = self.store.db().begin_read()?;
        let emails = read_txn.open_table(USER_EMAILS)?;
        let Some(user_id) = emails.get(email.as_str())?.map(|v| v.value().to_string()) else {
            return Ok(None);
        };
        let users = read_txn.open_table(USERS)?;
        let user = users
            .get(user_id.as_str())?
            .map(|v| from_json::<StoredUser>(v.value()))
            .transpose()?;
        Ok(user)
    }

    /// Find the user whose active-token list contains exactly `token`.
    pub fn find_by_token(&self, token: &str) -> StoreResult<Option<StoredUser>> {
        let read_txn = self.store.db().begin_read()?;
        let tokens = read_txn.open_table(ACTIVE_TOKENS)?;
        let Some(entry) = tokens
            .get(token)?
            .map(|v| from_json::<TokenEntry>(v.value()))
            .transpose()?
        else {
            return Ok(None);
        };

        let users = read_txn.open_table(USERS)?;
        let user = users
            .get(entry.user_id.as_str())?
            .map(|v| from_json::<StoredUser>(v.value()))
            .transpose()?;

        // The list on the user record is authoritative; the index only speeds up lookup.
        Ok(user.filter(|u| u.tokens.iter().any(|t| t == token)))
    }

    pub fn list(&self) -> StoreResult<Vec<StoredUser>> {
        let read_txn = self.store.db().begin_read()?;
        let users = read_txn.open_table(USERS)?;
        let mut result = Vec::new();
        for entry in users.iter()? {
            let (_, value) = entry?;
            result.push(from_json::<StoredUser>(value.value())?);
        }
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    pub fn set_disabled(&self, user_id: &str, disabled: bool, now: DateTime<Utc>) -> StoreResult<StoredUser> {
        let write_txn = self.store.db().begin_write()?;
        let user = {
            let mut users = write_txn.open_table(USERS)?;
            let mut user = users
                .get(user_id)?
                .map(|v| from_json::<StoredUser>(v.value()))
                .transpose()?
                .ok_or_else(|| StoreError::NotFound("User".to_string()))?;
            user.disabled = disabled;
            user.updated_at = now;
            users.insert(user_id, to_json(&user)?.as_slice())?;
            user
        };
        write_txn.commit()?;
        Ok(user)
    }

    /// Replace the password hash and revoke every token and session of the
    /// user in the same transaction.
    pub fn update_password(
        &self,
        user_id: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<RevokeOutcome> {
        let write_txn = self.store.db().begin_write()?;
        {
            let mut users = write_txn.open_table(USERS)?;
            let mut user = users
                .get(user_id)?
                .map(|v| from_json::<StoredUser>(v.value()))
                .transpose()?
                .ok_or_else(|| StoreError::NotFound("User".to_string()))?;
            user.password_hash = password_hash.to_string();
            user.updated_at = now;
            users.insert(user_id, to_json(&user)?.as_slice())?;
        }
        let revoked = remove_tokens_in(&write_txn, user_id, |_| true)?;
        let deactivated = deactivate_sessions_in(&write_txn, user_id, None)?;
        write_txn.commit()?;
        Ok(RevokeOutcome {
            tokens_removed: revoked.len(),
            sessions_deactivated: deactivated,
        })
    }

    /// Atomically append `token` to the user's active-token list.
    ///
    /// Tokens whose recorded expiry is not after `now` are pruned in the same
    /// transaction and their sessions deactivated. Returns the number pruned.
    pub fn push_token(
        &self,
        user_id: &str,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let write_txn = self.store.db().begin_write()?;

        let expired: Vec<String> = {
            let users = write_txn.open_table(USERS)?;
            let user = users
                .get(user_id)?
                .map(|v| from_json::<StoredUser>(v.value()))
                .transpose()?
                .ok_or_else(|| StoreError::NotFound("User".to_string()))?;
            let index = write_txn.open_table(ACTIVE_TOKENS)?;
            let mut expired = Vec::new();
            for existing in &user.tokens {
                if let Some(entry) = index.get(existing.as_str())? {
                    let entry: TokenEntry = from_json(entry.value())?;
                    if entry.expires_at <= now {
                        expired.push(existing.clone());
                    }
                }
            }
            expired
        };

        let pruned = if expired.is_empty() {
            Vec::new()
        } else {
            remove_tokens_in(&write_txn, user_id, |t| expired.iter().any(|e| e == t))?
        };
        if !pruned.is_empty() {
            let fingerprints: Vec<String> = pruned.iter().map(|t| token_fingerprint(t)).collect();
            deactivate_sessions_in(&write_txn, user_id, Some(&fingerprints))?;
        }

        {
            let mut users = write_txn.open_table(USERS)?;
            let mut user = users
                .get(user_id)?
                .map(|v| from_json::<StoredUser>(v.value()))
                .transpose()?
                .ok_or_else(|| StoreError::NotFound("User".to_string()))?;
            user.tokens.push(token.to_string());
            users.insert(user_id, to_json(&user)?.as_slice())?;

            let mut index = write_txn.open_table(ACTIVE_TOKENS)?;
            let entry = TokenEntry {
                user_id: user_id.to_string(),
                expires_at,
            };
            index.insert(token, to_json(&entry)?.as_slice())?;
        }

        write_txn.commit()?;
        Ok(pruned.len())
    }

    /// Remove one token from the list without touching sessions.
    ///
    /// Used to roll back an append whose session could not be recorded.
    pub fn remove_token(&self, user_id: &str, token: &str) -> StoreResult<bool> {
        let write_txn = self.store.db().begin_write()?;
        let removed = remove_tokens_in(&write_txn, user_id, |t| t == token)?;
        write_txn.commit()?;
        Ok(!removed.is_empty())
    }
}

/// Remove the user's tokens matching `select` from both the user record and
/// the token index. Returns the removed tokens. A missing user removes nothing.
pub(super) fn remove_tokens_in(
    write_txn: &WriteTransaction,
    user_id: &str,
    select: impl Fn(&str) -> bool,
) -> StoreResult<Vec<String>> {
    let removed = {
        let mut users = write_txn.open_table(USERS)?;
        let Some(mut user) = users
            .get(user_id)?
            .map(|v| from_json::<StoredUser>(v.value()))
            .transpose()?
        else {
            return Ok(Vec::new());
        };

        let (removed, kept): (Vec<String>, Vec<String>) =
            user.tokens.drain(..).partition(|t| select(t));
        user.tokens = kept;
        if !removed.is_empty() {
            users.insert(user_id, to_json(&user)?.as_slice())?;
        }
        removed
    };

    let mut index = write_txn.open_table(ACTIVE_TOKENS)?;
    for token in &removed {
        index.remove(token.as_str())?;
    }
    Ok(removed)
}
