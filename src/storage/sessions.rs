// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session records: one row per successful login.
//!
//! Sessions carry the device, location and IP of a login and an `active`
//! flag. They are history, not credentials: a session row never
//! authenticates anything. Revoking a token and deactivating its session
//! happen in one write transaction.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::users::remove_tokens_in;
use super::{from_json, to_json, Store, StoreError, StoreResult, SESSIONS, USER_SESSIONS};

/// Session record as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredSession {
    pub id: String,
    pub user_id: String,
    /// SHA-256 of the bearer token, base64url encoded.
    pub token_fingerprint: String,
    pub ip: String,
    pub location: String,
    pub device: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    /// After this instant the row is invisible and eligible for purging.
    pub expires_at: DateTime<Utc>,
}

impl StoredSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Result of a revocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevokeOutcome {
    pub tokens_removed: usize,
    pub sessions_deactivated: usize,
}

/// Opaque, non-reversible copy of a bearer token.
pub fn token_fingerprint(token: &str) -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(token.as_bytes()))
}

fn index_key(user_id: &str, session_id: &str) -> String {
    format!("{user_id}|{session_id}")
}

/// `[start, end)` covering every index key of `user_id`.
fn user_range(user_id: &str) -> (String, String) {
    // '}' is the byte after '|'
    (format!("{user_id}|"), format!("{user_id}}}"))
}

pub struct SessionRepository<'a> {
    store: &'a Store,
}

impl<'a> SessionRepository<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn insert(&self, session: &StoredSession) -> StoreResult<()> {
        let write_txn = self.store.db().begin_write()?;
        {
            let mut sessions = write_txn.open_table(SESSIONS)?;
            if sessions.get(session.id.as_str())?.is_some() {
                return Err(StoreError::AlreadyExists(format!("Session {}", session.id)));
            }
            sessions.insert(session.id.as_str(), to_json(session)?.as_slice())?;

            let mut index = write_txn.open_table(USER_SESSIONS)?;
            index.insert(
                index_key(&session.user_id, &session.id).as_str(),
                session.created_at.timestamp(),
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> StoreResult<StoredSession> {
        let read_txn = self.store.db().begin_read()?;
        let sessions = read_txn.open_table(SESSIONS)?;
        match sessions.get(session_id)? {
            Some(value) => from_json(value.value()),
            None => Err(StoreError::NotFound("Session".to_string())),
        }
    }

    /// Unexpired sessions of a user, newest first.
    pub fn list_for_user(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<Vec<StoredSession>> {
        let read_txn = self.store.db().begin_read()?;
        let index = read_txn.open_table(USER_SESSIONS)?;
        let sessions = read_txn.open_table(SESSIONS)?;

        let (start, end) = user_range(user_id);
        let mut result = Vec::new();
        for entry in index.range(start.as_str()..end.as_str())? {
            let (key, _) = entry?;
            let Some((_, session_id)) = key.value().split_once('|') else {
                continue;
            };
            if let Some(value) = sessions.get(session_id)? {
                let session: StoredSession = from_json(value.value())?;
                if !session.is_expired(now) {
                    result.push(session);
                }
            }
        }
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    /// Remove `token` from the user's list and deactivate its session.
    ///
    /// Idempotent: revoking an unknown or already revoked token succeeds
    /// with a zero outcome.
    pub fn revoke_token(&self, user_id: &str, token: &str) -> StoreResult<RevokeOutcome> {
        let fingerprint = token_fingerprint(token);
        let write_txn = self.store.db().begin_write()?;
        let removed = remove_tokens_in(&write_txn, user_id, |t| t == token)?;
        let deactivated = deactivate_sessions_in(&write_txn, user_id, Some(&[fingerprint]))?;
        write_txn.commit()?;
        Ok(RevokeOutcome {
            tokens_removed: removed.len(),
            sessions_deactivated: deactivated,
        })
    }

    /// Clear the user's token list and deactivate every active session.
    pub fn revoke_all(&self, user_id: &str) -> StoreResult<RevokeOutcome> {
        let write_txn = self.store.db().begin_write()?;
        let removed = remove_tokens_in(&write_txn, user_id, |_| true)?;
        let deactivated = deactivate_sessions_in(&write_txn, user_id, None)?;
        write_txn.commit()?;
        Ok(RevokeOutcome {
            tokens_removed: removed.len(),
            sessions_deactivated: deactivated,
        })
    }

    /// Delete every session whose retention window has passed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let write_txn = self.store.db().begin_write()?;
        let expired: Vec<(String, String)> = {
            let sessions = write_txn.open_table(SESSIONS)?;
            let mut expired = Vec::new();
            for entry in sessions.iter()? {
                let (_, value) = entry?;
                let session: StoredSession = from_json(value.value())?;
                if session.is_expired(now) {
                    expired.push((session.user_id, session.id));
                }
            }
            expired
        };

        {
            let mut sessions = write_txn.open_table(SESSIONS)?;
            let mut index = write_txn.open_table(USER_SESSIONS)?;
            for (user_id, session_id) in &expired {
                sessions.remove(session_id.as_str())?;
                index.remove(index_key(user_id, session_id).as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(expired.len())
    }
}

/// Mark the user's active sessions inactive. With `fingerprints`, only the
/// sessions of those tokens; otherwise all of them. Returns how many changed.
pub(super) fn deactivate_sessions_in(
    write_txn: &WriteTransaction,
    user_id: &str,
    fingerprints: Option<&[String]>,
) -> StoreResult<usize> {
    let session_ids: Vec<String> = {
        let index = write_txn.open_table(USER_SESSIONS)?;
        let (start, end) = user_range(user_id);
        let mut ids = Vec::new();
        for entry in index.range(start.as_str()..end.as_str())? {
            let (key, _) = entry?;
            if let Some((_, session_id)) = key.value().split_once('|') {
                ids.push(session_id.to_string());
            }
        }
        ids
    };

    let mut sessions = write_txn.open_table(SESSIONS)?;
    let mut changed = 0;
    for session_id in session_ids {
        let Some(mut session) = sessions
            .get(session_id.as_str())?
            .map(|v| from_json::<StoredSession>(v.value()))
            .transpose()?
        else {
            continue;
        };
        if !session.active {
            continue;
        }
        if let Some(fingerprints) = fingerprints {
            if !fingerprints.contains(&session.token_fingerprint) {
                continue;
            }
        }
        session.active = false;
        sessions.insert(session_id.as_str(), to_json(&session)?.as_slice())?;
        changed += 1;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_store;
    use crate::storage::users::tests::{live_role, sample_user};
    use crate::storage::UserRepository;
    use chrono::Duration;

    fn session_for(user_id: &str, token: &str, created_at: DateTime<Utc>) -> StoredSession {
        StoredSession {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            token_fingerprint: token_fingerprint(token),
            ip: "10.0.0.7".to_string(),
            location: "Private network".to_string(),
            device: "Firefox on Linux".to_string(),
            active: true,
            created_at,
            expires_at: created_at + Duration::days(30),
        }
    }

    fn login(store: &Store, user_id: &str, token: &str) -> StoredSession {
        let now = Utc::now();
        UserRepository::new(store)
            .push_token(user_id, token, now + Duration::hours(24), now)
            .unwrap();
        let session = session_for(user_id, token, now);
        SessionRepository::new(store).insert(&session).unwrap();
        session
    }

    #[test]
    fn fingerprint_is_stable_and_not_the_token() {
        let a = token_fingerprint("eyJ.token.sig");
        assert_eq!(a, token_fingerprint("eyJ.token.sig"));
        assert_ne!(a, token_fingerprint("eyJ.token.sih"));
        assert!(!a.contains("eyJ"));
    }

    #[test]
    fn revoke_token_removes_token_and_deactivates_its_session() {
        let (store, _dir) = temp_store();
        let user = sample_user("ana@example.com", &live_role(&store));
        UserRepository::new(&store).create(&user).unwrap();
        let phone = login(&store, &user.id, "tok-phone");
        let laptop = login(&store, &user.id, "tok-laptop");

        let repo = SessionRepository::new(&store);
        let outcome = repo.revoke_token(&user.id, "tok-phone").unwrap();
        assert_eq!(
            outcome,
            RevokeOutcome {
                tokens_removed: 1,
                sessions_deactivated: 1
            }
        );

        assert!(!repo.get(&phone.id).unwrap().active);
        assert!(repo.get(&laptop.id).unwrap().active);
        let stored = UserRepository::new(&store).get(&user.id).unwrap();
        assert_eq!(stored.tokens, vec!["tok-laptop"]);
    }

    #[test]
    fn revoke_token_is_idempotent() {
        let (store, _dir) = temp_store();
        let user = sample_user("ana@example.com", &live_role(&store));
        UserRepository::new(&store).create(&user).unwrap();
        login(&store, &user.id, "tok");

        let repo = SessionRepository::new(&store);
        repo.revoke_token(&user.id, "tok").unwrap();
        let second = repo.revoke_token(&user.id, "tok").unwrap();
        assert_eq!(second, RevokeOutcome::default());

        let unknown_user = repo.revoke_token("nobody", "tok").unwrap();
        assert_eq!(unknown_user, RevokeOutcome::default());
    }

    #[test]
    fn revoke_all_clears_list_and_sessions() {
        let (store, _dir) = temp_store();
        let user = sample_user("ana@example.com", &live_role(&store));
        let other = sample_user("beto@example.com", &live_role(&store));
        UserRepository::new(&store).create(&user).unwrap();
        UserRepository::new(&store).create(&other).unwrap();
        login(&store, &user.id, "a");
        login(&store, &user.id, "b");
        let other_session = login(&store, &other.id, "c");

        let repo = SessionRepository::new(&store);
        let outcome = repo.revoke_all(&user.id).unwrap();
        assert_eq!(outcome.tokens_removed, 2);
        assert_eq!(outcome.sessions_deactivated, 2);

        let sessions = repo.list_for_user(&user.id, Utc::now()).unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|s| !s.active));
        assert!(UserRepository::new(&store).get(&user.id).unwrap().tokens.is_empty());

        // Other users are untouched
        assert!(repo.get(&other_session.id).unwrap().active);
    }

    #[test]
    fn list_for_user_is_newest_first_and_hides_expired() {
        let (store, _dir) = temp_store();
        let repo = SessionRepository::new(&store);
        let now = Utc::now();

        let old = session_for("u1", "t1", now - Duration::days(31));
        let mid = session_for("u1", "t2", now - Duration::days(2));
        let new = session_for("u1", "t3", now);
        let foreign = session_for("u10", "t4", now);
        for s in [&old, &mid, &new, &foreign] {
            repo.insert(s).unwrap();
        }

        let listed = repo.list_for_user("u1", now).unwrap();
        let ids: Vec<_> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![new.id.as_str(), mid.id.as_str()]);
    }

    #[test]
    fn purge_expired_deletes_only_expired_rows() {
        let (store, _dir) = temp_store();
        let repo = SessionRepository::new(&store);
        let now = Utc::now();

        let expired = session_for("u1", "t1", now - Duration::days(40));
        let fresh = session_for("u1", "t2", now);
        repo.insert(&expired).unwrap();
        repo.insert(&fresh).unwrap();

        assert_eq!(repo.purge_expired(now).unwrap(), 1);
        assert!(matches!(repo.get(&expired.id), Err(StoreError::NotFound(_))));
        assert!(repo.get(&fresh.id).is_ok());
        assert_eq!(repo.purge_expired(now).unwrap(), 0);
    }
}
