// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session registry: login history and bulk revocation.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::audit::metadata::ClientMeta;
use crate::clock::Clock;
use crate::error::ApiError;
use crate::storage::{token_fingerprint, RevokeOutcome, SessionRepository, Store, StoredSession};

pub struct SessionRegistry {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl SessionRegistry {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, retention: Duration) -> Self {
        Self {
            store,
            clock,
            retention,
        }
    }

    /// Insert one active session for a successful login.
    pub fn record_login(&self, user_id: &str, token: &str, meta: &ClientMeta) -> Result<StoredSession, ApiError> {
        let now = self.clock.now();
        let session = StoredSession {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            token_fingerprint: token_fingerprint(token),
            ip: meta.ip.clone(),
            location: meta.location.clone(),
            device: meta.device.clone(),
            active: true,
            created_at: now,
            expires_at: now + self.retention,
        };
        SessionRepository::new(&self.store).insert(&session)?;
        Ok(session)
    }

    /// Revoke one token and deactivate its session. Idempotent.
    pub fn deactivate_one(&self, user_id: &str, token: &str) -> Result<RevokeOutcome, ApiError> {
        let outcome = SessionRepository::new(&self.store).revoke_token(user_id, token)?;
        debug!(
            user_id,
            tokens = outcome.tokens_removed,
            sessions = outcome.sessions_deactivated,
            "Token revoked"
        );
        Ok(outcome)
    }

    /// Revoke every token of the user and deactivate all their sessions.
    pub fn deactivate_all(&self, user_id: &str) -> Result<RevokeOutcome, ApiError> {
        let outcome = SessionRepository::new(&self.store).revoke_all(user_id)?;
        info!(
            user_id,
            tokens = outcome.tokens_removed,
            sessions = outcome.sessions_deactivated,
            "All sessions revoked"
        );
        Ok(outcome)
    }

    /// Unexpired sessions of the user, newest first.
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<StoredSession>, ApiError> {
        Ok(SessionRepository::new(&self.store).list_for_user(user_id, self.clock.now())?)
    }

    pub fn purge_expired(&self) -> Result<usize, ApiError> {
        Ok(SessionRepository::new(&self.store).purge_expired(self.clock.now())?)
    }

    /// Periodically purge expired sessions until `shutdown` is cancelled.
    pub fn spawn_sweeper(self: Arc<Self>, every: StdDuration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = every.as_secs(), "Session sweeper started");
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let registry = self.clone();
                        match tokio::task::spawn_blocking(move || registry.purge_expired()).await {
                            Ok(Ok(0)) => {}
                            Ok(Ok(purged)) => info!(purged, "Purged expired sessions"),
                            Ok(Err(e)) => error!(error = %e, "Session sweep failed"),
                            Err(e) => error!(error = %e, "Session sweep task panicked"),
                        }
                    }
                }
            }
            info!("Session sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::issuer::TokenIssuer;
    use crate::clock::ManualClock;
    use crate::storage::test_support::temp_store;
    use crate::storage::users::tests::{live_role, sample_user};
    use crate::storage::UserRepository;
    use chrono::Utc;

    struct Fixture {
        registry: Arc<SessionRegistry>,
        issuer: TokenIssuer,
        store: Arc<Store>,
        clock: Arc<ManualClock>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let (store, dir) = temp_store();
        let store = Arc::new(store);
        let clock = ManualClock::new(Utc::now());
        Fixture {
            registry: Arc::new(SessionRegistry::new(store.clone(), clock.clone(), Duration::days(30))),
            issuer: TokenIssuer::new(b"0123456789abcdef0123456789abcdef", "portal-auth", store.clone(), clock.clone()),
            store,
            clock,
            _dir: dir,
        }
    }

    fn meta() -> ClientMeta {
        ClientMeta {
            ip: "203.0.113.9".to_string(),
            location: "unknown".to_string(),
            device: "Chrome on Windows".to_string(),
        }
    }

    #[test]
    fn record_login_stores_metadata_and_fingerprint() {
        let f = fixture();
        let user = sample_user("ana@example.com", &live_role(&f.store));
        UserRepository::new(&f.store).create(&user).unwrap();
        let issued = f.issuer.issue(&user.id).unwrap();

        let session = f.registry.record_login(&user.id, &issued.token, &meta()).unwrap();
        assert!(session.active);
        assert_eq!(session.device, "Chrome on Windows");
        assert_eq!(session.token_fingerprint, token_fingerprint(&issued.token));
        assert_ne!(session.token_fingerprint, issued.token);
        assert_eq!(session.expires_at - session.created_at, Duration::days(30));
    }

    #[test]
    fn logout_all_revokes_every_device() {
        let f = fixture();
        let user = sample_user("ana@example.com", &live_role(&f.store));
        UserRepository::new(&f.store).create(&user).unwrap();
        for _ in 0..3 {
            let issued = f.issuer.issue(&user.id).unwrap();
            f.registry.record_login(&user.id, &issued.token, &meta()).unwrap();
        }

        let outcome = f.registry.deactivate_all(&user.id).unwrap();
        assert_eq!(outcome.tokens_removed, 3);
        assert_eq!(outcome.sessions_deactivated, 3);
        assert!(UserRepository::new(&f.store).get(&user.id).unwrap().tokens.is_empty());
        assert!(f.registry.list_for_user(&user.id).unwrap().iter().all(|s| !s.active));
    }

    #[test]
    fn expired_sessions_vanish_from_history_and_get_purged() {
        let f = fixture();
        let user = sample_user("ana@example.com", &live_role(&f.store));
        UserRepository::new(&f.store).create(&user).unwrap();
        let issued = f.issuer.issue(&user.id).unwrap();
        f.registry.record_login(&user.id, &issued.token, &meta()).unwrap();

        f.clock.advance(Duration::days(31));
        assert!(f.registry.list_for_user(&user.id).unwrap().is_empty());
        assert_eq!(f.registry.purge_expired().unwrap(), 1);
    }

    #[tokio::test]
    async fn sweeper_stops_on_cancel() {
        let f = fixture();
        let shutdown = CancellationToken::new();
        let handle = f
            .registry
            .clone()
            .spawn_sweeper(StdDuration::from_millis(10), shutdown.clone());
        shutdown.cancel();
        tokio::time::timeout(StdDuration::from_secs(5), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
