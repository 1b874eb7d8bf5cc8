// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::num::NonZeroU32;
use std::sync::Arc;

use crate::audit::metadata::{GeoLocator, ReservedRangeLocator};
use crate::audit::redact::Redactor;
use crate::auth::{issuer::TokenIssuer, password::PasswordHasher, sessions::SessionRegistry, throttle::LoginThrottle};
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::storage::{AuditSink, Store};

/// Everything a request handler needs, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<Store>,
    pub clock: Arc<dyn Clock>,
    pub issuer: Arc<TokenIssuer>,
    pub sessions: Arc<SessionRegistry>,
    pub throttle: Arc<LoginThrottle>,
    pub passwords: Arc<PasswordHasher>,
    pub redactor: Arc<Redactor>,
    pub geo: Arc<dyn GeoLocator>,
    /// Where the audit middleware writes. Defaults to the store.
    pub audit_sink: Arc<dyn AuditSink>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store, clock: Arc<dyn Clock>) -> Result<Self, ApiError> {
        let store = Arc::new(store);
        let iterations = NonZeroU32::new(config.password_hash_iterations)
            .ok_or_else(|| ApiError::internal("password hash iterations must be positive"))?;

        Ok(Self {
            issuer: Arc::new(TokenIssuer::new(
                config.jwt_secret.as_bytes(),
                config.jwt_issuer.clone(),
                store.clone(),
                clock.clone(),
            )),
            sessions: Arc::new(SessionRegistry::new(
                store.clone(),
                clock.clone(),
                config.session_retention,
            )),
            throttle: Arc::new(LoginThrottle::new(clock.clone())),
            passwords: Arc::new(PasswordHasher::new(iterations)?),
            redactor: Arc::new(Redactor::new(&config.extra_redact_keys)),
            geo: Arc::new(ReservedRangeLocator),
            audit_sink: store.clone(),
            config: Arc::new(config),
            store,
            clock,
        })
    }

    /// Replace the location resolver.
    pub fn with_geo_locator(mut self, geo: Arc<dyn GeoLocator>) -> Self {
        self.geo = geo;
        self
    }

    /// Replace the audit record destination.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = sink;
        self
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{JWT_SECRET_ENV, PASSWORD_HASH_ITERATIONS_ENV};
    use chrono::Utc;

    pub struct TestApp {
        pub state: AppState,
        pub clock: Arc<ManualClock>,
        _dir: tempfile::TempDir,
    }

    /// State over a temp database, a manual clock and cheap password hashing.
    pub fn test_app() -> TestApp {
        let config = AppConfig::from_lookup(|name| match name {
            JWT_SECRET_ENV => Some("test-secret-test-secret-test-secret".to_string()),
            PASSWORD_HASH_ITERATIONS_ENV => Some("1000".to_string()),
            _ => None,
        })
        .unwrap();
        let (store, dir) = crate::storage::test_support::temp_store();
        let clock = ManualClock::new(Utc::now());
        let state = AppState::new(config, store, clock.clone()).unwrap();
        TestApp {
            state,
            clock,
            _dir: dir,
        }
    }
}
