// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for the authenticated identity.
//!
//! ```rust,ignore
//! async fn my_handler(Auth(identity): Auth) -> impl IntoResponse {
//!     // identity.user_id, identity.role
//! }
//! ```
//!
//! Behind `require_auth` the identity is read from the request extensions;
//! without the middleware the extractor authenticates on its own.

use axum::{extract::FromRequestParts, http::request::Parts};

use super::{claims::Identity, middleware::authenticate, AuthError};
use crate::state::AppState;

/// Required authentication.
pub struct Auth(pub Identity);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<Identity>().cloned() {
            return Ok(Auth(identity));
        }
        let identity = authenticate(state, &parts.headers)?;
        parts.extensions.insert(identity.clone());
        Ok(Auth(identity))
    }
}

/// Optional authentication.
///
/// `None` when no valid identity is present. A disabled account is still
/// rejected.
pub struct OptionalAuth(pub Option<Identity>);

impl FromRequestParts<AppState> for OptionalAuth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match Auth::from_request_parts(parts, state).await {
            Ok(Auth(identity)) => Ok(OptionalAuth(Some(identity))),
            Err(AuthError::AccountDisabled) => Err(AuthError::AccountDisabled),
            Err(_) => Ok(OptionalAuth(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_app;
    use axum::http::Request;

    fn empty_parts() -> Parts {
        Request::builder().uri("/test").body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn auth_extractor_requires_auth_header() {
        let app = test_app();
        let mut parts = empty_parts();
        let result = Auth::from_request_parts(&mut parts, &app.state).await;
        assert!(matches!(result, Err(AuthError::MissingAuthHeader)));
    }

    #[tokio::test]
    async fn auth_extractor_prefers_extensions() {
        let app = test_app();
        let mut parts = empty_parts();
        parts.extensions.insert(Identity {
            user_id: "user_from_middleware".to_string(),
            email: "m@example.com".to_string(),
            role: "admin".to_string(),
            token: "t".to_string(),
        });

        let Auth(identity) = Auth::from_request_parts(&mut parts, &app.state).await.unwrap();
        assert_eq!(identity.user_id, "user_from_middleware");
    }

    #[tokio::test]
    async fn optional_auth_returns_none_without_user() {
        let app = test_app();
        let mut parts = empty_parts();
        let OptionalAuth(identity) = OptionalAuth::from_request_parts(&mut parts, &app.state)
            .await
            .unwrap();
        assert!(identity.is_none());
    }
}
