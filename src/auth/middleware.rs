// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication and capability middleware for Axum.
//!
//! ```rust,ignore
//! let admin_routes = Router::new()
//!     .route("/roles", get(list_roles))
//!     .route_layer(from_fn_with_state(AllowedRoles::admin_only(), require_roles))
//!     .route_layer(from_fn_with_state(state.clone(), require_auth));
//! ```
//!
//! The last `route_layer` runs first, so the capability gate always sees the
//! identity attached by the auth gate.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::{claims::Identity, roles::resolve_role, AllowedRoles, AuthError};
use crate::state::AppState;
use crate::storage::UserRepository;

/// Extract the bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    let token = header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or(AuthError::InvalidAuthHeader)?;
    if token.is_empty() {
        return Err(AuthError::InvalidAuthHeader);
    }
    Ok(token)
}

/// Resolve the caller behind the request's bearer token.
///
/// The token must verify, be present in its user's active-token list, belong
/// to an enabled user and that user's role must still exist.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity, AuthError> {
    let token = bearer_token(headers)?;
    let claims = state.issuer.verify(token)?;

    let user = UserRepository::new(&state.store)
        .find_by_token(token)
        .map_err(|e| AuthError::InternalError(e.to_string()))?
        .filter(|u| u.id == claims.sub)
        .ok_or(AuthError::TokenRevoked)?;

    if user.disabled {
        return Err(AuthError::AccountDisabled);
    }

    let role = resolve_role(&state.store, &user.role_id)
        .map_err(|e| AuthError::InternalError(e.to_string()))?
        .ok_or(AuthError::UnknownRole)?;

    Ok(Identity {
        user_id: user.id,
        email: user.email,
        role: role.name,
        token: token.to_string(),
    })
}

async fn run_as(identity: Identity, mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(identity.clone());
    let mut response = next.run(request).await;
    // A handler may name a different actor (login does)
    if response.extensions().get::<Identity>().is_none() {
        response.extensions_mut().insert(identity);
    }
    response
}

/// Reject the request unless it carries a valid, active token.
pub async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match authenticate(&state, request.headers()) {
        Ok(identity) => run_as(identity, request, next).await,
        Err(e) => {
            debug!(reason = e.error_code(), path = %request.uri().path(), "Authentication rejected");
            e.into_response()
        }
    }
}

/// Attach the identity when one is present; otherwise continue anonymously.
///
/// A disabled account is still rejected outright.
pub async fn optional_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match authenticate(&state, request.headers()) {
        Ok(identity) => run_as(identity, request, next).await,
        Err(AuthError::AccountDisabled) => AuthError::AccountDisabled.into_response(),
        Err(AuthError::MissingAuthHeader) => next.run(request).await,
        Err(e) => {
            if let AuthError::InternalError(cause) = &e {
                warn!(error = %cause, "Optional authentication failed, continuing anonymously");
            }
            next.run(request).await
        }
    }
}

/// Capability gate: pass only identities whose role is in `allowed`.
pub async fn require_roles(State(allowed): State<AllowedRoles>, request: Request, next: Next) -> Response {
    let permitted = request
        .extensions()
        .get::<Identity>()
        .is_some_and(|identity| allowed.permits(&identity.role));

    if permitted {
        next.run(request).await
    } else {
        AuthError::InsufficientPermissions.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::roles::{ensure_builtin_roles, ADMIN_ROLE, USER_ROLE};
    use crate::state::test_support::test_app;
    use crate::storage::users::tests::sample_user;
    use crate::storage::RoleRepository;
    use axum::body::Body;
    use axum::http::{HeaderValue, StatusCode};
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::{Extension, Router};
    use chrono::Utc;
    use tower::ServiceExt;

    fn auth_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    /// Create a user with the named role and issue one token.
    fn user_with_token(state: &AppState, email: &str, role: &str) -> (String, String) {
        ensure_builtin_roles(&state.store, Utc::now()).unwrap();
        let role = RoleRepository::new(&state.store).find_by_name(role).unwrap().unwrap();
        let user = sample_user(email, &role.id);
        UserRepository::new(&state.store).create(&user).unwrap();
        let issued = state.issuer.issue(&user.id).unwrap();
        (user.id, issued.token)
    }

    #[test]
    fn bearer_token_parsing() {
        assert!(matches!(bearer_token(&HeaderMap::new()), Err(AuthError::MissingAuthHeader)));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(matches!(bearer_token(&headers), Err(AuthError::InvalidAuthHeader)));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert!(matches!(bearer_token(&headers), Err(AuthError::InvalidAuthHeader)));

        assert_eq!(bearer_token(&auth_headers("abc")).unwrap(), "abc");
    }

    #[test]
    fn issued_token_authenticates_until_revoked() {
        let app = test_app();
        let (user_id, token) = user_with_token(&app.state, "ana@example.com", USER_ROLE);

        let identity = authenticate(&app.state, &auth_headers(&token)).unwrap();
        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.role, USER_ROLE);
        assert_eq!(identity.email, "ana@example.com");

        app.state.sessions.deactivate_one(&user_id, &token).unwrap();
        assert!(matches!(
            authenticate(&app.state, &auth_headers(&token)),
            Err(AuthError::TokenRevoked)
        ));
    }

    #[test]
    fn disabled_user_is_forbidden() {
        let app = test_app();
        let (user_id, token) = user_with_token(&app.state, "ana@example.com", USER_ROLE);
        UserRepository::new(&app.state.store)
            .set_disabled(&user_id, true, Utc::now())
            .unwrap();

        assert!(matches!(
            authenticate(&app.state, &auth_headers(&token)),
            Err(AuthError::AccountDisabled)
        ));
    }

    #[test]
    fn missing_role_is_unauthenticated() {
        let app = test_app();
        let role = crate::storage::StoredRole::new("ghost-role", "", Utc::now());
        RoleRepository::new(&app.state.store).create(&role).unwrap();
        let user = sample_user("ana@example.com", &role.id);
        UserRepository::new(&app.state.store).create(&user).unwrap();
        let issued = app.state.issuer.issue(&user.id).unwrap();

        // Force the role away behind the repository's back
        let mut user = UserRepository::new(&app.state.store).get(&user.id).unwrap();
        user.role_id = "missing".into();
        let write = app.state.store.db().begin_write().unwrap();
        {
            let mut users = write.open_table(crate::storage::USERS).unwrap();
            users
                .insert(user.id.as_str(), serde_json::to_vec(&user).unwrap().as_slice())
                .unwrap();
        }
        write.commit().unwrap();

        assert!(matches!(
            authenticate(&app.state, &auth_headers(&issued.token)),
            Err(AuthError::UnknownRole)
        ));
    }

    #[test]
    fn token_of_another_user_is_rejected() {
        let app = test_app();
        let (_, token) = user_with_token(&app.state, "ana@example.com", USER_ROLE);
        // A validly signed token that was never issued to anyone
        let stray = app.state.issuer.sign("someone-else").unwrap();
        assert!(matches!(
            authenticate(&app.state, &auth_headers(&stray.token)),
            Err(AuthError::TokenRevoked)
        ));
        assert!(authenticate(&app.state, &auth_headers(&token)).is_ok());
    }

    fn gated_router(state: AppState) -> Router {
        async fn whoami(Extension(identity): Extension<Identity>) -> String {
            identity.user_id
        }
        async fn maybe(identity: Option<Extension<Identity>>) -> String {
            identity.map(|Extension(i)| i.user_id).unwrap_or_else(|| "anonymous".into())
        }

        let admin = Router::new()
            .route("/admin", get(whoami))
            .route_layer(from_fn_with_state(AllowedRoles::admin_only(), require_roles))
            .route_layer(from_fn_with_state(state.clone(), require_auth));
        let open = Router::new()
            .route("/open", get(maybe))
            .route_layer(from_fn_with_state(state.clone(), optional_auth));
        admin.merge(open)
    }

    async fn call(router: &Router, path: &str, token: Option<&str>) -> (StatusCode, String) {
        let mut builder = axum::http::Request::builder().uri(path);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn capability_gate_admits_only_allowed_roles() {
        let app = test_app();
        let (admin_id, admin_token) = user_with_token(&app.state, "root@example.com", ADMIN_ROLE);
        let (_, user_token) = user_with_token(&app.state, "ana@example.com", USER_ROLE);
        let router = gated_router(app.state.clone());

        assert_eq!(call(&router, "/admin", Some(admin_token.as_str())).await, (StatusCode::OK, admin_id));
        assert_eq!(call(&router, "/admin", Some(user_token.as_str())).await.0, StatusCode::FORBIDDEN);
        assert_eq!(call(&router, "/admin", None).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn optional_auth_falls_back_to_anonymous() {
        let app = test_app();
        let (user_id, token) = user_with_token(&app.state, "ana@example.com", USER_ROLE);
        let router = gated_router(app.state.clone());

        assert_eq!(call(&router, "/open", Some(token.as_str())).await, (StatusCode::OK, user_id.clone()));
        assert_eq!(call(&router, "/open", None).await, (StatusCode::OK, "anonymous".to_string()));
        assert_eq!(
            call(&router, "/open", Some("garbage")).await,
            (StatusCode::OK, "anonymous".to_string())
        );

        UserRepository::new(&app.state.store)
            .set_disabled(&user_id, true, Utc::now())
            .unwrap();
        assert_eq!(call(&router, "/open", Some(token.as_str())).await.0, StatusCode::FORBIDDEN);
    }
}
