// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Login, logout and session endpoints.

use axum::{extract::State, Extension, Json};
use tracing::{error, info, warn};

use super::extract::ValidJson;
use super::users::{check_password, is_valid_email};
use crate::{
    audit::ClientMeta,
    auth::{roles::resolve_role, throttle::LoginThrottle, Auth, AuthError, Identity, OptionalAuth},
    error::{ApiError, FieldErrors},
    models::{
        AuthStatusResponse, ChangePasswordRequest, LoginRequest, LoginResponse, LogoutResponse,
        SessionListResponse, SessionView, UserSummary,
    },
    state::AppState,
    storage::{normalize_email, token_fingerprint, StoredUser, UserRepository},
};

fn invalid_credentials() -> ApiError {
    ApiError::unauthenticated("Invalid email or password").with_code("invalid_credentials")
}

/// Look up the user and check the password.
///
/// Unknown emails still pay for one hash computation.
fn check_credentials(state: &AppState, email: &str, password: &str) -> Result<StoredUser, ApiError> {
    match UserRepository::new(&state.store).find_by_email(email)? {
        Some(user) if state.passwords.verify(password, &user.password_hash) => Ok(user),
        Some(_) => Err(invalid_credentials()),
        None => {
            state.passwords.verify_dummy(password);
            Err(invalid_credentials())
        }
    }
}

/// Authenticate with email and password.
///
/// At most five failed attempts per email (or client IP when no email is
/// given) in 15 minutes; successful logins do not count.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 400, description = "Validation failed"),
        (status = 401, description = "Invalid email or password"),
        (status = 403, description = "Account disabled"),
        (status = 429, description = "Too many login attempts")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    meta: ClientMeta,
    ValidJson(request): ValidJson<LoginRequest>,
) -> Result<(Extension<Identity>, Json<LoginResponse>), ApiError> {
    let email = request
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|e| !e.is_empty());
    let key = LoginThrottle::key_for(email.as_deref(), &meta.ip);
    let permit = state.throttle.try_acquire(&key)?;

    let mut errors = FieldErrors::new();
    errors
        .check(
            email.as_deref().is_some_and(is_valid_email),
            "email must be a valid email address",
        )
        .check(
            request.password.as_deref().is_some_and(|p| !p.is_empty()),
            "password is required",
        );
    errors.finish()?;
    let (Some(email), Some(password)) = (email, request.password) else {
        return Err(ApiError::bad_request("email and password are required"));
    };

    let worker = state.clone();
    let user = tokio::task::spawn_blocking(move || check_credentials(&worker, &email, &password))
        .await
        .map_err(|e| ApiError::internal(format!("credential check task failed: {e}")))??;

    if user.disabled {
        warn!(user_id = %user.id, "Login refused for disabled account");
        return Err(AuthError::AccountDisabled.into());
    }
    let role = resolve_role(&state.store, &user.role_id)?.ok_or(AuthError::UnknownRole)?;

    let issued = state.issuer.issue(&user.id)?;
    if let Err(e) = state.sessions.record_login(&user.id, &issued.token, &meta) {
        // Without a session row the token must not stay valid
        if let Err(rollback) = UserRepository::new(&state.store).remove_token(&user.id, &issued.token) {
            error!(user_id = %user.id, error = %rollback, "Failed to roll back token after session error");
        }
        return Err(e);
    }

    state.throttle.release(permit);
    info!(user_id = %user.id, ip = %meta.ip, device = %meta.device, "Login succeeded");

    // Names the new session's user as the actor of the audit record
    let identity = Identity {
        user_id: user.id.clone(),
        email: user.email.clone(),
        role: role.name.clone(),
        token: issued.token.clone(),
    };
    Ok((
        Extension(identity),
        Json(LoginResponse {
            token: issued.token,
            expires_at: issued.expires_at,
            role: role.name,
            user: UserSummary::from(&user),
        }),
    ))
}

/// Who is calling. Never fails for anonymous callers.
#[utoipa::path(
    get,
    path = "/v1/auth/status",
    tag = "Auth",
    responses(
        (status = 200, description = "Authentication status", body = AuthStatusResponse),
        (status = 403, description = "Account disabled")
    )
)]
pub async fn status(OptionalAuth(identity): OptionalAuth) -> Json<AuthStatusResponse> {
    Json(match identity {
        Some(identity) => AuthStatusResponse {
            authenticated: true,
            user_id: Some(identity.user_id),
            email: Some(identity.email),
            role: Some(identity.role),
        },
        None => AuthStatusResponse {
            authenticated: false,
            user_id: None,
            email: None,
            role: None,
        },
    })
}

/// Revoke the presented token and deactivate its session.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Logged out", body = LogoutResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn logout(Auth(identity): Auth, State(state): State<AppState>) -> Result<Json<LogoutResponse>, ApiError> {
    let outcome = state.sessions.deactivate_one(&identity.user_id, &identity.token)?;
    Ok(Json(LogoutResponse::new("Logged out", outcome)))
}

/// Revoke every token of the caller, on all devices.
#[utoipa::path(
    post,
    path = "/v1/auth/logout-all",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Logged out everywhere", body = LogoutResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn logout_all(
    Auth(identity): Auth,
    State(state): State<AppState>,
) -> Result<Json<LogoutResponse>, ApiError> {
    let outcome = state.sessions.deactivate_all(&identity.user_id)?;
    Ok(Json(LogoutResponse::new("Logged out from all devices", outcome)))
}

/// Login history of the caller, newest first.
#[utoipa::path(
    get,
    path = "/v1/auth/sessions",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Session history", body = SessionListResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_sessions(
    Auth(identity): Auth,
    State(state): State<AppState>,
) -> Result<Json<SessionListResponse>, ApiError> {
    let current = token_fingerprint(&identity.token);
    let sessions: Vec<SessionView> = state
        .sessions
        .list_for_user(&identity.user_id)?
        .into_iter()
        .map(|s| SessionView::new(s, &current))
        .collect();
    let total = sessions.len();
    Ok(Json(SessionListResponse { sessions, total }))
}

/// Change the caller's password. Every token and session is revoked,
/// including the one used for this request.
#[utoipa::path(
    put,
    path = "/v1/auth/password",
    tag = "Auth",
    security(("bearer_auth" = [])),
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed, all sessions revoked", body = LogoutResponse),
        (status = 400, description = "Validation failed or current password incorrect"),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn change_password(
    Auth(identity): Auth,
    State(state): State<AppState>,
    ValidJson(request): ValidJson<ChangePasswordRequest>,
) -> Result<Json<LogoutResponse>, ApiError> {
    let mut errors = FieldErrors::new();
    errors
        .check(!request.old_password.is_empty(), "old_password is required")
        .check(
            request.new_password == request.confirm_password,
            "confirm_password must match new_password",
        )
        .check(
            request.new_password != request.old_password,
            "new_password must differ from old_password",
        );
    check_password(&mut errors, "new_password", &request.new_password);
    errors.finish()?;

    let user = UserRepository::new(&state.store).get(&identity.user_id)?;
    let (current_ok, new_hash) = {
        let worker = state.clone();
        tokio::task::spawn_blocking(move || {
            let ok = worker.passwords.verify(&request.old_password, &user.password_hash);
            let hash = if ok {
                worker.passwords.hash(&request.new_password).map(Some)
            } else {
                Ok(None)
            };
            (ok, hash)
        })
        .await
        .map_err(|e| ApiError::internal(format!("password task failed: {e}")))?
    };
    if !current_ok {
        return Err(ApiError::bad_request("Current password is incorrect").with_code("invalid_password"));
    }
    let new_hash = new_hash?.ok_or_else(|| ApiError::internal("password hash missing"))?;

    let outcome = UserRepository::new(&state.store).update_password(&identity.user_id, &new_hash, state.clock.now())?;
    info!(
        user_id = %identity.user_id,
        tokens = outcome.tokens_removed,
        sessions = outcome.sessions_deactivated,
        "Password changed"
    );
    Ok(Json(LogoutResponse::new("Password changed, please log in again", outcome)))
}
