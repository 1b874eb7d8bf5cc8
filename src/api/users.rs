// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User endpoints: the current user and user administration.

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use super::extract::ValidJson;
use crate::{
    auth::{roles::resolve_role, Auth, USER_ROLE},
    error::{ApiError, FieldErrors},
    models::{CreateUserRequest, UpdateUserStatusRequest, UserListResponse, UserView},
    state::AppState,
    storage::{normalize_email, RoleRepository, StoredRole, StoredUser, UserRepository},
};

const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;
const MAX_NAME_LEN: usize = 100;
const MAX_EMAIL_LEN: usize = 254;

/// Loose structural email check: `local@domain.tld`, no whitespace.
pub(crate) fn is_valid_email(email: &str) -> bool {
    if email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.split('.').count() >= 2
                && domain.split('.').all(|label| !label.is_empty())
        }
        None => false,
    }
}

/// Record every way `password` falls short of the password policy.
pub(crate) fn check_password(errors: &mut FieldErrors, field: &str, password: &str) {
    let len = password.chars().count();
    errors
        .check(
            (MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len),
            format!("{field} must be between {MIN_PASSWORD_LEN} and {MAX_PASSWORD_LEN} characters"),
        )
        .check(
            password.chars().any(char::is_alphabetic),
            format!("{field} must contain a letter"),
        )
        .check(
            password.chars().any(|c| c.is_ascii_digit()),
            format!("{field} must contain a digit"),
        );
}

fn check_name(errors: &mut FieldErrors, field: &str, value: &str) {
    let trimmed = value.trim();
    errors.check(
        !trimmed.is_empty() && trimmed.chars().count() <= MAX_NAME_LEN,
        format!("{field} must be between 1 and {MAX_NAME_LEN} characters"),
    );
}

/// Validate and persist a new account.
///
/// Shared by the admin endpoint and startup seeding. Hashes the password, so
/// async callers run it on the blocking pool.
pub(crate) fn create_account(
    state: &AppState,
    request: &CreateUserRequest,
    verified: bool,
) -> Result<(StoredUser, StoredRole), ApiError> {
    let email = normalize_email(&request.email);
    let mut errors = FieldErrors::new();
    errors.check(is_valid_email(&email), "email must be a valid email address");
    check_name(&mut errors, "first_name", &request.first_name);
    check_name(&mut errors, "last_name", &request.last_name);
    check_password(&mut errors, "password", &request.password);
    errors.finish()?;

    let role_name = request.role.as_deref().map(str::trim).unwrap_or(USER_ROLE);
    let role = RoleRepository::new(&state.store)
        .find_by_name(role_name)?
        .filter(|r| !r.deleted)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown role: {role_name}")))?;

    let now = state.clock.now();
    let user = StoredUser {
        id: uuid::Uuid::new_v4().to_string(),
        email,
        first_name: request.first_name.trim().to_string(),
        last_name: request.last_name.trim().to_string(),
        password_hash: state.passwords.hash(&request.password)?,
        role_id: role.id.clone(),
        disabled: false,
        verified,
        tokens: Vec::new(),
        created_at: now,
        updated_at: now,
    };
    UserRepository::new(&state.store).create(&user)?;
    Ok((user, role))
}

/// Current user.
#[utoipa::path(
    get,
    path = "/v1/users/me",
    tag = "Users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = UserView),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn get_me(Auth(identity): Auth, State(state): State<AppState>) -> Result<Json<UserView>, ApiError> {
    let user = UserRepository::new(&state.store).get(&identity.user_id)?;
    Ok(Json(UserView::new(&user, Some(identity.role))))
}

/// List all users. Admin only.
#[utoipa::path(
    get,
    path = "/v1/users",
    tag = "Users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All users", body = UserListResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<UserListResponse>, ApiError> {
    let role_names: HashMap<String, String> = RoleRepository::new(&state.store)
        .list(false)?
        .into_iter()
        .map(|r| (r.id, r.name))
        .collect();

    let users: Vec<UserView> = UserRepository::new(&state.store)
        .list()?
        .iter()
        .map(|u| UserView::new(u, role_names.get(&u.role_id).cloned()))
        .collect();
    let total = users.len();
    Ok(Json(UserListResponse { users, total }))
}

/// Create a user. Admin only.
#[utoipa::path(
    post,
    path = "/v1/users",
    tag = "Users",
    security(("bearer_auth" = [])),
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = UserView),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn create_user(
    Auth(admin): Auth,
    State(state): State<AppState>,
    ValidJson(request): ValidJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserView>), ApiError> {
    let worker = state.clone();
    let (user, role) = tokio::task::spawn_blocking(move || create_account(&worker, &request, false))
        .await
        .map_err(|e| ApiError::internal(format!("account creation task failed: {e}")))??;
    info!(user_id = %user.id, role = %role.name, created_by = %admin.user_id, "User created");
    Ok((StatusCode::CREATED, Json(UserView::new(&user, Some(role.name)))))
}

/// Enable or disable an account. Admin only.
///
/// Disabling keeps the user's tokens listed; the auth gate refuses them with
/// 403 until the account is enabled again.
#[utoipa::path(
    put,
    path = "/v1/users/{user_id}/status",
    tag = "Users",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "User ID")),
    request_body = UpdateUserStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = UserView),
        (status = 400, description = "Administrators cannot disable themselves"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 404, description = "User not found")
    )
)]
pub async fn update_user_status(
    Auth(admin): Auth,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ValidJson(request): ValidJson<UpdateUserStatusRequest>,
) -> Result<Json<UserView>, ApiError> {
    if request.disabled && admin.user_id == user_id {
        return Err(ApiError::bad_request("You cannot disable your own account"));
    }

    let user = UserRepository::new(&state.store).set_disabled(&user_id, request.disabled, state.clock.now())?;
    info!(user_id = %user.id, disabled = user.disabled, changed_by = %admin.user_id, "User status changed");

    let role = resolve_role(&state.store, &user.role_id)?.map(|r| r.name);
    Ok(Json(UserView::new(&user, role)))
}
