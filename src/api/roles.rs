// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Role administration. Admin only.

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use super::extract::ValidJson;
use crate::{
    auth::{Auth, ADMIN_ROLE, USER_ROLE},
    error::{ApiError, FieldErrors},
    models::{CreateRoleRequest, RoleListParams, RoleListResponse, RoleView},
    state::AppState,
    storage::{RoleRepository, StoredRole},
};

const MAX_ROLE_NAME_LEN: usize = 50;
const MAX_DESCRIPTION_LEN: usize = 500;

fn is_valid_role_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().count() <= MAX_ROLE_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == ' ')
}

/// List roles.
#[utoipa::path(
    get,
    path = "/v1/roles",
    tag = "Roles",
    security(("bearer_auth" = [])),
    params(RoleListParams),
    responses(
        (status = 200, description = "Roles", body = RoleListResponse),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn list_roles(
    State(state): State<AppState>,
    params: Result<Query<RoleListParams>, QueryRejection>,
) -> Result<Json<RoleListResponse>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let roles: Vec<RoleView> = RoleRepository::new(&state.store)
        .list(params.include_deleted)?
        .into_iter()
        .map(RoleView::from)
        .collect();
    let total = roles.len();
    Ok(Json(RoleListResponse { roles, total }))
}

/// Create a role. Names are unique ignoring case, deleted roles included.
#[utoipa::path(
    post,
    path = "/v1/roles",
    tag = "Roles",
    security(("bearer_auth" = [])),
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Role created", body = RoleView),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Role name taken")
    )
)]
pub async fn create_role(
    Auth(admin): Auth,
    State(state): State<AppState>,
    ValidJson(request): ValidJson<CreateRoleRequest>,
) -> Result<(StatusCode, Json<RoleView>), ApiError> {
    let name = request.name.trim();
    let description = request.description.as_deref().unwrap_or("").trim();
    let mut errors = FieldErrors::new();
    errors
        .check(
            is_valid_role_name(name),
            format!("name must be 1 to {MAX_ROLE_NAME_LEN} letters, digits, spaces, '-' or '_'"),
        )
        .check(
            description.chars().count() <= MAX_DESCRIPTION_LEN,
            format!("description must be at most {MAX_DESCRIPTION_LEN} characters"),
        );
    errors.finish()?;

    let role = StoredRole::new(name, description, state.clock.now());
    RoleRepository::new(&state.store).create(&role)?;
    info!(role_id = %role.id, name = %role.name, created_by = %admin.user_id, "Role created");
    Ok((StatusCode::CREATED, Json(RoleView::from(role))))
}

/// Logically delete a role. Refused while any user holds it.
#[utoipa::path(
    delete,
    path = "/v1/roles/{role_id}",
    tag = "Roles",
    security(("bearer_auth" = [])),
    params(("role_id" = String, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role deleted", body = RoleView),
        (status = 404, description = "Role not found"),
        (status = 409, description = "Role in use or built in")
    )
)]
pub async fn delete_role(
    Auth(admin): Auth,
    State(state): State<AppState>,
    Path(role_id): Path<String>,
) -> Result<Json<RoleView>, ApiError> {
    let repo = RoleRepository::new(&state.store);
    let role = repo.get(&role_id)?;
    if role.name.eq_ignore_ascii_case(ADMIN_ROLE) || role.name.eq_ignore_ascii_case(USER_ROLE) {
        return Err(ApiError::conflict("Built-in roles cannot be deleted"));
    }

    let deleted = repo.soft_delete(&role_id)?;
    info!(role_id = %deleted.id, name = %deleted.name, deleted_by = %admin.user_id, "Role deleted");
    Ok(Json(RoleView::from(deleted)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_names() {
        assert!(is_valid_role_name("evaluator"));
        assert!(is_valid_role_name("Project Lead"));
        assert!(is_valid_role_name("read_only-2"));
        assert!(!is_valid_role_name(""));
        assert!(!is_valid_role_name("drop;table"));
        assert!(!is_valid_role_name(&"x".repeat(51)));
    }
}
