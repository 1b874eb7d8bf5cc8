// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    body::Body,
    http::Request,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    audit::audit_requests,
    auth::{
        middleware::{optional_auth, require_auth, require_roles},
        AllowedRoles,
    },
    models::{
        AuditListResponse, AuthStatusResponse, ChangePasswordRequest, CreateRoleRequest,
        CreateUserRequest, LoginRequest, LoginResponse, LogoutResponse, RoleListResponse, RoleView,
        SessionListResponse, SessionView, UpdateUserStatusRequest, UserListResponse, UserSummary,
        UserView,
    },
    state::AppState,
    storage::AuditRecord,
};

pub mod audit;
pub mod auth;
pub mod extract;
pub mod health;
pub mod roles;
pub mod users;

/// Full HTTP surface.
///
/// Layering, outermost first: request id, tracing, CORS, audit, then the
/// per-group auth and capability gates installed as route layers.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/status", get(auth::status))
        .route_layer(from_fn_with_state(state.clone(), optional_auth));

    let user_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/logout-all", post(auth::logout_all))
        .route("/auth/sessions", get(auth::list_sessions))
        .route("/auth/password", put(auth::change_password))
        .route("/users/me", get(users::get_me))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let admin_routes = Router::new()
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/{user_id}/status", put(users::update_user_status))
        .route("/roles", get(roles::list_roles).post(roles::create_role))
        .route("/roles/{role_id}", delete(roles::delete_role))
        .route("/audit", get(audit::list_audit_records))
        .route("/audit/{record_id}", get(audit::get_audit_record))
        .route_layer(from_fn_with_state(AllowedRoles::admin_only(), require_roles))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let v1_routes = public_routes.merge(user_routes).merge(admin_routes);

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/v1", v1_routes)
        .layer(from_fn_with_state(state.clone(), audit_requests))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri().path(),
                        request_id = %request_id,
                    )
                }))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CorsLayer::permissive()),
        )
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        auth::login,
        auth::status,
        auth::logout,
        auth::logout_all,
        auth::list_sessions,
        auth::change_password,
        users::get_me,
        users::list_users,
        users::create_user,
        users::update_user_status,
        roles::list_roles,
        roles::create_role,
        roles::delete_role,
        audit::list_audit_records,
        audit::get_audit_record
    ),
    components(
        schemas(
            LoginRequest,
            LoginResponse,
            UserSummary,
            AuthStatusResponse,
            LogoutResponse,
            ChangePasswordRequest,
            SessionView,
            SessionListResponse,
            UserView,
            UserListResponse,
            CreateUserRequest,
            UpdateUserStatusRequest,
            RoleView,
            RoleListResponse,
            CreateRoleRequest,
            AuditRecord,
            AuditListResponse,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login, logout and session history"),
        (name = "Users", description = "Current user and user administration"),
        (name = "Roles", description = "Role administration"),
        (name = "Audit", description = "Audit trail of state-changing requests"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
pub struct ApiDoc;
