// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the REST API. Storage records never leave
//! the service directly: password hashes, token lists and token fingerprints
//! stay behind these views.
//!
//! ## Model Categories
//!
//! - **Auth**: login, status, logout and password change
//! - **Users**: administration and the current-user view
//! - **Roles**: role administration
//! - **Sessions**: login history of the caller
//! - **Audit**: audit trail queries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::storage::{AuditRecord, RevokeOutcome, StoredRole, StoredSession, StoredUser};

// =============================================================================
// Auth Models
// =============================================================================

/// Credentials submitted to `/v1/auth/login`.
///
/// Both fields are optional at the wire level so that a missing email is
/// still throttled (by client IP) and reported as a validation error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Public part of a user, safe to embed in any response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl From<&StoredUser> for UserSummary {
    fn from(user: &StoredUser) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
        }
    }
}

/// Successful login.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    /// Bearer token for the `Authorization` header.
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// Role name of the user.
    pub role: String,
    pub user: UserSummary,
}

/// Who the caller is, if anyone.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthStatusResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Result of logout, logout-all and password change.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogoutResponse {
    pub message: String,
    pub tokens_revoked: usize,
    pub sessions_deactivated: usize,
}

impl LogoutResponse {
    pub fn new(message: impl Into<String>, outcome: RevokeOutcome) -> Self {
        Self {
            message: message.into(),
            tokens_revoked: outcome.tokens_removed,
            sessions_deactivated: outcome.sessions_deactivated,
        }
    }
}

/// Password change of the calling user.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    #[serde(alias = "oldPassword")]
    pub old_password: String,
    #[serde(alias = "newPassword")]
    pub new_password: String,
    #[serde(alias = "confirmPassword")]
    pub confirm_password: String,
}

// =============================================================================
// User Models
// =============================================================================

/// User as shown to administrators and to the user themself.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserView {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Role name; `null` when the role no longer resolves.
    pub role: Option<String>,
    pub disabled: bool,
    pub verified: bool,
    /// Number of tokens currently valid for this user.
    pub active_tokens: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserView {
    pub fn new(user: &StoredUser, role: Option<String>) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role,
            disabled: user.disabled,
            verified: user.verified,
            active_tokens: user.tokens.len(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserListResponse {
    pub users: Vec<UserView>,
    pub total: usize,
}

/// Administrative user creation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    /// Role name, defaults to `user`.
    #[serde(default)]
    pub role: Option<String>,
}

/// Enable or disable an account.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateUserStatusRequest {
    pub disabled: bool,
}

// =============================================================================
// Role Models
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct RoleView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl From<StoredRole> for RoleView {
    fn from(role: StoredRole) -> Self {
        Self {
            id: role.id,
            name: role.name,
            description: role.description,
            deleted: role.deleted,
            created_at: role.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleListResponse {
    pub roles: Vec<RoleView>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct RoleListParams {
    /// Include logically deleted roles.
    #[serde(default)]
    pub include_deleted: bool,
}

// =============================================================================
// Session Models
// =============================================================================

/// One login of the caller. The token fingerprint is never exposed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionView {
    pub id: String,
    pub ip: String,
    pub location: String,
    pub device: String,
    pub active: bool,
    /// The session of the token used for this request.
    pub current: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionView {
    pub fn new(session: StoredSession, current_fingerprint: &str) -> Self {
        Self {
            current: session.token_fingerprint == current_fingerprint,
            id: session.id,
            ip: session.ip,
            location: session.location,
            device: session.device,
            active: session.active,
            created_at: session.created_at,
            expires_at: session.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionView>,
    pub total: usize,
}

// =============================================================================
// Audit Models
// =============================================================================

/// Largest accepted `limit` for audit listing.
pub const MAX_AUDIT_PAGE_SIZE: usize = 100;

/// Query parameters of `GET /v1/audit`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct AuditListParams {
    /// Actor user ID.
    pub actor: Option<String>,
    /// Case-insensitive substring of the activity label.
    pub activity: Option<String>,
    /// HTTP method.
    pub method: Option<String>,
    /// Inclusive lower bound (RFC 3339).
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound (RFC 3339).
    pub to: Option<DateTime<Utc>>,
    /// 1-based page number (default 1).
    pub page: Option<usize>,
    /// Page size (default 20, max 100).
    pub limit: Option<usize>,
    /// Include request and response bodies (default false).
    #[serde(default)]
    pub include_bodies: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditListResponse {
    pub records: Vec<AuditRecord>,
    /// Matching records before pagination.
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub has_more: bool,
}
