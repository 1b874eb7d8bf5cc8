// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::response::{IntoResponse, Response};

use crate::error::{ApiError, ErrorKind};

/// Authentication and authorization failure.
///
/// Every variant maps onto one [`ErrorKind`]; the variant itself survives as
/// `error_code` in the response body.
#[derive(Debug)]
pub enum AuthError {
    /// No authorization header present
    MissingAuthHeader,
    /// Invalid authorization header format
    InvalidAuthHeader,
    /// Token is malformed
    MalformedToken,
    /// Token signature is invalid
    InvalidSignature,
    /// Token issuer is invalid
    InvalidIssuer,
    /// Token has expired
    TokenExpired,
    /// Token is valid but no longer in the user's active list
    TokenRevoked,
    /// The user's role record is gone
    UnknownRole,
    /// The account is disabled
    AccountDisabled,
    /// Authenticated but the role is not allowed here
    InsufficientPermissions,
    /// Storage failure while authenticating
    InternalError(String),
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => "missing_auth_header",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::MalformedToken => "malformed_token",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::InvalidIssuer => "invalid_issuer",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenRevoked => "token_revoked",
            AuthError::UnknownRole => "unknown_role",
            AuthError::AccountDisabled => "account_disabled",
            AuthError::InsufficientPermissions => "insufficient_permissions",
            AuthError::InternalError(_) => "internal_error",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::AccountDisabled | AuthError::InsufficientPermissions => ErrorKind::Forbidden,
            AuthError::InternalError(_) => ErrorKind::Internal,
            _ => ErrorKind::Unauthenticated,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingAuthHeader => write!(f, "Authorization header is required"),
            AuthError::InvalidAuthHeader => {
                write!(f, "Invalid authorization header format (expected 'Bearer <token>')")
            }
            AuthError::MalformedToken => write!(f, "Token is malformed"),
            AuthError::InvalidSignature => write!(f, "Token signature is invalid"),
            AuthError::InvalidIssuer => write!(f, "Token issuer is invalid"),
            AuthError::TokenExpired => write!(f, "Token has expired"),
            AuthError::TokenRevoked => write!(f, "Token is no longer active"),
            AuthError::UnknownRole => write!(f, "User role could not be resolved"),
            AuthError::AccountDisabled => write!(f, "Account is disabled"),
            AuthError::InsufficientPermissions => {
                write!(f, "Insufficient permissions for this operation")
            }
            AuthError::InternalError(msg) => write!(f, "Internal authentication error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let code = err.error_code();
        match err {
            AuthError::InternalError(cause) => ApiError::internal(cause).with_code(code),
            other => ApiError::new(other.kind(), other.to_string()).with_code(code),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}
