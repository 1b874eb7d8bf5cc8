// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer token claims and the authenticated identity attached to requests.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Claim set of an issued bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expiration (unix seconds)
    pub exp: i64,
    /// Unique token ID; keeps two tokens minted in the same second distinct
    pub jti: String,
}

/// Authenticated caller.
///
/// Inserted into request extensions by the auth gate and mirrored into the
/// response extensions so outer layers can name the actor.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    /// Resolved role name
    pub role: String,
    /// Presented bearer token (never serialized)
    #[serde(skip)]
    #[schema(ignore)]
    pub token: String,
}

impl Identity {
    /// Case-insensitive role check.
    pub fn has_role(&self, role: &str) -> bool {
        self.role.eq_ignore_ascii_case(role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(super::roles::ADMIN_ROLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(role: &str) -> Identity {
        Identity {
            user_id: "u1".to_string(),
            email: "ana@example.com".to_string(),
            role: role.to_string(),
            token: "secret-token".to_string(),
        }
    }

    #[test]
    fn has_role_ignores_case() {
        assert!(identity("Admin").has_role("admin"));
        assert!(identity("admin").is_admin());
        assert!(!identity("user").is_admin());
    }

    #[test]
    fn token_is_never_serialized() {
        let json = serde_json::to_value(identity("user")).unwrap();
        assert!(json.get("token").is_none());
        assert_eq!(json["role"], "user");
    }
}
