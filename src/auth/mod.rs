// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Credentials, sessions and request gating for the portal API.
//!
//! ## Auth Flow
//!
//! 1. Client posts email and password to `/v1/auth/login`
//! 2. The login throttle reserves an attempt for the email (or client IP)
//! 3. The password is checked against the stored PBKDF2 hash
//! 4. An HS256 token is minted and appended to the user's active-token list
//! 5. A session row records device, location and IP
//! 6. Client sends `Authorization: Bearer <token>` on later requests
//! 7. The auth gate verifies the token, checks it is still in the list,
//!    rejects disabled accounts and resolves the role
//!
//! ## Revocation
//!
//! Removing a token from the active-token list is the only way to revoke
//! it. Logout removes one token, logout-all and password changes remove all
//! of them. Sessions are deactivated in the same transaction.
//!
//! ## Security
//!
//! - Tokens expire after 24 hours; clock skew tolerance is 60 seconds
//! - Five failed logins per 15 minutes per email, successes are free
//! - Session rows hold a SHA-256 fingerprint of the token, never the token

pub mod claims;
pub mod error;
pub mod extractor;
pub mod issuer;
pub mod middleware;
pub mod password;
pub mod roles;
pub mod sessions;
pub mod throttle;

pub use claims::{Identity, TokenClaims};
pub use error::AuthError;
pub use extractor::{Auth, OptionalAuth};
pub use issuer::{IssuedToken, TokenIssuer};
pub use roles::{AllowedRoles, ADMIN_ROLE, USER_ROLE};
