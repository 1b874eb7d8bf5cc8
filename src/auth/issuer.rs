// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer token issuance and verification (HS256).
//!
//! A token is valid when its signature, issuer and expiry check out AND it
//! is present in its user's active-token list. Verification here covers the
//! first part; the auth gate checks the list.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use super::{claims::TokenClaims, AuthError};
use crate::clock::Clock;
use crate::error::ApiError;
use crate::storage::{Store, UserRepository};

/// Lifetime of an issued token.
pub const TOKEN_TTL_HOURS: i64 = 24;

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: i64 = 60;

/// Freshly minted token as returned to the caller.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], issuer: impl Into<String>, store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            ttl: Duration::hours(TOKEN_TTL_HOURS),
            store,
            clock,
        }
    }

    /// Sign a claim set for `user_id` without recording it anywhere.
    pub fn sign(&self, user_id: &str) -> Result<IssuedToken, ApiError> {
        let now = self.clock.now();
        let expires_at = now + self.ttl;
        let claims = TokenClaims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ApiError::internal(format!("token signing failed: {e}")))?;
        Ok(IssuedToken {
            token,
            claims,
            expires_at,
        })
    }

    /// Mint a token and append it to the user's active-token list.
    ///
    /// Expired tokens of the user are pruned in the same transaction.
    pub fn issue(&self, user_id: &str) -> Result<IssuedToken, ApiError> {
        let issued = self.sign(user_id)?;
        let pruned = UserRepository::new(&self.store).push_token(
            user_id,
            &issued.token,
            issued.expires_at,
            self.clock.now(),
        )?;
        if pruned > 0 {
            tracing::debug!(user_id, pruned, "Pruned expired tokens");
        }
        Ok(issued)
    }

    /// Check signature, issuer and expiry. Says nothing about revocation.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["sub", "iss", "exp"]);
        validation.validate_aud = false;
        // Expiry is checked below against the injected clock
        validation.validate_exp = false;

        let claims = decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::MalformedToken,
            })?
            .claims;

        if claims.exp + CLOCK_SKEW_LEEWAY < self.clock.now().timestamp() {
            return Err(AuthError::TokenExpired);
        }
        Ok(claims)
    }
}
