// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! PBKDF2-HMAC-SHA256 password hashing.
//!
//! Hashes are self-describing: `pbkdf2-sha256$<iterations>$<salt>$<hash>`
//! with base64 (unpadded) salt and hash, so the iteration count can be raised
//! without invalidating existing hashes.

use std::num::NonZeroU32;

use base64ct::{Base64Unpadded, Encoding};
use ring::{
    pbkdf2,
    rand::{SecureRandom, SystemRandom},
};

use crate::error::ApiError;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;
const ALGORITHM: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

pub struct PasswordHasher {
    iterations: NonZeroU32,
    rng: SystemRandom,
    /// Hash verified against when the user does not exist, so lookups of
    /// unknown emails cost the same as wrong passwords.
    dummy: String,
}

impl PasswordHasher {
    pub fn new(iterations: NonZeroU32) -> Result<Self, ApiError> {
        let mut hasher = Self {
            iterations,
            rng: SystemRandom::new(),
            dummy: String::new(),
        };
        hasher.dummy = hasher.hash("not-a-real-password")?;
        Ok(hasher)
    }

    pub fn hash(&self, password: &str) -> Result<String, ApiError> {
        let mut salt = [0u8; SALT_LEN];
        self.rng
            .fill(&mut salt)
            .map_err(|_| ApiError::internal("system randomness unavailable"))?;

        let mut hash = [0u8; HASH_LEN];
        pbkdf2::derive(ALGORITHM, self.iterations, &salt, password.as_bytes(), &mut hash);

        Ok(format!(
            "{SCHEME}${}${}${}",
            self.iterations,
            Base64Unpadded::encode_string(&salt),
            Base64Unpadded::encode_string(&hash)
        ))
    }

    /// Constant-time check of `password` against a stored hash.
    /// Malformed hashes never verify.
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        let Some((iterations, salt, hash)) = parse(stored) else {
            tracing::warn!("Stored password hash has an unknown format");
            return false;
        };
        pbkdf2::verify(ALGORITHM, iterations, &salt, password.as_bytes(), &hash).is_ok()
    }

    /// Burn the same work as a real verification and fail.
    pub fn verify_dummy(&self, password: &str) -> bool {
        let _ = self.verify(password, &self.dummy);
        false
    }
}

fn parse(stored: &str) -> Option<(NonZeroU32, Vec<u8>, Vec<u8>)> {
    let mut parts = stored.split('$');
    if parts.next()? != SCHEME {
        return None;
    }
    let iterations = parts.next()?.parse::<NonZeroU32>().ok()?;
    let salt = Base64Unpadded::decode_vec(parts.next()?).ok()?;
    let hash = Base64Unpadded::decode_vec(parts.next()?).ok()?;
    if parts.next().is_some() || hash.is_empty() {
        return None;
    }
    Some((iterations, salt, hash))
}
