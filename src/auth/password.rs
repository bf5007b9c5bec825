// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Peppered Argon2id password hashing.
//!
//! The server-wide pepper is appended to the password before hashing, so a
//! leaked database alone is not enough to run an offline guessing attack.
//! Hashes are stored in PHC string format and carry their own salt and
//! parameters.

use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier as _, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;

/// OWASP minimum for Argon2id: 19 MiB, 2 iterations, 1 lane.
const PRODUCTION_MEMORY_KIB: u32 = 19_456;
const PRODUCTION_ITERATIONS: u32 = 2;
const PRODUCTION_PARALLELISM: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("invalid argon2 parameters: {0}")]
    Params(String),

    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Hashes and verifies passwords with a pepper injected once at construction.
///
/// Cloning is cheap; clones share the pepper.
#[derive(Clone)]
pub struct PasswordVerifier {
    pepper: Arc<str>,
    params: Params,
    /// Hash of a random password at the same cost, used to burn equal time
    /// for unknown usernames.
    dummy_hash: Arc<str>,
}

impl std::fmt::Debug for PasswordVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordVerifier")
            .field("pepper", &"<redacted>")
            .field("m_cost", &self.params.m_cost())
            .field("t_cost", &self.params.t_cost())
            .finish()
    }
}

impl PasswordVerifier {
    /// Verifier with production cost parameters.
    pub fn new(pepper: &str) -> Result<Self, PasswordError> {
        Self::with_params(pepper, Self::production_params()?)
    }

    pub fn production_params() -> Result<Params, PasswordError> {
        Params::new(
            PRODUCTION_MEMORY_KIB,
            PRODUCTION_ITERATIONS,
            PRODUCTION_PARALLELISM,
            None,
        )
        .map_err(|e| PasswordError::Params(e.to_string()))
    }

    pub fn with_params(pepper: &str, params: Params) -> Result<Self, PasswordError> {
        let mut verifier = Self {
            pepper: Arc::from(pepper),
            params,
            dummy_hash: Arc::from(""),
        };
        let filler = uuid::Uuid::new_v4().to_string();
        verifier.dummy_hash = Arc::from(verifier.hash(&filler)?);
        Ok(verifier)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    fn peppered(&self, password: &str) -> String {
        let mut input = String::with_capacity(password.len() + self.pepper.len());
        input.push_str(password);
        input.push_str(&self.pepper);
        input
    }

    /// Hash a password into a PHC string with a fresh random salt.
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(self.peppered(password).as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| PasswordError::Hash(e.to_string()))
    }

    /// Check a password against a stored hash.
    ///
    /// Any failure (malformed hash, unsupported algorithm, wrong password)
    /// is `false`.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        PasswordHash::new(hash)
            .map(|parsed| {
                self.argon2()
                    .verify_password(self.peppered(password).as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    }

    /// Spend the same work as a real verification, then discard the result.
    pub fn verify_dummy(&self, password: &str) {
        let _ = self.verify(password, &self.dummy_hash);
    }
}

#[cfg(test)]
pub(crate) fn fast_params() -> Params {
    Params::new(1024, 1, 1, None).unwrap()
}
