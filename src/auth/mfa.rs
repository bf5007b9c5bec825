// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Second-factor verification.
//!
//! [`MfaVerifier`] is the extension point the gateway calls. The default is
//! RFC 6238 TOTP (SHA-1, 6 digits, 30 s step, one step of skew).
//! [`StaticCodeMfaVerifier`] accepts a single configured code and exists only
//! for demos.
//!
//! A verifier reports the time step a code belongs to, so callers can refuse
//! a second use of the same code within its skew window.

use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use totp_rs::{Algorithm, Secret, TOTP};

const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum MfaError {
    #[error("TOTP secret generation failed: {0}")]
    Secret(String),

    #[error("TOTP init failed: {0}")]
    Totp(String),
}

/// Checks a one-time code against a user's stored secret.
pub trait MfaVerifier: Send + Sync {
    /// Time step of the accepted code, or `None` if the code is wrong.
    fn verify(&self, secret: &str, code: &str, now: DateTime<Utc>) -> Option<u64>;
}

/// TOTP time step containing `now`.
pub fn time_step(now: DateTime<Utc>) -> Option<u64> {
    u64::try_from(now.timestamp()).ok().map(|secs| secs / TOTP_STEP_SECS)
}

fn build_totp(secret_bytes: Vec<u8>, issuer: &str, account: &str) -> Result<TOTP, MfaError> {
    TOTP::new(
        Algorithm::SHA1,
        TOTP_DIGITS,
        TOTP_SKEW,
        TOTP_STEP_SECS,
        secret_bytes,
        Some(issuer.to_string()),
        account.to_string(),
    )
    .map_err(|e| MfaError::Totp(e.to_string()))
}

fn is_well_formed(code: &str) -> bool {
    code.len() == TOTP_DIGITS && code.bytes().all(|b| b.is_ascii_digit())
}

/// RFC 6238 verifier over base32 secrets.
#[derive(Debug, Clone, Default)]
pub struct TotpMfaVerifier;

impl MfaVerifier for TotpMfaVerifier {
    fn verify(&self, secret: &str, code: &str, now: DateTime<Utc>) -> Option<u64> {
        let code = code.trim();
        if !is_well_formed(code) {
            return None;
        }
        let bytes = Secret::Encoded(secret.to_string()).to_bytes().ok()?;
        let totp = build_totp(bytes, "verify", "user").ok()?;
        let current = time_step(now)?;
        let skew = u64::from(TOTP_SKEW);

        // No early exit: every step in the window is compared
        let mut matched = None;
        for step in current.saturating_sub(skew)..=current + skew {
            let expected = totp.generate(step * TOTP_STEP_SECS);
            if bool::from(expected.as_bytes().ct_eq(code.as_bytes())) && matched.is_none() {
                matched = Some(step);
            }
        }
        matched
    }
}

/// Accepts one fixed code for every user. Not for production.
#[derive(Debug, Clone)]
pub struct StaticCodeMfaVerifier {
    code: String,
}

impl StaticCodeMfaVerifier {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

impl MfaVerifier for StaticCodeMfaVerifier {
    fn verify(&self, _secret: &str, code: &str, now: DateTime<Utc>) -> Option<u64> {
        let code = code.trim();
        let matches = !code.is_empty() && bool::from(code.as_bytes().ct_eq(self.code.as_bytes()));
        if matches {
            time_step(now)
        } else {
            None
        }
    }
}

/// A freshly generated TOTP secret, ready to show to the user once.
#[derive(Debug, Clone)]
pub struct TotpEnrollment {
    /// Base32 secret to persist and to type into an authenticator
    pub secret_base32: String,
    /// `otpauth://` provisioning URI
    pub otpauth_url: String,
}

impl TotpEnrollment {
    pub fn generate(issuer: &str, account: &str) -> Result<Self, MfaError> {
        let bytes = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| MfaError::Secret(e.to_string()))?;
        let totp = build_totp(bytes, issuer, account)?;
        Ok(Self {
            secret_base32: totp.get_secret_base32(),
            otpauth_url: totp.get_url(),
        })
    }
}
