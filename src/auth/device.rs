// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Device-fingerprint binding.
//!
//! A session remembers the fingerprint presented at login. Later requests
//! must present the same one; a mismatch is treated as a stolen token.

use base64ct::{Base64UrlUnpadded, Encoding};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Fingerprint used when a client sends no `X-Device-Fingerprint` header.
pub const DEFAULT_DEVICE_ID: &str = "default-device";

/// Header carrying the caller's device fingerprint.
pub const DEVICE_FINGERPRINT_HEADER: &str = "x-device-fingerprint";

/// Longest fingerprint kept verbatim.
pub const MAX_FINGERPRINT_LEN: usize = 256;

/// Prefix of the digest form used for longer fingerprints.
const DIGEST_PREFIX: &str = "sha256:";

/// A caller-presented device fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFingerprint(String);

impl DeviceFingerprint {
    /// Build from an optional header value. Missing or blank means
    /// [`DEFAULT_DEVICE_ID`]. Values longer than [`MAX_FINGERPRINT_LEN`]
    /// are stored as a digest of the whole value.
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) if v.len() > MAX_FINGERPRINT_LEN => {
                let digest = Sha256::digest(v.as_bytes());
                Self(format!("{DIGEST_PREFIX}{}", Base64UrlUnpadded::encode_string(&digest)))
            }
            Some(v) => Self(v.to_string()),
            None => Self::default(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DeviceFingerprint {
    fn default() -> Self {
        Self(DEFAULT_DEVICE_ID.to_string())
    }
}

impl From<&str> for DeviceFingerprint {
    fn from(value: &str) -> Self {
        Self::from_header(Some(value))
    }
}

impl std::fmt::Display for DeviceFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compares recorded and presented fingerprints without leaking where they
/// differ.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceBindingGuard;

impl DeviceBindingGuard {
    /// Both sides are hashed first so the comparison runs over equal-length
    /// digests regardless of input length.
    pub fn matches(&self, recorded: &str, presented: &str) -> bool {
        let recorded = Sha256::digest(recorded.as_bytes());
        let presented = Sha256::digest(presented.as_bytes());
        recorded.as_slice().ct_eq(presented.as_slice()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_fingerprints_match() {
        assert!(DeviceBindingGuard.matches("laptop-1", "laptop-1"));
    }

    #[test]
    fn different_fingerprints_do_not_match() {
        let guard = DeviceBindingGuard;
        assert!(!guard.matches("laptop-1", "laptop-2"));
        assert!(!guard.matches("laptop-1", "laptop-1-extra"));
        assert!(!guard.matches("", "laptop-1"));
    }

    #[test]
    fn missing_header_uses_the_sentinel() {
        assert_eq!(DeviceFingerprint::from_header(None).as_str(), DEFAULT_DEVICE_ID);
        assert_eq!(DeviceFingerprint::from_header(Some("   ")).as_str(), DEFAULT_DEVICE_ID);
        assert_eq!(DeviceFingerprint::from_header(Some(" abc ")).as_str(), "abc");
    }

    #[test]
    fn overlong_fingerprints_keep_their_full_identity() {
        let base = "x".repeat(MAX_FINGERPRINT_LEN);
        let a = DeviceFingerprint::from_header(Some(&format!("{base}-phone")));
        let b = DeviceFingerprint::from_header(Some(&format!("{base}-laptop")));

        assert!(a.as_str().len() <= MAX_FINGERPRINT_LEN);
        assert!(a.as_str().starts_with("sha256:"));
        assert_ne!(a, b);
        assert!(!DeviceBindingGuard.matches(a.as_str(), b.as_str()));
        assert_eq!(a, DeviceFingerprint::from_header(Some(&format!("{base}-phone"))));
    }

    #[test]
    fn fingerprint_at_the_limit_is_kept_verbatim() {
        let exact = "y".repeat(MAX_FINGERPRINT_LEN);
        assert_eq!(DeviceFingerprint::from_header(Some(&exact)).as_str(), exact);
    }
}
