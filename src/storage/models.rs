// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persisted entities: users, roles, permissions and sessions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use utoipa::ToSchema;

/// A user account, one row per unique username.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Unique user identifier (UUID)
    pub id: String,
    /// Login name, stored normalized (see [`User::normalize_username`])
    pub username: String,
    pub email: String,
    /// PHC-formatted password hash (peppered)
    pub password_hash: String,
    /// Base32 TOTP secret when MFA is enrolled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa_secret: Option<String>,
    /// TOTP time step of the last accepted code; codes at or before it are spent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa_last_step: Option<u64>,
    /// Consecutive failed logins since the last success
    #[serde(default)]
    pub failed_attempts: u32,
    /// Account is locked until this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new, unlocked user without MFA.
    pub fn new(
        username: &str,
        email: impl Into<String>,
        password_hash: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: Self::normalize_username(username),
            email: email.into(),
            password_hash: password_hash.into(),
            mfa_secret: None,
            mfa_last_step: None,
            failed_attempts: 0,
            locked_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Canonical form used for uniqueness and lookup: trimmed, NFKC.
    pub fn normalize_username(username: &str) -> String {
        username.trim().nfkc().collect()
    }

    /// Whether a lock is still in force at `now`.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    /// Whether a code from time step `step` has not been spent yet.
    pub fn mfa_step_is_fresh(&self, step: u64) -> bool {
        self.mfa_last_step.is_none_or(|last| step > last)
    }

    /// Whether the user has an MFA secret configured.
    pub fn mfa_enabled(&self) -> bool {
        self.mfa_secret.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// A named group of permissions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Role {
    pub fn new(name: impl Into<String>, description: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            created_at: now,
        }
    }
}

/// A single grantable capability, e.g. `security_config:update`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub struct Permission {
    pub id: String,
    /// Name checked by the RBAC gate
    pub name: String,
    pub resource: String,
    pub action: String,
    pub created_at: DateTime<Utc>,
}

impl Permission {
    /// Create a permission named `resource:action`.
    pub fn new(resource: &str, action: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: format!("{resource}:{action}"),
            resource: resource.to_string(),
            action: action.to_string(),
            created_at: now,
        }
    }
}

/// Where a session was opened from.
///
/// Stored as an opaque JSON blob. Logic only reads the named keys; anything
/// else a client reports is kept in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocationData {
    /// Client address at login (used for impossible-travel hints)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl LocationData {
    pub fn from_ip(ip: Option<String>) -> Self {
        Self {
            ip,
            ..Self::default()
        }
    }
}

/// What kind of device opened a session. Opaque blob, documented keys only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceMetadata {
    #[serde(default = "unknown")]
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn unknown() -> String {
    "unknown".to_string()
}

impl Default for DeviceMetadata {
    fn default() -> Self {
        Self {
            os: unknown(),
            browser: None,
            platform: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Lifecycle state of a session at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Expired,
    Revoked,
}

/// One row per successful login. The only evidence that a token pair is
/// still honored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    /// Token pair identifier, unique
    pub token_jti: String,
    /// Keyed hash of the current refresh token (never the raw token)
    pub refresh_token_hash: String,
    /// Device fingerprint the session is bound to
    pub device_id: String,
    #[serde(default)]
    pub location: LocationData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub device_metadata: DeviceMetadata,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// One-way flag: never goes back to `false`
    #[serde(default)]
    pub revoked: bool,
}

impl Session {
    pub fn state_at(&self, now: DateTime<Utc>) -> SessionState {
        if self.revoked {
            SessionState::Revoked
        } else if now >= self.expires_at {
            SessionState::Expired
        } else {
            SessionState::Active
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.state_at(now) == SessionState::Active
    }
}
