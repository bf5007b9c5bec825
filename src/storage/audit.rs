// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Security audit records.
//!
//! Every authentication decision, session revocation and configuration change
//! is appended to the audit sink. Records are write-once: nothing in this
//! crate updates or deletes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    // Credential events
    LoginSuccess,
    LoginFailure,

    // MFA events
    MfaSuccess,
    MfaFailure,
    MfaEnrolled,

    // Session events
    TokenRefresh,
    RefreshTokenReuse,
    SessionHijackAttempt,
    Logout,
    LogoutAll,

    // Authorization events
    PermissionDenied,

    // Admin events
    ConfigChange,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::LoginSuccess => "LOGIN_SUCCESS",
            AuditEventType::LoginFailure => "LOGIN_FAILURE",
            AuditEventType::MfaSuccess => "MFA_SUCCESS",
            AuditEventType::MfaFailure => "MFA_FAILURE",
            AuditEventType::MfaEnrolled => "MFA_ENROLLED",
            AuditEventType::TokenRefresh => "TOKEN_REFRESH",
            AuditEventType::RefreshTokenReuse => "REFRESH_TOKEN_REUSE",
            AuditEventType::SessionHijackAttempt => "SESSION_HIJACK_ATTEMPT",
            AuditEventType::Logout => "LOGOUT",
            AuditEventType::LogoutAll => "LOGOUT_ALL",
            AuditEventType::PermissionDenied => "PERMISSION_DENIED",
            AuditEventType::ConfigChange => "CONFIG_CHANGE",
        }
    }

    /// Parse the wire name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        let upper = s.to_ascii_uppercase();
        ALL_EVENT_TYPES.iter().copied().find(|t| t.as_str() == upper)
    }
}

const ALL_EVENT_TYPES: [AuditEventType; 12] = [
    AuditEventType::LoginSuccess,
    AuditEventType::LoginFailure,
    AuditEventType::MfaSuccess,
    AuditEventType::MfaFailure,
    AuditEventType::MfaEnrolled,
    AuditEventType::TokenRefresh,
    AuditEventType::RefreshTokenReuse,
    AuditEventType::SessionHijackAttempt,
    AuditEventType::Logout,
    AuditEventType::LogoutAll,
    AuditEventType::PermissionDenied,
    AuditEventType::ConfigChange,
];

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct AuditRecord {
    /// Unique event ID.
    pub id: String,
    /// Type of event.
    pub event_type: AuditEventType,
    /// User the event concerns (absent for unknown usernames).
    pub user_id: Option<String>,
    /// Resource affected (`auth`, `security_config`, ...).
    pub resource: String,
    /// Action performed on the resource (`login`, `refresh`, ...).
    pub action: String,
    /// Snapshot before the change.
    #[schema(value_type = Option<Object>)]
    pub old_values: Option<Map<String, Value>>,
    /// Snapshot after the change, or event details.
    #[schema(value_type = Option<Object>)]
    pub new_values: Option<Map<String, Value>>,
    /// Origin address of the request (if available).
    pub ip_address: Option<String>,
    /// User agent of the request (if available).
    pub user_agent: Option<String>,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Create a new audit record.
    pub fn new(
        event_type: AuditEventType,
        resource: impl Into<String>,
        action: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            user_id: None,
            resource: resource.into(),
            action: action.into(),
            old_values: None,
            new_values: None,
            ip_address: None,
            user_agent: None,
            timestamp,
        }
    }

    /// Set the user ID.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the origin address.
    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.ip_address = ip;
        self
    }

    /// Set the user agent.
    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    /// Attach the "before" snapshot. Non-object values are wrapped under `value`.
    pub fn with_old_values(mut self, values: Value) -> Self {
        self.old_values = Some(into_object(values));
        self
    }

    /// Attach the "after" snapshot or event details.
    pub fn with_new_values(mut self, values: Value) -> Self {
        self.new_values = Some(into_object(values));
        self
    }
}

fn into_object(values: Value) -> Map<String, Value> {
    match values {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// Filter for reading the audit trail back (admin views).
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: Option<String>,
    pub event_type: Option<AuditEventType>,
    /// Maximum number of records, newest first
    pub limit: usize,
}

impl AuditFilter {
    pub const DEFAULT_LIMIT: usize = 100;

    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.user_id
            .as_deref()
            .is_none_or(|uid| record.user_id.as_deref() == Some(uid))
            && self.event_type.is_none_or(|t| record.event_type == t)
    }

    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            Self::DEFAULT_LIMIT
        } else {
            self.limit
        }
    }
}
