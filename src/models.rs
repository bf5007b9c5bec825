// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the REST API. All types derive `ToSchema`
//! for OpenAPI documentation.
//!
//! ## Model Categories
//!
//! - **Auth**: login, refresh, MFA and logout payloads
//! - **Session**: the caller's own session and permissions
//! - **Admin**: security tunables and the audit trail

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::gateway::{LoginOutcome, RefreshOutcome};
use crate::auth::mfa::TotpEnrollment;
use crate::auth::UserSummary;
use crate::error::ApiError;
use crate::storage::{AuditRecord, Permission, Session, SessionState};

/// Scheme reported in `token_type`.
pub const TOKEN_TYPE_BEARER: &str = "Bearer";

// =============================================================================
// Auth Models
// =============================================================================

/// Credentials for `POST /v1/auth/login`.
#[derive(Clone, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.username.trim().is_empty() {
            return Err(ApiError::bad_request("username is required"));
        }
        if self.password.is_empty() {
            return Err(ApiError::bad_request("password is required"));
        }
        Ok(())
    }
}

/// Issued tokens and the signed-in account.
#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Always `Bearer`.
    pub token_type: String,
    /// Access-token lifetime in seconds.
    pub expires_in: i64,
    /// The account has MFA enrolled; call `/v1/auth/mfa/verify` next.
    pub mfa_required: bool,
    pub user: UserSummary,
}

impl From<LoginOutcome> for LoginResponse {
    fn from(outcome: LoginOutcome) -> Self {
        Self {
            access_token: outcome.access_token,
            refresh_token: outcome.refresh_token,
            token_type: TOKEN_TYPE_BEARER.to_string(),
            expires_in: outcome.expires_in,
            mfa_required: outcome.mfa_required,
            user: outcome.user,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// New access token plus the rotated refresh token.
#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub access_token: String,
    /// Replaces the refresh token that was presented.
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl From<RefreshOutcome> for RefreshResponse {
    fn from(outcome: RefreshOutcome) -> Self {
        Self {
            access_token: outcome.access_token,
            refresh_token: outcome.refresh_token,
            token_type: TOKEN_TYPE_BEARER.to_string(),
            expires_in: outcome.expires_in,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MfaVerifyRequest {
    /// Six-digit one-time code.
    pub code: String,
}

/// Shown once at enrollment.
#[derive(Debug, Serialize, ToSchema)]
pub struct MfaEnrollResponse {
    /// Base32 secret for manual entry.
    pub secret: String,
    /// `otpauth://` URI for QR codes.
    pub otpauth_url: String,
}

impl From<TotpEnrollment> for MfaEnrollResponse {
    fn from(enrollment: TotpEnrollment) -> Self {
        Self {
            secret: enrollment.secret_base32,
            otpauth_url: enrollment.otpauth_url,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogoutAllResponse {
    pub message: String,
    pub sessions_revoked: usize,
}

// =============================================================================
// Session Models
// =============================================================================

/// The caller's current session.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub session_id: String,
    pub user_id: String,
    pub jti: String,
    pub device_id: String,
    pub state: SessionState,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionResponse {
    pub fn from_session(session: Session, now: DateTime<Utc>) -> Self {
        Self {
            state: session.state_at(now),
            session_id: session.id,
            user_id: session.user_id,
            jti: session.token_jti,
            device_id: session.device_id,
            ip_address: session.location.ip,
            user_agent: session.user_agent,
            created_at: session.created_at,
            expires_at: session.expires_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PermissionsResponse {
    pub user_id: String,
    /// Effective permissions, one entry per permission.
    pub permissions: Vec<Permission>,
}

// =============================================================================
// Admin Models
// =============================================================================

/// Body of `PUT /v1/admin/security-config`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateSecurityConfigRequest {
    /// One of `ACCESS_TOKEN_TTL_MINUTES`, `REFRESH_TOKEN_TTL_DAYS`,
    /// `MAX_FAILED_ATTEMPTS`, `LOCKOUT_DURATION_MINUTES`.
    pub key: String,
    pub value: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UpdateSecurityConfigResponse {
    pub message: String,
    pub key: String,
    pub value: i64,
}

/// Query parameters for audit log queries.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct AuditLogQuery {
    /// Filter by user ID.
    pub user_id: Option<String>,
    /// Filter by event type (e.g. `LOGIN_FAILURE`).
    pub event_type: Option<String>,
    /// Maximum number of results (default 100).
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditLogResponse {
    /// Newest first.
    pub events: Vec<AuditRecord>,
    pub count: usize,
}
