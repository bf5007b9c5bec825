// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::token::TokenError;
use crate::error::{error_response, ApiError};
use crate::storage::StoreError;

/// Authentication error type.
///
/// Unknown usernames and wrong passwords both surface as
/// `InvalidCredentials`; the distinction only reaches the audit trail.
#[derive(Debug)]
pub enum AuthError {
    /// Unknown user or wrong password
    InvalidCredentials,
    /// Lock still in force
    AccountLocked,
    /// Bad signature, wrong algorithm or malformed claims
    InvalidToken,
    /// Token or session past expiry
    TokenExpired,
    /// Session missing, revoked, or its refresh token was replayed
    SessionRevoked,
    /// Presented device differs from the one bound at login
    DeviceMismatch,
    /// Authenticated but lacking the required permission
    InsufficientPermissions,
    /// Wrong one-time code, or no MFA secret configured
    MfaInvalid,
    /// No authorization header present
    MissingAuthHeader,
    /// Invalid authorization header format
    InvalidAuthHeader,
    /// Caller went away or the request deadline passed
    Cancelled,
    /// Backing store failed; callers must deny
    StoreUnavailable(StoreError),
    /// Internal error
    Internal(String),
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountLocked => "account_locked",
            AuthError::InvalidToken => "invalid_token",
            AuthError::TokenExpired => "token_expired",
            AuthError::SessionRevoked => "session_revoked",
            AuthError::DeviceMismatch => "device_mismatch",
            AuthError::InsufficientPermissions => "insufficient_permissions",
            AuthError::MfaInvalid => "mfa_invalid",
            AuthError::MissingAuthHeader => "missing_auth_header",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::Cancelled => "request_cancelled",
            AuthError::StoreUnavailable(_) => "store_unavailable",
            AuthError::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::AccountLocked
            | AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::SessionRevoked
            | AuthError::DeviceMismatch
            | AuthError::MfaInvalid
            | AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader => StatusCode::UNAUTHORIZED,
            AuthError::InsufficientPermissions => StatusCode::FORBIDDEN,
            AuthError::Cancelled | AuthError::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message sent to clients. Never carries internal detail.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "Invalid username or password",
            AuthError::AccountLocked => "Account is temporarily locked",
            AuthError::InvalidToken => "Token is invalid",
            AuthError::TokenExpired => "Token has expired",
            AuthError::SessionRevoked => "Session is no longer valid, please sign in again",
            AuthError::DeviceMismatch => "Session is bound to a different device",
            AuthError::InsufficientPermissions => "Insufficient permissions for this operation",
            AuthError::MfaInvalid => "Invalid verification code",
            AuthError::MissingAuthHeader => "Authorization header is required",
            AuthError::InvalidAuthHeader => {
                "Invalid authorization header format (expected 'Bearer <token>')"
            }
            AuthError::Cancelled => "Request was cancelled",
            AuthError::StoreUnavailable(_) => "Service temporarily unavailable",
            AuthError::Internal(_) => "Internal authentication error",
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::StoreUnavailable(err) => write!(f, "Store unavailable: {err}"),
            AuthError::Internal(msg) => write!(f, "Internal authentication error: {msg}"),
            other => f.write_str(other.public_message()),
        }
    }
}

impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AuthError::StoreUnavailable(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::StoreUnavailable(err)
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AuthError::TokenExpired,
            TokenError::InvalidSignature
            | TokenError::MalformedClaims
            | TokenError::WrongType { .. } => AuthError::InvalidToken,
            TokenError::Signing(msg) => AuthError::Internal(msg),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let internal = matches!(err, AuthError::StoreUnavailable(_) | AuthError::Internal(_))
            .then(|| err.to_string());
        ApiError {
            status: err.status_code(),
            message: err.public_message().to_string(),
            error_code: err.error_code(),
            internal,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (response, trace_id) =
            error_response(self.status_code(), self.public_message(), self.error_code());
        match &self {
            AuthError::StoreUnavailable(_) | AuthError::Internal(_) => {
                tracing::error!(trace_id = %trace_id, error = %self, "Authentication failed");
            }
            _ => {
                tracing::debug!(trace_id = %trace_id, error_code = self.error_code(), "Request rejected");
            }
        }
        response
    }
}
