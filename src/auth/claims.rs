// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity of an authenticated request.

use serde::Serialize;
use utoipa::ToSchema;

/// Resolved identity for a request whose bearer token, session and device
/// binding have all been checked.
///
/// Inserted into request extensions by the session middleware and read back
/// by the `Auth` extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AuthenticatedRequest {
    /// Subject of the access token
    pub user_id: String,
    /// Token pair / session key
    pub jti: String,
    /// Session row id
    pub session_id: String,
    /// Device fingerprint the session is bound to
    pub device_id: String,
}
