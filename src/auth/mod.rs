// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Credential checks, device-bound sessions and role-based permissions.
//!
//! ## Auth Flow
//!
//! 1. Client posts username and password to `/v1/auth/login`, sending an
//!    `X-Device-Fingerprint` header
//! 2. Server verifies the peppered Argon2id hash, applies lockout rules,
//!    and opens a session bound to the fingerprint
//! 3. Client receives an access and a refresh token sharing one `jti`
//! 4. Each request sends `Authorization: Bearer <access token>`; the server
//!    checks the signature, expiry, session state and device binding
//! 5. `/v1/auth/refresh` trades the refresh token for a new pair; a spent
//!    refresh token revokes the session
//!
//! ## Security
//!
//! - Unknown usernames and wrong passwords are indistinguishable to callers
//! - Tokens are HS256 only; any other `alg` header is refused
//! - Refresh tokens are stored as keyed hashes, never in clear
//! - A device mismatch revokes the session on the spot
//! - Store failures deny, they never grant

pub mod claims;
pub mod clock;
pub mod device;
pub mod error;
pub mod extractor;
pub mod gateway;
pub mod lockout;
pub mod mfa;
pub mod middleware;
pub mod password;
pub mod permissions;
pub mod token;

pub use claims::AuthenticatedRequest;
pub use error::AuthError;
pub use extractor::{
    Auth, Authorized, ReadAuditLogs, ReadSecurityConfig, RequestScope, RequiredPermission,
    UpdateSecurityConfig,
};
pub use gateway::{AuthGateway, AuthSecrets, ClientContext, LoginAttempt, Stores, UserSummary};
pub use permissions::{PermissionResolver, PermissionSet};
