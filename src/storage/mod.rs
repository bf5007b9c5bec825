// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Capability traits for everything the authentication core persists, plus
//! two implementations:
//!
//! - [`database::AuthDatabase`]: embedded redb file (ACID, pure Rust), used by
//!   the server binary.
//! - [`memory::InMemoryStore`]: process-local maps, used by tests and demos.
//!
//! ## Table Layout
//!
//! ```text
//! users               user_id        -> User (JSON)
//! usernames           username       -> user_id
//! roles               role_id        -> Role (JSON)
//! permissions         permission_id  -> Permission (JSON)
//! user_roles          user_id|role_id        -> role_id
//! role_permissions    role_id|permission_id  -> permission_id
//! user_sessions       jti            -> Session (JSON)
//! user_session_index  user_id|jti    -> jti
//! audit_logs          micros|id      -> AuditRecord (JSON)
//! security_config     key            -> value
//! ```
//!
//! ## Consistency
//!
//! Every security decision reads the latest committed value; nothing here is
//! cached. The failed-attempt counter is updated by a single
//! read-modify-write under the store's write lock, never by two calls.

pub mod audit;
pub mod database;
pub mod memory;
pub mod models;
pub mod seed;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::auth::lockout::{LockoutPolicy, LockoutState};

pub use audit::{AuditEventType, AuditFilter, AuditRecord};
pub use database::AuthDatabase;
pub use memory::InMemoryStore;
pub use models::{DeviceMetadata, LocationData, Permission, Role, Session, SessionState, User};

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Ports
// =============================================================================

/// Users, their lockout counters and their role-derived permissions.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up by username. The argument is normalized before lookup.
    async fn user_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    async fn user_by_id(&self, user_id: &str) -> StoreResult<Option<User>>;

    /// Apply `policy.on_failure` to the stored counter and persist the result
    /// atomically. Returns the state that was written.
    async fn record_failed_attempt(
        &self,
        user_id: &str,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<LockoutState>;

    /// Clear the failed-attempt counter and any lock.
    async fn reset_failed_attempts(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<()>;

    /// Set or clear the TOTP secret.
    async fn update_mfa_secret(
        &self,
        user_id: &str,
        secret: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Mark the TOTP time step `step` as spent. Returns `false`, changing
    /// nothing, when a code at or after that step was already accepted.
    async fn record_mfa_step(&self, user_id: &str, step: u64, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Raw user -> role -> permission join. May contain duplicates when
    /// several roles grant the same permission.
    async fn permissions_for_user(&self, user_id: &str) -> StoreResult<Vec<Permission>>;
}

/// Session rows keyed by token id (`jti`).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session. Fails with `AlreadyExists` on a duplicate `jti`.
    async fn create_session(&self, session: &Session) -> StoreResult<()>;

    async fn session_by_jti(&self, jti: &str) -> StoreResult<Option<Session>>;

    /// Mark one session revoked. Returns `true` if this call flipped the flag;
    /// revoking an already revoked or unknown session is not an error.
    async fn revoke_by_jti(&self, jti: &str) -> StoreResult<bool>;

    /// Revoke every live session of a user. Returns how many were flipped.
    async fn revoke_by_user(&self, user_id: &str) -> StoreResult<usize>;

    /// Compare-and-swap the refresh hash and extend the expiry.
    ///
    /// Returns `false` (and writes nothing) if the session is missing,
    /// revoked, or its current hash is not `expected_hash`.
    async fn rotate_refresh_hash(
        &self,
        jti: &str,
        expected_hash: &str,
        new_hash: &str,
        new_expires_at: DateTime<Utc>,
    ) -> StoreResult<bool>;
}

/// Append-only security event sink.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> StoreResult<()>;
}

/// Read access to the audit trail, newest first.
#[async_trait]
pub trait AuditLogReader: Send + Sync {
    async fn query(&self, filter: &AuditFilter) -> StoreResult<Vec<AuditRecord>>;
}

/// Persisted security tunables (string values, validated by the config layer).
#[async_trait]
pub trait SecurityConfigStore: Send + Sync {
    async fn config_value(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set_config_value(&self, key: &str, value: &str) -> StoreResult<()>;
}

/// Reference-data administration used by seeding and tests.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Insert a user. Fails with `AlreadyExists` if the username is taken.
    async fn create_user(&self, user: &User) -> StoreResult<()>;

    async fn insert_role(&self, role: &Role) -> StoreResult<()>;

    async fn role_by_name(&self, name: &str) -> StoreResult<Option<Role>>;

    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()>;

    async fn permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>>;

    async fn grant_permission(&self, role_id: &str, permission_id: &str) -> StoreResult<()>;

    async fn assign_role(&self, user_id: &str, role_id: &str) -> StoreResult<()>;
}

/// Composite key used by the join tables.
pub(crate) fn join_key(left: &str, right: &str) -> String {
    format!("{left}|{right}")
}
