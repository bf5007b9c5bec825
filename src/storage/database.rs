// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded authentication database backed by redb (pure Rust, ACID).
//!
//! Every write goes through a single redb write transaction, and redb admits
//! one writer at a time, so read-modify-write operations such as
//! [`CredentialStore::record_failed_attempt`] and
//! [`SessionStore::rotate_refresh_hash`] are atomic.
//!
//! redb is synchronous; the async trait impls hop onto the blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;

use super::{
    join_key, AuditFilter, AuditLogReader, AuditRecord, AuditSink, CredentialStore,
    DirectoryStore, Permission, Role, SecurityConfigStore, Session, SessionStore, StoreError,
    StoreResult, User,
};
use crate::auth::lockout::{LockoutPolicy, LockoutState};

// =============================================================================
// Table Definitions
// =============================================================================

/// user_id → serialized User (JSON bytes).
const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Normalized username → user_id. Enforces username uniqueness.
const USERNAMES: TableDefinition<&str, &str> = TableDefinition::new("usernames");

const ROLES: TableDefinition<&str, &[u8]> = TableDefinition::new("roles");

const PERMISSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("permissions");

/// `user_id|role_id` → role_id.
const USER_ROLES: TableDefinition<&str, &str> = TableDefinition::new("user_roles");

/// `role_id|permission_id` → permission_id.
const ROLE_PERMISSIONS: TableDefinition<&str, &str> = TableDefinition::new("role_permissions");

/// jti → serialized Session (JSON bytes).
const USER_SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("user_sessions");

/// `user_id|jti` → jti, for revoke-by-user.
const USER_SESSION_INDEX: TableDefinition<&str, &str> = TableDefinition::new("user_session_index");

/// `zero-padded micros|record_id` → serialized AuditRecord. Keys sort by time.
const AUDIT_LOGS: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_logs");

const SECURITY_CONFIG: TableDefinition<&str, &str> = TableDefinition::new("security_config");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => StoreError::NotFound(what),
            DbError::AlreadyExists(what) => StoreError::AlreadyExists(what),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

// =============================================================================
// Key Helpers
// =============================================================================

/// Inclusive start and exclusive end of all `prefix|...` keys.
///
/// `}` is the byte after `|`, so the end bound sorts past every key with the
/// prefix.
fn prefix_range(prefix: &str) -> (String, String) {
    (format!("{prefix}|"), format!("{prefix}}}"))
}

fn audit_key(record: &AuditRecord) -> String {
    let micros = record.timestamp.timestamp_micros().max(0);
    format!("{micros:020}|{}", record.id)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

// =============================================================================
// AuthDatabase
// =============================================================================

/// redb-backed implementation of every storage port.
#[derive(Clone)]
pub struct AuthDatabase {
    db: Arc<Database>,
}

impl AuthDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USERNAMES)?;
            let _ = write_txn.open_table(ROLES)?;
            let _ = write_txn.open_table(PERMISSIONS)?;
            let _ = write_txn.open_table(USER_ROLES)?;
            let _ = write_txn.open_table(ROLE_PERMISSIONS)?;
            let _ = write_txn.open_table(USER_SESSIONS)?;
            let _ = write_txn.open_table(USER_SESSION_INDEX)?;
            let _ = write_txn.open_table(AUDIT_LOGS)?;
            let _ = write_txn.open_table(SECURITY_CONFIG)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Run a synchronous database closure on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Database) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&*db))
            .await
            .map_err(|e| StoreError::Unavailable(format!("blocking task failed: {e}")))?
            .map_err(StoreError::from)
    }

    // =========================================================================
    // Synchronous helpers
    // =========================================================================

    fn get_user(db: &Database, user_id: &str) -> DbResult<Option<User>> {
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(USERS)?;
        match table.get(user_id)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    /// Load, mutate and store a user inside an open write transaction.
    fn update_user<R>(
        write_txn: &WriteTransaction,
        user_id: &str,
        mutate: impl FnOnce(&mut User) -> R,
    ) -> DbResult<R> {
        let mut table = write_txn.open_table(USERS)?;
        let existing = {
            let value = table
                .get(user_id)?
                .ok_or_else(|| DbError::NotFound(format!("user {user_id}")))?;
            value.value().to_vec()
        };
        let mut user: User = decode(&existing)?;
        let result = mutate(&mut user);
        let json = serde_json::to_vec(&user)?;
        table.insert(user_id, json.as_slice())?;
        Ok(result)
    }

    fn get_session(db: &Database, jti: &str) -> DbResult<Option<Session>> {
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(USER_SESSIONS)?;
        match table.get(jti)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    /// Load, mutate and store a session inside an open write transaction.
    /// The closure returns whether anything changed; unchanged rows are not
    /// rewritten. A missing session yields `false`.
    fn update_session(
        write_txn: &WriteTransaction,
        jti: &str,
        mutate: impl FnOnce(&mut Session) -> bool,
    ) -> DbResult<bool> {
        let mut table = write_txn.open_table(USER_SESSIONS)?;
        let existing = match table.get(jti)? {
            Some(value) => value.value().to_vec(),
            None => return Ok(false),
        };
        let mut session: Session = decode(&existing)?;
        if !mutate(&mut session) {
            return Ok(false);
        }
        let json = serde_json::to_vec(&session)?;
        table.insert(jti, json.as_slice())?;
        Ok(true)
    }

    fn find_by_name<T: DeserializeOwned>(
        db: &Database,
        def: TableDefinition<'static, &'static str, &'static [u8]>,
        matches: impl Fn(&T) -> bool,
    ) -> DbResult<Option<T>> {
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(def)?;
        for entry in table.iter()? {
            let (_, value) = entry?;
            let item: T = decode(value.value())?;
            if matches(&item) {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }
}

// =============================================================================
// CredentialStore
// =============================================================================

#[async_trait]
impl CredentialStore for AuthDatabase {
    async fn user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let username = User::normalize_username(username);
        self.blocking(move |db| {
            let user_id = {
                let read_txn = db.begin_read()?;
                let table = read_txn.open_table(USERNAMES)?;
                match table.get(username.as_str())? {
                    Some(value) => value.value().to_string(),
                    None => return Ok(None),
                }
            };
            Self::get_user(db, &user_id)
        })
        .await
    }

    async fn user_by_id(&self, user_id: &str) -> StoreResult<Option<User>> {
        let user_id = user_id.to_string();
        self.blocking(move |db| Self::get_user(db, &user_id)).await
    }

    async fn record_failed_attempt(
        &self,
        user_id: &str,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<LockoutState> {
        let user_id = user_id.to_string();
        let policy = *policy;
        self.blocking(move |db| {
            let write_txn = db.begin_write()?;
            let state = Self::update_user(&write_txn, &user_id, |user| {
                let state = policy.on_failure(user.failed_attempts, now);
                user.failed_attempts = state.failed_attempts;
                user.locked_until = state.locked_until;
                user.updated_at = now;
                state
            })?;
            write_txn.commit()?;
            Ok(state)
        })
        .await
    }

    async fn reset_failed_attempts(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<()> {
        let user_id = user_id.to_string();
        self.blocking(move |db| {
            let write_txn = db.begin_write()?;
            Self::update_user(&write_txn, &user_id, |user| {
                user.failed_attempts = 0;
                user.locked_until = None;
                user.updated_at = now;
            })?;
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn update_mfa_secret(
        &self,
        user_id: &str,
        secret: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let user_id = user_id.to_string();
        let secret = secret.map(str::to_string);
        self.blocking(move |db| {
            let write_txn = db.begin_write()?;
            Self::update_user(&write_txn, &user_id, |user| {
                user.mfa_secret = secret;
                user.updated_at = now;
            })?;
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn record_mfa_step(&self, user_id: &str, step: u64, now: DateTime<Utc>) -> StoreResult<bool> {
        let user_id = user_id.to_string();
        self.blocking(move |db| {
            let write_txn = db.begin_write()?;
            let fresh = Self::update_user(&write_txn, &user_id, |user| {
                if !user.mfa_step_is_fresh(step) {
                    return false;
                }
                user.mfa_last_step = Some(step);
                user.updated_at = now;
                true
            })?;
            if fresh {
                write_txn.commit()?;
            } else {
                write_txn.abort()?;
            }
            Ok(fresh)
        })
        .await
    }

    async fn permissions_for_user(&self, user_id: &str) -> StoreResult<Vec<Permission>> {
        let user_id = user_id.to_string();
        self.blocking(move |db| {
            let read_txn = db.begin_read()?;
            let user_roles = read_txn.open_table(USER_ROLES)?;
            let role_permissions = read_txn.open_table(ROLE_PERMISSIONS)?;
            let permissions = read_txn.open_table(PERMISSIONS)?;

            let (start, end) = prefix_range(&user_id);
            let mut role_ids = Vec::new();
            for entry in user_roles.range(start.as_str()..end.as_str())? {
                let (_, role_id) = entry?;
                role_ids.push(role_id.value().to_string());
            }

            let mut out = Vec::new();
            for role_id in role_ids {
                let (start, end) = prefix_range(&role_id);
                for entry in role_permissions.range(start.as_str()..end.as_str())? {
                    let (_, permission_id) = entry?;
                    if let Some(value) = permissions.get(permission_id.value())? {
                        out.push(decode(value.value())?);
                    }
                }
            }
            Ok(out)
        })
        .await
    }
}

// =============================================================================
// SessionStore
// =============================================================================

#[async_trait]
impl SessionStore for AuthDatabase {
    async fn create_session(&self, session: &Session) -> StoreResult<()> {
        let session = session.clone();
        self.blocking(move |db| {
            let json = serde_json::to_vec(&session)?;
            let write_txn = db.begin_write()?;
            {
                let mut sessions = write_txn.open_table(USER_SESSIONS)?;
                if sessions.get(session.token_jti.as_str())?.is_some() {
                    return Err(DbError::AlreadyExists(format!(
                        "session {}",
                        session.token_jti
                    )));
                }
                sessions.insert(session.token_jti.as_str(), json.as_slice())?;

                let mut index = write_txn.open_table(USER_SESSION_INDEX)?;
                let key = join_key(&session.user_id, &session.token_jti);
                index.insert(key.as_str(), session.token_jti.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn session_by_jti(&self, jti: &str) -> StoreResult<Option<Session>> {
        let jti = jti.to_string();
        self.blocking(move |db| Self::get_session(db, &jti)).await
    }

    async fn revoke_by_jti(&self, jti: &str) -> StoreResult<bool> {
        let jti = jti.to_string();
        self.blocking(move |db| {
            let write_txn = db.begin_write()?;
            let flipped = Self::update_session(&write_txn, &jti, |session| {
                let was_live = !session.revoked;
                session.revoked = true;
                was_live
            })?;
            write_txn.commit()?;
            Ok(flipped)
        })
        .await
    }

    async fn revoke_by_user(&self, user_id: &str) -> StoreResult<usize> {
        let user_id = user_id.to_string();
        self.blocking(move |db| {
            let write_txn = db.begin_write()?;
            let jtis = {
                let index = write_txn.open_table(USER_SESSION_INDEX)?;
                let (start, end) = prefix_range(&user_id);
                let mut jtis = Vec::new();
                for entry in index.range(start.as_str()..end.as_str())? {
                    let (_, jti) = entry?;
                    jtis.push(jti.value().to_string());
                }
                jtis
            };

            let mut count = 0;
            for jti in &jtis {
                let flipped = Self::update_session(&write_txn, jti, |session| {
                    let was_live = !session.revoked;
                    session.revoked = true;
                    was_live
                })?;
                if flipped {
                    count += 1;
                }
            }
            write_txn.commit()?;
            Ok(count)
        })
        .await
    }

    async fn rotate_refresh_hash(
        &self,
        jti: &str,
        expected_hash: &str,
        new_hash: &str,
        new_expires_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let jti = jti.to_string();
        let expected_hash = expected_hash.to_string();
        let new_hash = new_hash.to_string();
        self.blocking(move |db| {
            let write_txn = db.begin_write()?;
            let swapped = Self::update_session(&write_txn, &jti, |session| {
                if session.revoked || session.refresh_token_hash != expected_hash {
                    return false;
                }
                session.refresh_token_hash = new_hash;
                session.expires_at = new_expires_at;
                true
            })?;
            write_txn.commit()?;
            Ok(swapped)
        })
        .await
    }
}

// =============================================================================
// Audit
// =============================================================================

#[async_trait]
impl AuditSink for AuthDatabase {
    async fn record(&self, record: &AuditRecord) -> StoreResult<()> {
        let record = record.clone();
        self.blocking(move |db| {
            let json = serde_json::to_vec(&record)?;
            let key = audit_key(&record);
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(AUDIT_LOGS)?;
                table.insert(key.as_str(), json.as_slice())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl AuditLogReader for AuthDatabase {
    async fn query(&self, filter: &AuditFilter) -> StoreResult<Vec<AuditRecord>> {
        let filter = filter.clone();
        self.blocking(move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(AUDIT_LOGS)?;
            let limit = filter.effective_limit();

            let mut out = Vec::with_capacity(limit.min(256));
            for entry in table.iter()?.rev() {
                let (_, value) = entry?;
                let record: AuditRecord = decode(value.value())?;
                if filter.matches(&record) {
                    out.push(record);
                    if out.len() >= limit {
                        break;
                    }
                }
            }
            Ok(out)
        })
        .await
    }
}

// =============================================================================
// SecurityConfigStore
// =============================================================================

#[async_trait]
impl SecurityConfigStore for AuthDatabase {
    async fn config_value(&self, key: &str) -> StoreResult<Option<String>> {
        let key = key.to_string();
        self.blocking(move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(SECURITY_CONFIG)?;
            Ok(table.get(key.as_str())?.map(|v| v.value().to_string()))
        })
        .await
    }

    async fn set_config_value(&self, key: &str, value: &str) -> StoreResult<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.blocking(move |db| {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(SECURITY_CONFIG)?;
                table.insert(key.as_str(), value.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }
}

// =============================================================================
// DirectoryStore
// =============================================================================

#[async_trait]
impl DirectoryStore for AuthDatabase {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        let user = user.clone();
        self.blocking(move |db| {
            let json = serde_json::to_vec(&user)?;
            let write_txn = db.begin_write()?;
            {
                let mut usernames = write_txn.open_table(USERNAMES)?;
                if usernames.get(user.username.as_str())?.is_some() {
                    return Err(DbError::AlreadyExists(format!("username {}", user.username)));
                }
                usernames.insert(user.username.as_str(), user.id.as_str())?;

                let mut users = write_txn.open_table(USERS)?;
                users.insert(user.id.as_str(), json.as_slice())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        let role = role.clone();
        self.blocking(move |db| {
            let json = serde_json::to_vec(&role)?;
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(ROLES)?;
                table.insert(role.id.as_str(), json.as_slice())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let name = name.to_string();
        self.blocking(move |db| Self::find_by_name(db, ROLES, |r: &Role| r.name == name))
            .await
    }

    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()> {
        let permission = permission.clone();
        self.blocking(move |db| {
            let json = serde_json::to_vec(&permission)?;
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(PERMISSIONS)?;
                table.insert(permission.id.as_str(), json.as_slice())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>> {
        let name = name.to_string();
        self.blocking(move |db| {
            Self::find_by_name(db, PERMISSIONS, |p: &Permission| p.name == name)
        })
        .await
    }

    async fn grant_permission(&self, role_id: &str, permission_id: &str) -> StoreResult<()> {
        let role_id = role_id.to_string();
        let permission_id = permission_id.to_string();
        self.blocking(move |db| {
            let write_txn = db.begin_write()?;
            {
                if write_txn.open_table(ROLES)?.get(role_id.as_str())?.is_none() {
                    return Err(DbError::NotFound(format!("role {role_id}")));
                }
                if write_txn
                    .open_table(PERMISSIONS)?
                    .get(permission_id.as_str())?
                    .is_none()
                {
                    return Err(DbError::NotFound(format!("permission {permission_id}")));
                }
                let mut table = write_txn.open_table(ROLE_PERMISSIONS)?;
                let key = join_key(&role_id, &permission_id);
                table.insert(key.as_str(), permission_id.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn assign_role(&self, user_id: &str, role_id: &str) -> StoreResult<()> {
        let user_id = user_id.to_string();
        let role_id = role_id.to_string();
        self.blocking(move |db| {
            let write_txn = db.begin_write()?;
            {
                if write_txn.open_table(USERS)?.get(user_id.as_str())?.is_none() {
                    return Err(DbError::NotFound(format!("user {user_id}")));
                }
                if write_txn.open_table(ROLES)?.get(role_id.as_str())?.is_none() {
                    return Err(DbError::NotFound(format!("role {role_id}")));
                }
                let mut table = write_txn.open_table(USER_ROLES)?;
                let key = join_key(&user_id, &role_id);
                table.insert(key.as_str(), role_id.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }
}

// =============================================================================
// Tests
// =============================================================================
