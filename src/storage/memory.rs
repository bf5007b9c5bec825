// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Process-local store implementing every storage port.
//!
//! All state sits behind one `RwLock`, so each trait call is atomic with
//! respect to the others. Nothing survives a restart.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    AuditFilter, AuditLogReader, AuditRecord, AuditSink, CredentialStore, DirectoryStore,
    Permission, Role, SecurityConfigStore, Session, SessionStore, StoreError, StoreResult, User,
};
use crate::auth::lockout::{LockoutPolicy, LockoutState};

#[derive(Default)]
struct Inner {
    users: HashMap<String, User>,
    usernames: HashMap<String, String>,
    roles: HashMap<String, Role>,
    permissions: HashMap<String, Permission>,
    user_roles: HashMap<String, BTreeSet<String>>,
    role_permissions: HashMap<String, BTreeSet<String>>,
    sessions: HashMap<String, Session>,
    audit: Vec<AuditRecord>,
    config: HashMap<String, String>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every audit record in insertion order.
    pub async fn audit_records(&self) -> Vec<AuditRecord> {
        self.inner.read().await.audit.clone()
    }
}

fn user_mut<'a>(inner: &'a mut Inner, user_id: &str) -> StoreResult<&'a mut User> {
    inner
        .users
        .get_mut(user_id)
        .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let username = User::normalize_username(username);
        let inner = self.inner.read().await;
        Ok(inner
            .usernames
            .get(&username)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn user_by_id(&self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(self.inner.read().await.users.get(user_id).cloned())
    }

    async fn record_failed_attempt(
        &self,
        user_id: &str,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<LockoutState> {
        let mut inner = self.inner.write().await;
        let user = user_mut(&mut inner, user_id)?;
        let state = policy.on_failure(user.failed_attempts, now);
        user.failed_attempts = state.failed_attempts;
        user.locked_until = state.locked_until;
        user.updated_at = now;
        Ok(state)
    }

    async fn reset_failed_attempts(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let user = user_mut(&mut inner, user_id)?;
        user.failed_attempts = 0;
        user.locked_until = None;
        user.updated_at = now;
        Ok(())
    }

    async fn update_mfa_secret(
        &self,
        user_id: &str,
        secret: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let user = user_mut(&mut inner, user_id)?;
        user.mfa_secret = secret.map(str::to_string);
        user.updated_at = now;
        Ok(())
    }

    async fn record_mfa_step(&self, user_id: &str, step: u64, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let user = user_mut(&mut inner, user_id)?;
        if !user.mfa_step_is_fresh(step) {
            return Ok(false);
        }
        user.mfa_last_step = Some(step);
        user.updated_at = now;
        Ok(true)
    }

    async fn permissions_for_user(&self, user_id: &str) -> StoreResult<Vec<Permission>> {
        let inner = self.inner.read().await;
        let Some(role_ids) = inner.user_roles.get(user_id) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for role_id in role_ids {
            let Some(permission_ids) = inner.role_permissions.get(role_id) else {
                continue;
            };
            out.extend(
                permission_ids
                    .iter()
                    .filter_map(|pid| inner.permissions.get(pid))
                    .cloned(),
            );
        }
        Ok(out)
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create_session(&self, session: &Session) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.sessions.contains_key(&session.token_jti) {
            return Err(StoreError::AlreadyExists(format!(
                "session {}",
                session.token_jti
            )));
        }
        inner
            .sessions
            .insert(session.token_jti.clone(), session.clone());
        Ok(())
    }

    async fn session_by_jti(&self, jti: &str) -> StoreResult<Option<Session>> {
        Ok(self.inner.read().await.sessions.get(jti).cloned())
    }

    async fn revoke_by_jti(&self, jti: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(match inner.sessions.get_mut(jti) {
            Some(session) if !session.revoked => {
                session.revoked = true;
                true
            }
            _ => false,
        })
    }

    async fn revoke_by_user(&self, user_id: &str) -> StoreResult<usize> {
        let mut inner = self.inner.write().await;
        let mut count = 0;
        for session in inner.sessions.values_mut() {
            if session.user_id == user_id && !session.revoked {
                session.revoked = true;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn rotate_refresh_hash(
        &self,
        jti: &str,
        expected_hash: &str,
        new_hash: &str,
        new_expires_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(jti) {
            Some(session) if !session.revoked && session.refresh_token_hash == expected_hash => {
                session.refresh_token_hash = new_hash.to_string();
                session.expires_at = new_expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl AuditSink for InMemoryStore {
    async fn record(&self, record: &AuditRecord) -> StoreResult<()> {
        self.inner.write().await.audit.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl AuditLogReader for InMemoryStore {
    async fn query(&self, filter: &AuditFilter) -> StoreResult<Vec<AuditRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .audit
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .take(filter.effective_limit())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SecurityConfigStore for InMemoryStore {
    async fn config_value(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.inner.read().await.config.get(key).cloned())
    }

    async fn set_config_value(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .config
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[async_trait]
impl DirectoryStore for InMemoryStore {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.usernames.contains_key(&user.username) {
            return Err(StoreError::AlreadyExists(format!("username {}", user.username)));
        }
        inner
            .usernames
            .insert(user.username.clone(), user.id.clone());
        inner.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .roles
            .insert(role.id.clone(), role.clone());
        Ok(())
    }

    async fn role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let inner = self.inner.read().await;
        Ok(inner.roles.values().find(|r| r.name == name).cloned())
    }

    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .permissions
            .insert(permission.id.clone(), permission.clone());
        Ok(())
    }

    async fn permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>> {
        let inner = self.inner.read().await;
        Ok(inner.permissions.values().find(|p| p.name == name).cloned())
    }

    async fn grant_permission(&self, role_id: &str, permission_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.roles.contains_key(role_id) {
            return Err(StoreError::NotFound(format!("role {role_id}")));
        }
        if !inner.permissions.contains_key(permission_id) {
            return Err(StoreError::NotFound(format!("permission {permission_id}")));
        }
        inner
            .role_permissions
            .entry(role_id.to_string())
            .or_default()
            .insert(permission_id.to_string());
        Ok(())
    }

    async fn assign_role(&self, user_id: &str, role_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(user_id) {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        if !inner.roles.contains_key(role_id) {
            return Err(StoreError::NotFound(format!("role {role_id}")));
        }
        inner
            .user_roles
            .entry(user_id.to_string())
            .or_default()
            .insert(role_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AuditEventType, DeviceMetadata, LocationData};
    use chrono::Duration;

    fn session(user_id: &str, jti: &str, now: DateTime<Utc>) -> Session {
        Session {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            token_jti: jti.to_string(),
            refresh_token_hash: "h0".to_string(),
            device_id: "dev".to_string(),
            location: LocationData::default(),
            user_agent: None,
            device_metadata: DeviceMetadata::default(),
            created_at: now,
            expires_at: now + Duration::days(7),
            revoked: false,
        }
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .create_user(&User::new("alice", "a@example.com", "h", now))
            .await
            .unwrap();
        let err = store
            .create_user(&User::new(" alice ", "b@example.com", "h", now))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn failed_attempts_accumulate_atomically() {
        let store = std::sync::Arc::new(InMemoryStore::new());
        let now = Utc::now();
        let user = User::new("bob", "b@example.com", "h", now);
        store.create_user(&user).await.unwrap();
        let policy = LockoutPolicy::new(50, Duration::minutes(1));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            let id = user.id.clone();
            handles.push(tokio::spawn(async move {
                store.record_failed_attempt(&id, &policy, now).await.unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let stored = store.user_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.failed_attempts, 20);
    }

    #[tokio::test]
    async fn mfa_steps_only_move_forward() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let user = User::new("carol", "c@example.com", "h", now);
        store.create_user(&user).await.unwrap();

        assert!(store.record_mfa_step(&user.id, 100, now).await.unwrap());
        assert!(!store.record_mfa_step(&user.id, 100, now).await.unwrap());
        assert!(!store.record_mfa_step(&user.id, 99, now).await.unwrap());
        assert!(store.record_mfa_step(&user.id, 101, now).await.unwrap());

        let stored = store.user_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.mfa_last_step, Some(101));
    }

    #[tokio::test]
    async fn revocation_is_idempotent() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.create_session(&session("u1", "j1", now)).await.unwrap();

        assert!(store.revoke_by_jti("j1").await.unwrap());
        assert!(!store.revoke_by_jti("j1").await.unwrap());
        assert!(!store.revoke_by_jti("missing").await.unwrap());
        assert!(store.session_by_jti("j1").await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn revoke_by_user_only_touches_that_user() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.create_session(&session("u1", "a", now)).await.unwrap();
        store.create_session(&session("u1", "b", now)).await.unwrap();
        store.create_session(&session("u2", "c", now)).await.unwrap();

        assert_eq!(store.revoke_by_user("u1").await.unwrap(), 2);
        assert!(!store.session_by_jti("c").await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn rotation_is_compare_and_swap() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.create_session(&session("u1", "j1", now)).await.unwrap();
        let later = now + Duration::days(8);

        assert!(!store.rotate_refresh_hash("j1", "wrong", "h1", later).await.unwrap());
        assert!(store.rotate_refresh_hash("j1", "h0", "h1", later).await.unwrap());
        assert!(!store.rotate_refresh_hash("j1", "h0", "h2", later).await.unwrap());

        let stored = store.session_by_jti("j1").await.unwrap().unwrap();
        assert_eq!(stored.refresh_token_hash, "h1");
        assert_eq!(stored.expires_at, later);
    }

    #[tokio::test]
    async fn permission_join_keeps_duplicates_across_roles() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let user = User::new("carol", "c@example.com", "h", now);
        store.create_user(&user).await.unwrap();

        let p1 = Permission::new("property", "read", now);
        store.insert_permission(&p1).await.unwrap();
        for name in ["viewer", "editor"] {
            let role = Role::new(name, "", now);
            store.insert_role(&role).await.unwrap();
            store.grant_permission(&role.id, &p1.id).await.unwrap();
            store.assign_role(&user.id, &role.id).await.unwrap();
        }

        let perms = store.permissions_for_user(&user.id).await.unwrap();
        assert_eq!(perms.len(), 2);
        assert!(store.permissions_for_user("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn audit_query_is_newest_first() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        for (i, t) in [AuditEventType::LoginFailure, AuditEventType::LoginSuccess]
            .into_iter()
            .enumerate()
        {
            store
                .record(&AuditRecord::new(t, "auth", "login", now + Duration::seconds(i as i64)))
                .await
                .unwrap();
        }

        let records = store.query(&AuditFilter::default()).await.unwrap();
        assert_eq!(records[0].event_type, AuditEventType::LoginSuccess);
        assert_eq!(records.len(), 2);
    }
}
