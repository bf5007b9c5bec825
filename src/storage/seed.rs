// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bootstrap data: the `admin` role, its permissions and an optional admin
//! account. Safe to run on every startup.

use chrono::{DateTime, Utc};

use super::{DirectoryStore, Permission, Role, StoreError, StoreResult, User};
use crate::auth::password::PasswordVerifier;
use crate::config::SeedAdmin;

pub const ADMIN_ROLE: &str = "admin";

/// `(resource, action)` pairs granted to [`ADMIN_ROLE`].
pub const ADMIN_PERMISSIONS: [(&str, &str); 3] = [
    ("security_config", "read"),
    ("security_config", "update"),
    ("audit_logs", "read"),
];

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to hash seed password: {0}")]
    Password(String),
}

async fn ensure_permission(
    store: &dyn DirectoryStore,
    resource: &str,
    action: &str,
    now: DateTime<Utc>,
) -> StoreResult<Permission> {
    let name = format!("{resource}:{action}");
    if let Some(existing) = store.permission_by_name(&name).await? {
        return Ok(existing);
    }
    let permission = Permission::new(resource, action, now);
    store.insert_permission(&permission).await?;
    Ok(permission)
}

/// Create the admin role and grant it every admin permission.
pub async fn ensure_admin_role(store: &dyn DirectoryStore, now: DateTime<Utc>) -> StoreResult<Role> {
    let role = match store.role_by_name(ADMIN_ROLE).await? {
        Some(role) => role,
        None => {
            let role = Role::new(ADMIN_ROLE, "Security administration", now);
            store.insert_role(&role).await?;
            tracing::info!(role = ADMIN_ROLE, "Seeded role");
            role
        }
    };
    for (resource, action) in ADMIN_PERMISSIONS {
        let permission = ensure_permission(store, resource, action, now).await?;
        store.grant_permission(&role.id, &permission.id).await?;
    }
    Ok(role)
}

/// Create the admin account unless the username is taken, then make sure it
/// holds the admin role. Returns the new user's id when one was created.
pub async fn seed_admin(
    store: &dyn DirectoryStore,
    credentials: &dyn super::CredentialStore,
    passwords: &PasswordVerifier,
    admin: &SeedAdmin,
    now: DateTime<Utc>,
) -> Result<Option<String>, SeedError> {
    let role = ensure_admin_role(store, now).await?;

    if let Some(existing) = credentials.user_by_username(&admin.username).await? {
        store.assign_role(&existing.id, &role.id).await?;
        tracing::debug!(username = %existing.username, "Seed admin already present");
        return Ok(None);
    }

    let verifier = passwords.clone();
    let password = admin.password.clone();
    let hash = tokio::task::spawn_blocking(move || verifier.hash(&password))
        .await
        .map_err(|e| SeedError::Password(e.to_string()))?
        .map_err(|e| SeedError::Password(e.to_string()))?;

    let user = User::new(&admin.username, admin.email.clone(), hash, now);
    store.create_user(&user).await?;
    store.assign_role(&user.id, &role.id).await?;
    tracing::info!(user_id = %user.id, username = %user.username, "Seeded admin user");
    Ok(Some(user.id))
}
