// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Role-based permission resolution.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::storage::{CredentialStore, Permission, StoreResult};

/// A user's effective permissions, unique by permission id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    by_id: BTreeMap<String, Permission>,
}

impl PermissionSet {
    pub fn contains(&self, name: &str) -> bool {
        self.by_id.values().any(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.by_id.values()
    }

    /// Sorted permission names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.iter().map(|p| p.name.clone()).collect();
        names.sort();
        names.dedup();
        names
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self {
            by_id: iter.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }
}

/// Maps a user to the permissions granted through their roles.
#[derive(Clone)]
pub struct PermissionResolver {
    credentials: Arc<dyn CredentialStore>,
}

impl PermissionResolver {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self { credentials }
    }

    /// No roles is an empty set. A store failure is returned, never an
    /// empty set, so callers can deny.
    pub async fn resolve(&self, user_id: &str) -> StoreResult<PermissionSet> {
        let raw = self.credentials.permissions_for_user(user_id).await?;
        Ok(raw.into_iter().collect())
    }
}
