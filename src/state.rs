// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthGateway;
use crate::config::{SecuritySettings, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::storage::{AuditLogReader, AuditSink, SecurityConfigStore};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<AuthGateway>,
    /// Persisted security tunables
    pub config_store: Arc<dyn SecurityConfigStore>,
    /// Audit writes made outside the gateway (config changes)
    pub audit: Arc<dyn AuditSink>,
    pub audit_log: Arc<dyn AuditLogReader>,
    /// Root of every request's cancellation scope; cancelled on shutdown
    pub shutdown: CancellationToken,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        gateway: Arc<AuthGateway>,
        config_store: Arc<dyn SecurityConfigStore>,
        audit: Arc<dyn AuditSink>,
        audit_log: Arc<dyn AuditLogReader>,
    ) -> Self {
        Self {
            gateway,
            config_store,
            audit,
            audit_log,
            shutdown: CancellationToken::new(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn settings(&self) -> &SecuritySettings {
        self.gateway.settings()
    }
}

#[cfg(test)]
impl AppState {
    /// State over an in-memory store holding user `alice` / `Secret123!`.
    pub(crate) async fn for_tests() -> (Self, Arc<crate::storage::InMemoryStore>) {
        tests_support::state().await
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::auth::gateway::{LoginOutcome, Stores};
    use crate::auth::password::{fast_params, PasswordVerifier};
    use crate::auth::{AuthSecrets, ClientContext, LoginAttempt};
    use crate::storage::{DeviceMetadata, DirectoryStore, InMemoryStore, User};

    pub const PEPPER: &str = "test-pepper";
    pub const PASSWORD: &str = "Secret123!";

    pub async fn state() -> (AppState, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let passwords = PasswordVerifier::with_params(PEPPER, fast_params()).unwrap();
        let user = User::new(
            "alice",
            "alice@example.com",
            passwords.hash(PASSWORD).unwrap(),
            chrono::Utc::now(),
        );
        store.create_user(&user).await.unwrap();

        let gateway = AuthGateway::new(
            Stores::shared(store.clone()),
            AuthSecrets {
                jwt_secret: b"test-secret-test-secret-test-secret!".to_vec(),
                pepper: PEPPER.to_string(),
            },
            SecuritySettings::default(),
        )
        .unwrap()
        .with_password_verifier(passwords);

        let state = AppState::new(
            Arc::new(gateway),
            store.clone(),
            store.clone(),
            store.clone(),
        );
        (state, store)
    }

    pub async fn login_alice(state: &AppState, device: &str) -> LoginOutcome {
        state
            .gateway
            .login(
                LoginAttempt {
                    username: "alice".to_string(),
                    password: PASSWORD.to_string(),
                    client: ClientContext {
                        device: device.into(),
                        ..ClientContext::default()
                    },
                    device_metadata: DeviceMetadata::default(),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap()
    }
}
