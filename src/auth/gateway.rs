// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Auth Gateway
//!
//! Orchestrates login, MFA, refresh, logout and session validation over the
//! storage ports.
//!
//! ## Cancellation
//!
//! Every operation takes a [`CancellationToken`]. Reads, password work and
//! token parsing race against it and fail with [`AuthError::Cancelled`].
//! Writes that commit a security decision never do:
//!
//! - the session insert at the end of a login
//! - the failed-attempt update after a wrong password
//! - revocations (logout, device mismatch, refresh-token reuse)
//! - the refresh-hash rotation
//! - the MFA secret write during enrollment
//!
//! Once one of those has started, the operation runs to completion.
//!
//! ## Audit
//!
//! Audit writes are best effort. A failing sink is logged at `warn` and the
//! operation result is unchanged.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::claims::AuthenticatedRequest;
use super::clock::{Clock, SystemClock};
use super::device::{DeviceBindingGuard, DeviceFingerprint};
use super::error::AuthError;
use super::mfa::{MfaVerifier, TotpEnrollment, TotpMfaVerifier};
use super::password::PasswordVerifier;
use super::permissions::{PermissionResolver, PermissionSet};
use super::token::{TokenCodec, TokenType};
use crate::config::{SecuritySettings, DEFAULT_MFA_ISSUER};
use crate::storage::{
    AuditEventType, AuditRecord, AuditSink, CredentialStore, DeviceMetadata, LocationData,
    Session, SessionState, SessionStore, User,
};

const AUTH_RESOURCE: &str = "auth";
const SESSION_RESOURCE: &str = "session";

// =============================================================================
// Inputs and outputs
// =============================================================================

/// Store ports the gateway depends on.
#[derive(Clone)]
pub struct Stores {
    pub credentials: Arc<dyn CredentialStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl Stores {
    /// Use one backend for every port.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: CredentialStore + SessionStore + AuditSink + 'static,
    {
        Self {
            credentials: store.clone(),
            sessions: store.clone(),
            audit: store,
        }
    }
}

/// Secrets fixed for the lifetime of the process.
#[derive(Clone)]
pub struct AuthSecrets {
    pub jwt_secret: Vec<u8>,
    pub pepper: String,
}

impl std::fmt::Debug for AuthSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthSecrets { .. }")
    }
}

/// Where a request came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device: DeviceFingerprint,
}

/// One login attempt.
#[derive(Debug, Clone)]
pub struct LoginAttempt {
    pub username: String,
    pub password: String,
    pub client: ClientContext,
    pub device_metadata: DeviceMetadata,
}

/// Public view of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub access_token: String,
    pub refresh_token: String,
    pub jti: String,
    /// Access-token lifetime in seconds
    pub expires_in: i64,
    pub mfa_required: bool,
    pub user: UserSummary,
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub access_token: String,
    /// Replaces the presented refresh token, which is now spent
    pub refresh_token: String,
    pub jti: String,
    pub expires_in: i64,
}

// =============================================================================
// Gateway
// =============================================================================

pub struct AuthGateway {
    codec: TokenCodec,
    passwords: PasswordVerifier,
    credentials: Arc<dyn CredentialStore>,
    sessions: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditSink>,
    permissions: PermissionResolver,
    settings: SecuritySettings,
    clock: Arc<dyn Clock>,
    mfa: Arc<dyn MfaVerifier>,
    devices: DeviceBindingGuard,
    mfa_issuer: String,
}

/// Run `fut` unless `cancel` fires first.
async fn cancellable<T, E, F>(cancel: &CancellationToken, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, E>>,
    AuthError: From<E>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AuthError::Cancelled),
        result = fut => result.map_err(AuthError::from),
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), AuthError> {
    if cancel.is_cancelled() {
        Err(AuthError::Cancelled)
    } else {
        Ok(())
    }
}

fn hashes_match(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

impl AuthGateway {
    /// Build a gateway with production password parameters, the wall clock
    /// and TOTP verification.
    pub fn new(
        stores: Stores,
        secrets: AuthSecrets,
        settings: SecuritySettings,
    ) -> Result<Self, AuthError> {
        let codec = TokenCodec::new(&secrets.jwt_secret)?;
        let passwords = PasswordVerifier::new(&secrets.pepper)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        Ok(Self {
            codec,
            passwords,
            permissions: PermissionResolver::new(stores.credentials.clone()),
            credentials: stores.credentials,
            sessions: stores.sessions,
            audit: stores.audit,
            settings,
            clock: Arc::new(SystemClock),
            mfa: Arc::new(TotpMfaVerifier),
            devices: DeviceBindingGuard,
            mfa_issuer: DEFAULT_MFA_ISSUER.to_string(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_mfa_verifier(mut self, mfa: Arc<dyn MfaVerifier>) -> Self {
        self.mfa = mfa;
        self
    }

    /// Replace the password verifier. It must use the same pepper as the
    /// stored hashes.
    pub fn with_password_verifier(mut self, passwords: PasswordVerifier) -> Self {
        self.passwords = passwords;
        self
    }

    pub fn with_mfa_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.mfa_issuer = issuer.into();
        self
    }

    pub fn settings(&self) -> &SecuritySettings {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // -------------------------------------------------------------------------
    // Login
    // -------------------------------------------------------------------------

    pub async fn login(
        &self,
        attempt: LoginAttempt,
        cancel: &CancellationToken,
    ) -> Result<LoginOutcome, AuthError> {
        let config = self.settings.snapshot().await;
        let now = self.clock.now();
        let client = &attempt.client;

        let user = cancellable(cancel, self.credentials.user_by_username(&attempt.username)).await?;
        let Some(user) = user else {
            self.burn_password_work(&attempt.password, cancel).await?;
            tracing::info!(username = %attempt.username, "Login failed: unknown user");
            self.audit(
                AuditRecord::new(AuditEventType::LoginFailure, AUTH_RESOURCE, "login", now)
                    .with_new_values(json!({
                        "reason": "unknown_user",
                        "username": User::normalize_username(&attempt.username),
                    })),
                client,
            )
            .await;
            return Err(AuthError::InvalidCredentials);
        };

        if user.is_locked_at(now) {
            tracing::info!(user_id = %user.id, locked_until = ?user.locked_until, "Login refused: account locked");
            self.audit(
                AuditRecord::new(AuditEventType::LoginFailure, AUTH_RESOURCE, "login", now)
                    .with_user(&user.id)
                    .with_new_values(json!({
                        "reason": "account_locked",
                        "locked_until": user.locked_until,
                    })),
                client,
            )
            .await;
            return Err(AuthError::AccountLocked);
        }

        if !self
            .password_matches(&attempt.password, &user.password_hash, cancel)
            .await?
        {
            // Not raced: a caller must not dodge the counter by hanging up.
            let state = self
                .credentials
                .record_failed_attempt(&user.id, &config.lockout_policy(), now)
                .await?;
            if state.is_locked_at(now) {
                tracing::warn!(
                    user_id = %user.id,
                    failed_attempts = state.failed_attempts,
                    locked_until = ?state.locked_until,
                    "Account locked after repeated login failures"
                );
            } else {
                tracing::info!(user_id = %user.id, failed_attempts = state.failed_attempts, "Login failed: wrong password");
            }
            self.audit(
                AuditRecord::new(AuditEventType::LoginFailure, AUTH_RESOURCE, "login", now)
                    .with_user(&user.id)
                    .with_new_values(json!({
                        "reason": "invalid_password",
                        "failed_attempts": state.failed_attempts,
                        "locked": state.is_locked_at(now),
                    })),
                client,
            )
            .await;
            return Err(AuthError::InvalidCredentials);
        }

        // MFA users keep their counter until the second factor passes
        if !user.mfa_enabled() && (user.failed_attempts > 0 || user.locked_until.is_some()) {
            cancellable(cancel, self.credentials.reset_failed_attempts(&user.id, now)).await?;
        }

        let jti = uuid::Uuid::new_v4().to_string();
        let access_ttl = config.access_token_ttl();
        let refresh_ttl = config.refresh_token_ttl();
        let pair = self
            .codec
            .issue_pair(&user.id, &jti, access_ttl, refresh_ttl, now)?;
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            token_jti: jti.clone(),
            refresh_token_hash: self.codec.refresh_hash(&pair.refresh_token)?,
            device_id: client.device.as_str().to_string(),
            location: LocationData::from_ip(client.ip.clone()),
            user_agent: client.user_agent.clone(),
            device_metadata: attempt.device_metadata.clone(),
            created_at: now,
            expires_at: now + refresh_ttl,
            revoked: false,
        };

        ensure_live(cancel)?;
        self.sessions.create_session(&session).await?;

        let mfa_required = user.mfa_enabled();
        tracing::info!(user_id = %user.id, jti = %jti, device_id = %session.device_id, mfa_required, "Login succeeded");
        self.audit(
            AuditRecord::new(AuditEventType::LoginSuccess, AUTH_RESOURCE, "login", now)
                .with_user(&user.id)
                .with_new_values(json!({
                    "session_id": session.id,
                    "device_id": session.device_id,
                    "mfa_required": mfa_required,
                })),
            client,
        )
        .await;

        Ok(LoginOutcome {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            jti,
            expires_in: access_ttl.num_seconds(),
            mfa_required,
            user: UserSummary::from(&user),
        })
    }

    // -------------------------------------------------------------------------
    // MFA
    // -------------------------------------------------------------------------

    pub async fn verify_mfa(
        &self,
        user_id: &str,
        code: &str,
        client: &ClientContext,
        cancel: &CancellationToken,
    ) -> Result<(), AuthError> {
        let now = self.clock.now();
        let config = self.settings.snapshot().await;
        let user = cancellable(cancel, self.credentials.user_by_id(user_id)).await?;
        let Some((user, secret)) = user.as_ref().and_then(|u| {
            let secret = u.mfa_secret.as_deref().filter(|s| !s.is_empty())?;
            Some((u, secret))
        }) else {
            self.audit_mfa_failure(user_id, json!({ "reason": "mfa_not_configured" }), now, client)
                .await;
            return Err(AuthError::MfaInvalid);
        };

        if user.is_locked_at(now) {
            self.audit_mfa_failure(
                user_id,
                json!({ "reason": "account_locked", "locked_until": user.locked_until }),
                now,
                client,
            )
            .await;
            return Err(AuthError::AccountLocked);
        }

        // Not raced: hanging up must not skip replay or failure bookkeeping.
        let reason = match self.mfa.verify(secret, code, now) {
            Some(step) => {
                if self.credentials.record_mfa_step(user_id, step, now).await? {
                    None
                } else {
                    Some("code_reused")
                }
            }
            None => Some("invalid_code"),
        };

        let Some(reason) = reason else {
            if user.failed_attempts > 0 || user.locked_until.is_some() {
                self.credentials.reset_failed_attempts(user_id, now).await?;
            }
            tracing::info!(user_id = %user_id, "MFA verified");
            self.audit(
                AuditRecord::new(AuditEventType::MfaSuccess, AUTH_RESOURCE, "mfa_verify", now)
                    .with_user(user_id),
                client,
            )
            .await;
            return Ok(());
        };

        let state = self
            .credentials
            .record_failed_attempt(user_id, &config.lockout_policy(), now)
            .await?;
        if state.is_locked_at(now) {
            tracing::warn!(
                user_id = %user_id,
                failed_attempts = state.failed_attempts,
                locked_until = ?state.locked_until,
                "Account locked after repeated MFA failures"
            );
        }
        self.audit_mfa_failure(
            user_id,
            json!({
                "reason": reason,
                "failed_attempts": state.failed_attempts,
                "locked": state.is_locked_at(now),
            }),
            now,
            client,
        )
        .await;
        Err(AuthError::MfaInvalid)
    }

    async fn audit_mfa_failure(
        &self,
        user_id: &str,
        details: serde_json::Value,
        now: DateTime<Utc>,
        client: &ClientContext,
    ) {
        tracing::info!(user_id = %user_id, %details, "MFA verification failed");
        self.audit(
            AuditRecord::new(AuditEventType::MfaFailure, AUTH_RESOURCE, "mfa_verify", now)
                .with_user(user_id)
                .with_new_values(details),
            client,
        )
        .await;
    }

    /// Generate and store a new TOTP secret, replacing any previous one.
    pub async fn enroll_mfa(
        &self,
        user_id: &str,
        client: &ClientContext,
        cancel: &CancellationToken,
    ) -> Result<TotpEnrollment, AuthError> {
        let now = self.clock.now();
        let user = cancellable(cancel, self.credentials.user_by_id(user_id))
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let enrollment = TotpEnrollment::generate(&self.mfa_issuer, &user.username)
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        ensure_live(cancel)?;
        self.credentials
            .update_mfa_secret(&user.id, Some(&enrollment.secret_base32), now)
            .await?;

        tracing::info!(user_id = %user.id, replaced = user.mfa_enabled(), "MFA enrolled");
        self.audit(
            AuditRecord::new(AuditEventType::MfaEnrolled, AUTH_RESOURCE, "mfa_enroll", now)
                .with_user(&user.id)
                .with_old_values(json!({ "mfa_enabled": user.mfa_enabled() }))
                .with_new_values(json!({ "mfa_enabled": true })),
            client,
        )
        .await;
        Ok(enrollment)
    }

    // -------------------------------------------------------------------------
    // Refresh
    // -------------------------------------------------------------------------

    /// Exchange a refresh token for a new access token and a rotated refresh
    /// token. Both keep the session's `jti`.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        client: &ClientContext,
        cancel: &CancellationToken,
    ) -> Result<RefreshOutcome, AuthError> {
        ensure_live(cancel)?;
        let config = self.settings.snapshot().await;
        let now = self.clock.now();
        let claims = self.codec.parse(refresh_token, TokenType::Refresh, now)?;

        let session = cancellable(cancel, self.sessions.session_by_jti(&claims.jti))
            .await?
            .ok_or(AuthError::SessionRevoked)?;
        if session.user_id != claims.sub {
            return Err(AuthError::InvalidToken);
        }
        match session.state_at(now) {
            SessionState::Revoked => return Err(AuthError::SessionRevoked),
            SessionState::Expired => return Err(AuthError::TokenExpired),
            SessionState::Active => {}
        }

        if !self.devices.matches(&session.device_id, client.device.as_str()) {
            self.revoke_for_device_mismatch(&session, client, "refresh", now).await?;
            return Err(AuthError::DeviceMismatch);
        }
        self.note_location_change(&session, client);

        let presented_hash = self.codec.refresh_hash(refresh_token)?;
        if !hashes_match(&presented_hash, &session.refresh_token_hash) {
            self.revoke_for_reuse(&session, client, now).await?;
            return Err(AuthError::SessionRevoked);
        }

        let access_ttl = config.access_token_ttl();
        let refresh_ttl = config.refresh_token_ttl();
        let pair = self
            .codec
            .issue_pair(&session.user_id, &session.token_jti, access_ttl, refresh_ttl, now)?;
        let new_hash = self.codec.refresh_hash(&pair.refresh_token)?;

        ensure_live(cancel)?;
        let rotated = self
            .sessions
            .rotate_refresh_hash(&session.token_jti, &session.refresh_token_hash, &new_hash, now + refresh_ttl)
            .await?;
        if !rotated {
            // Another refresh with the same token won the swap.
            self.revoke_for_reuse(&session, client, now).await?;
            return Err(AuthError::SessionRevoked);
        }

        tracing::debug!(user_id = %session.user_id, jti = %session.token_jti, "Token refreshed");
        self.audit(
            AuditRecord::new(AuditEventType::TokenRefresh, SESSION_RESOURCE, "refresh", now)
                .with_user(&session.user_id)
                .with_new_values(json!({ "session_id": session.id })),
            client,
        )
        .await;

        Ok(RefreshOutcome {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            jti: session.token_jti,
            expires_in: access_ttl.num_seconds(),
        })
    }

    // -------------------------------------------------------------------------
    // Logout
    // -------------------------------------------------------------------------

    /// Revoke one session. Logging out twice is not an error.
    pub async fn logout(
        &self,
        jti: &str,
        client: &ClientContext,
        cancel: &CancellationToken,
    ) -> Result<(), AuthError> {
        let now = self.clock.now();
        let session = cancellable(cancel, self.sessions.session_by_jti(jti)).await?;
        let revoked = self.sessions.revoke_by_jti(jti).await?;

        let mut record = AuditRecord::new(AuditEventType::Logout, SESSION_RESOURCE, "logout", now)
            .with_new_values(json!({ "jti": jti, "revoked": revoked }));
        if let Some(session) = &session {
            record = record.with_user(&session.user_id);
        }
        tracing::info!(jti = %jti, revoked, "Logout");
        self.audit(record, client).await;
        Ok(())
    }

    /// Revoke every live session of a user. Returns how many were revoked.
    pub async fn logout_all(
        &self,
        user_id: &str,
        client: &ClientContext,
        cancel: &CancellationToken,
    ) -> Result<usize, AuthError> {
        ensure_live(cancel)?;
        let now = self.clock.now();
        let count = self.sessions.revoke_by_user(user_id).await?;

        tracing::info!(user_id = %user_id, sessions = count, "Logged out everywhere");
        self.audit(
            AuditRecord::new(AuditEventType::LogoutAll, SESSION_RESOURCE, "logout_all", now)
                .with_user(user_id)
                .with_new_values(json!({ "sessions_revoked": count })),
            client,
        )
        .await;
        Ok(count)
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    /// Load a session that is still honored.
    pub async fn validate_session(
        &self,
        jti: &str,
        cancel: &CancellationToken,
    ) -> Result<Session, AuthError> {
        let now = self.clock.now();
        let session = cancellable(cancel, self.sessions.session_by_jti(jti))
            .await?
            .ok_or(AuthError::SessionRevoked)?;
        match session.state_at(now) {
            SessionState::Active => Ok(session),
            SessionState::Revoked => Err(AuthError::SessionRevoked),
            SessionState::Expired => Err(AuthError::TokenExpired),
        }
    }

    pub async fn get_user_permissions(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PermissionSet, AuthError> {
        cancellable(cancel, self.permissions.resolve(user_id)).await
    }

    /// Full check of a bearer access token: signature, expiry, session state
    /// and device binding. A device mismatch revokes the session.
    pub async fn authorize_request(
        &self,
        access_token: &str,
        client: &ClientContext,
        cancel: &CancellationToken,
    ) -> Result<AuthenticatedRequest, AuthError> {
        ensure_live(cancel)?;
        let now = self.clock.now();
        let claims = self.codec.parse(access_token, TokenType::Access, now)?;
        let session = self.validate_session(&claims.jti, cancel).await?;
        if session.user_id != claims.sub {
            return Err(AuthError::InvalidToken);
        }

        if !self.devices.matches(&session.device_id, client.device.as_str()) {
            self.revoke_for_device_mismatch(&session, client, "request", now).await?;
            return Err(AuthError::DeviceMismatch);
        }
        self.note_location_change(&session, client);

        Ok(AuthenticatedRequest {
            user_id: session.user_id,
            jti: session.token_jti,
            session_id: session.id,
            device_id: session.device_id,
        })
    }

    /// Require `permission` (`resource:action`). Denials are audited.
    pub async fn require_permission(
        &self,
        user_id: &str,
        permission: &str,
        client: &ClientContext,
        cancel: &CancellationToken,
    ) -> Result<(), AuthError> {
        let granted = self.get_user_permissions(user_id, cancel).await?;
        if granted.contains(permission) {
            return Ok(());
        }

        let now = self.clock.now();
        let (resource, action) = permission.split_once(':').unwrap_or((permission, ""));
        tracing::info!(user_id = %user_id, permission, "Permission denied");
        self.audit(
            AuditRecord::new(AuditEventType::PermissionDenied, resource, action, now)
                .with_user(user_id)
                .with_new_values(json!({ "required": permission })),
            client,
        )
        .await;
        Err(AuthError::InsufficientPermissions)
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    async fn password_matches(
        &self,
        password: &str,
        hash: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, AuthError> {
        let verifier = self.passwords.clone();
        let password = password.to_string();
        let hash = hash.to_string();
        let task = tokio::task::spawn_blocking(move || verifier.verify(&password, &hash));
        cancellable(cancel, async {
            task.await.map_err(|e| AuthError::Internal(e.to_string()))
        })
        .await
    }

    /// Equalize timing for unknown usernames.
    async fn burn_password_work(
        &self,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<(), AuthError> {
        let verifier = self.passwords.clone();
        let password = password.to_string();
        let task = tokio::task::spawn_blocking(move || verifier.verify_dummy(&password));
        cancellable(cancel, async {
            task.await.map_err(|e| AuthError::Internal(e.to_string()))
        })
        .await
    }

    async fn revoke_for_device_mismatch(
        &self,
        session: &Session,
        client: &ClientContext,
        during: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        self.sessions.revoke_by_jti(&session.token_jti).await?;
        tracing::warn!(
            user_id = %session.user_id,
            jti = %session.token_jti,
            recorded_device = %session.device_id,
            presented_device = %client.device,
            during,
            "Device mismatch, session revoked"
        );
        self.audit(
            AuditRecord::new(AuditEventType::SessionHijackAttempt, SESSION_RESOURCE, during, now)
                .with_user(&session.user_id)
                .with_new_values(json!({
                    "session_id": session.id,
                    "expected_device": session.device_id,
                    "presented_device": client.device.as_str(),
                })),
            client,
        )
        .await;
        Ok(())
    }

    async fn revoke_for_reuse(
        &self,
        session: &Session,
        client: &ClientContext,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        self.sessions.revoke_by_jti(&session.token_jti).await?;
        tracing::warn!(
            user_id = %session.user_id,
            jti = %session.token_jti,
            "Spent refresh token presented, session revoked"
        );
        self.audit(
            AuditRecord::new(AuditEventType::RefreshTokenReuse, SESSION_RESOURCE, "refresh", now)
                .with_user(&session.user_id)
                .with_new_values(json!({ "session_id": session.id })),
            client,
        )
        .await;
        Ok(())
    }

    /// Impossible-travel hint. Logged only, never blocks.
    fn note_location_change(&self, session: &Session, client: &ClientContext) {
        if let (Some(recorded), Some(current)) = (session.location.ip.as_deref(), client.ip.as_deref()) {
            if recorded != current {
                tracing::warn!(
                    user_id = %session.user_id,
                    jti = %session.token_jti,
                    recorded_ip = recorded,
                    current_ip = current,
                    "Request IP differs from session origin"
                );
            }
        }
    }

    async fn audit(&self, record: AuditRecord, client: &ClientContext) {
        let record = record
            .with_ip(client.ip.clone())
            .with_user_agent(client.user_agent.clone());
        if let Err(e) = self.audit.record(&record).await {
            tracing::warn!(
                event_type = %record.event_type,
                user_id = ?record.user_id,
                error = %e,
                "Failed to write audit record"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::mfa::StaticCodeMfaVerifier;
    use crate::auth::password::fast_params;
    use crate::config::SecurityConfig;
    use crate::storage::{
        DirectoryStore, InMemoryStore, Permission, Role, StoreError, StoreResult,
    };
    use crate::auth::lockout::{LockoutPolicy, LockoutState};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
    const PEPPER: &str = "pep";
    const PASSWORD: &str = "Secret123!";

    struct Harness {
        gateway: Arc<AuthGateway>,
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
        user: User,
    }

    fn secrets() -> AuthSecrets {
        AuthSecrets {
            jwt_secret: SECRET.to_vec(),
            pepper: PEPPER.to_string(),
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn client(device: &str) -> ClientContext {
        ClientContext {
            ip: Some("203.0.113.7".to_string()),
            user_agent: Some("test-agent".to_string()),
            device: DeviceFingerprint::from(device),
        }
    }

    fn attempt(username: &str, password: &str, device: &str) -> LoginAttempt {
        LoginAttempt {
            username: username.to_string(),
            password: password.to_string(),
            client: client(device),
            device_metadata: DeviceMetadata::default(),
        }
    }

    fn build(stores: Stores, settings: SecuritySettings, clock: Arc<ManualClock>) -> AuthGateway {
        AuthGateway::new(stores, secrets(), settings)
            .unwrap()
            .with_clock(clock)
            .with_password_verifier(PasswordVerifier::with_params(PEPPER, fast_params()).unwrap())
    }

    async fn harness_with(settings: SecuritySettings) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let passwords = PasswordVerifier::with_params(PEPPER, fast_params()).unwrap();
        let user = User::new("alice", "alice@example.com", passwords.hash(PASSWORD).unwrap(), start());
        store.create_user(&user).await.unwrap();

        let gateway = build(Stores::shared(store.clone()), settings, clock.clone());
        Harness {
            gateway: Arc::new(gateway),
            store,
            clock,
            user,
        }
    }

    async fn harness() -> Harness {
        harness_with(SecuritySettings::default()).await
    }

    async fn events(store: &InMemoryStore, event_type: AuditEventType) -> Vec<AuditRecord> {
        store
            .audit_records()
            .await
            .into_iter()
            .filter(|r| r.event_type == event_type)
            .collect()
    }

    fn live() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn login_creates_a_device_bound_session() {
        let h = harness().await;
        let out = h
            .gateway
            .login(attempt("alice", PASSWORD, "laptop-1"), &live())
            .await
            .unwrap();

        assert!(!out.mfa_required);
        assert_eq!(out.expires_in, 15 * 60);
        assert_eq!(out.user.username, "alice");

        let session = h.gateway.validate_session(&out.jti, &live()).await.unwrap();
        assert_eq!(session.user_id, h.user.id);
        assert_eq!(session.device_id, "laptop-1");
        assert_eq!(session.location.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(session.expires_at, start() + Duration::days(7));
        assert_ne!(session.refresh_token_hash, out.refresh_token);

        let success = events(&h.store, AuditEventType::LoginSuccess).await;
        assert_eq!(success.len(), 1);
        assert_eq!(success[0].user_id.as_deref(), Some(h.user.id.as_str()));
        assert_eq!(success[0].new_values.as_ref().unwrap()["mfa_required"], false);
    }

    #[tokio::test]
    async fn username_lookup_is_normalized() {
        let h = harness().await;
        assert!(h
            .gateway
            .login(attempt("  alice ", PASSWORD, "d"), &live())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_look_the_same() {
        let h = harness().await;
        let unknown = h
            .gateway
            .login(attempt("mallory", PASSWORD, "d"), &live())
            .await
            .unwrap_err();
        let wrong = h
            .gateway
            .login(attempt("alice", "nope", "d"), &live())
            .await
            .unwrap_err();
        assert_eq!(unknown.error_code(), wrong.error_code());
        assert_eq!(unknown.public_message(), wrong.public_message());

        let failures = events(&h.store, AuditEventType::LoginFailure).await;
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].user_id, None);
        assert_eq!(failures[0].new_values.as_ref().unwrap()["reason"], "unknown_user");
        assert_eq!(failures[1].new_values.as_ref().unwrap()["reason"], "invalid_password");
    }

    #[tokio::test]
    async fn fifth_failure_locks_and_sixth_attempt_is_refused() {
        let h = harness().await;
        for expected in 1..=4u32 {
            let err = h
                .gateway
                .login(attempt("alice", "wrong", "d"), &live())
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
            let user = h.store.user_by_id(&h.user.id).await.unwrap().unwrap();
            assert_eq!(user.failed_attempts, expected);
            assert!(user.locked_until.is_none());
        }

        let err = h
            .gateway
            .login(attempt("alice", "wrong", "d"), &live())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        let user = h.store.user_by_id(&h.user.id).await.unwrap().unwrap();
        assert_eq!(user.failed_attempts, 5);
        assert_eq!(user.locked_until, Some(start() + Duration::minutes(15)));

        // Even the right password is refused while locked
        let err = h
            .gateway
            .login(attempt("alice", PASSWORD, "d"), &live())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountLocked));
        let locked = events(&h.store, AuditEventType::LoginFailure).await;
        assert_eq!(locked.last().unwrap().new_values.as_ref().unwrap()["reason"], "account_locked");
    }

    #[tokio::test]
    async fn lock_lifts_after_the_duration_and_success_resets() {
        let h = harness().await;
        for _ in 0..5 {
            let _ = h.gateway.login(attempt("alice", "wrong", "d"), &live()).await;
        }
        h.clock.advance(Duration::minutes(15) + Duration::seconds(1));

        h.gateway
            .login(attempt("alice", PASSWORD, "d"), &live())
            .await
            .unwrap();
        let user = h.store.user_by_id(&h.user.id).await.unwrap().unwrap();
        assert_eq!(user.failed_attempts, 0);
        assert!(user.locked_until.is_none());
    }

    #[tokio::test]
    async fn concurrent_failures_are_all_counted() {
        let config = SecurityConfig {
            max_failed_attempts: 20,
            ..SecurityConfig::default()
        };
        let h = harness_with(SecuritySettings::new(config)).await;

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let gateway = h.gateway.clone();
                tokio::spawn(async move {
                    gateway
                        .login(attempt("alice", "wrong", "d"), &CancellationToken::new())
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_err());
        }

        let user = h.store.user_by_id(&h.user.id).await.unwrap().unwrap();
        assert_eq!(user.failed_attempts, 10);
    }

    #[tokio::test]
    async fn logout_revokes_and_is_idempotent() {
        let h = harness().await;
        let out = h
            .gateway
            .login(attempt("alice", PASSWORD, "d"), &live())
            .await
            .unwrap();

        h.gateway.logout(&out.jti, &client("d"), &live()).await.unwrap();
        assert!(matches!(
            h.gateway.validate_session(&out.jti, &live()).await,
            Err(AuthError::SessionRevoked)
        ));
        assert!(matches!(
            h.gateway.authorize_request(&out.access_token, &client("d"), &live()).await,
            Err(AuthError::SessionRevoked)
        ));

        h.gateway.logout(&out.jti, &client("d"), &live()).await.unwrap();
        let logouts = events(&h.store, AuditEventType::Logout).await;
        assert_eq!(logouts.len(), 2);
        assert_eq!(logouts[0].new_values.as_ref().unwrap()["revoked"], true);
        assert_eq!(logouts[1].new_values.as_ref().unwrap()["revoked"], false);
    }

    #[tokio::test]
    async fn logout_all_revokes_every_session() {
        let h = harness().await;
        let a = h.gateway.login(attempt("alice", PASSWORD, "a"), &live()).await.unwrap();
        let b = h.gateway.login(attempt("alice", PASSWORD, "b"), &live()).await.unwrap();

        let count = h.gateway.logout_all(&h.user.id, &client("a"), &live()).await.unwrap();
        assert_eq!(count, 2);
        for jti in [a.jti, b.jti] {
            assert!(matches!(
                h.gateway.validate_session(&jti, &live()).await,
                Err(AuthError::SessionRevoked)
            ));
        }
        assert_eq!(events(&h.store, AuditEventType::LogoutAll).await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_session_is_revoked_and_old_one_is_expired() {
        let h = harness().await;
        assert!(matches!(
            h.gateway.validate_session("no-such-jti", &live()).await,
            Err(AuthError::SessionRevoked)
        ));

        let out = h.gateway.login(attempt("alice", PASSWORD, "d"), &live()).await.unwrap();
        h.clock.advance(Duration::days(7));
        assert!(matches!(
            h.gateway.validate_session(&out.jti, &live()).await,
            Err(AuthError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn refresh_keeps_jti_and_extends_expiry() {
        let h = harness().await;
        let out = h.gateway.login(attempt("alice", PASSWORD, "d"), &live()).await.unwrap();
        h.clock.advance(Duration::minutes(20));

        // The access token has expired by now
        assert!(matches!(
            h.gateway.authorize_request(&out.access_token, &client("d"), &live()).await,
            Err(AuthError::TokenExpired)
        ));

        let refreshed = h
            .gateway
            .refresh_token(&out.refresh_token, &client("d"), &live())
            .await
            .unwrap();
        assert_eq!(refreshed.jti, out.jti);
        assert_ne!(refreshed.access_token, out.access_token);
        assert_ne!(refreshed.refresh_token, out.refresh_token);

        let codec = TokenCodec::new(SECRET).unwrap();
        let now = h.clock.now();
        let claims = codec.parse(&refreshed.access_token, TokenType::Access, now).unwrap();
        assert_eq!(claims.jti, out.jti);
        assert_eq!(claims.exp, (now + Duration::minutes(15)).timestamp());

        let session = h.gateway.validate_session(&out.jti, &live()).await.unwrap();
        assert_eq!(session.expires_at, now + Duration::days(7));

        let request = h
            .gateway
            .authorize_request(&refreshed.access_token, &client("d"), &live())
            .await
            .unwrap();
        assert_eq!(request.user_id, h.user.id);
        assert_eq!(events(&h.store, AuditEventType::TokenRefresh).await.len(), 1);
    }

    #[tokio::test]
    async fn spent_refresh_token_revokes_the_session() {
        let h = harness().await;
        let out = h.gateway.login(attempt("alice", PASSWORD, "d"), &live()).await.unwrap();
        h.clock.advance(Duration::seconds(1));

        let first = h
            .gateway
            .refresh_token(&out.refresh_token, &client("d"), &live())
            .await
            .unwrap();
        let replay = h
            .gateway
            .refresh_token(&out.refresh_token, &client("d"), &live())
            .await;
        assert!(matches!(replay, Err(AuthError::SessionRevoked)));

        // The legitimate holder is logged out too
        assert!(matches!(
            h.gateway.refresh_token(&first.refresh_token, &client("d"), &live()).await,
            Err(AuthError::SessionRevoked)
        ));
        assert_eq!(events(&h.store, AuditEventType::RefreshTokenReuse).await.len(), 1);
    }

    #[tokio::test]
    async fn replay_within_the_issuing_second_revokes() {
        let h = harness().await;
        let out = h.gateway.login(attempt("alice", PASSWORD, "d"), &live()).await.unwrap();

        let first = h
            .gateway
            .refresh_token(&out.refresh_token, &client("d"), &live())
            .await
            .unwrap();
        assert_ne!(first.refresh_token, out.refresh_token);

        let replay = h
            .gateway
            .refresh_token(&out.refresh_token, &client("d"), &live())
            .await;
        assert!(matches!(replay, Err(AuthError::SessionRevoked)));
        assert_eq!(events(&h.store, AuditEventType::RefreshTokenReuse).await.len(), 1);
        assert!(matches!(
            h.gateway.validate_session(&out.jti, &live()).await,
            Err(AuthError::SessionRevoked)
        ));
    }

    #[tokio::test]
    async fn refresh_from_another_device_revokes() {
        let h = harness().await;
        let out = h.gateway.login(attempt("alice", PASSWORD, "phone"), &live()).await.unwrap();

        let err = h
            .gateway
            .refresh_token(&out.refresh_token, &client("attacker"), &live())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DeviceMismatch));
        assert!(matches!(
            h.gateway.validate_session(&out.jti, &live()).await,
            Err(AuthError::SessionRevoked)
        ));

        let hijack = events(&h.store, AuditEventType::SessionHijackAttempt).await;
        assert_eq!(hijack.len(), 1);
        assert_eq!(hijack[0].new_values.as_ref().unwrap()["presented_device"], "attacker");
    }

    #[tokio::test]
    async fn access_token_from_another_device_revokes() {
        let h = harness().await;
        let out = h.gateway.login(attempt("alice", PASSWORD, "phone"), &live()).await.unwrap();

        assert!(matches!(
            h.gateway.authorize_request(&out.access_token, &ClientContext::default(), &live()).await,
            Err(AuthError::DeviceMismatch)
        ));
        assert!(matches!(
            h.gateway.authorize_request(&out.access_token, &client("phone"), &live()).await,
            Err(AuthError::SessionRevoked)
        ));
    }

    #[tokio::test]
    async fn token_types_are_not_interchangeable() {
        let h = harness().await;
        let out = h.gateway.login(attempt("alice", PASSWORD, "d"), &live()).await.unwrap();

        assert!(matches!(
            h.gateway.refresh_token(&out.access_token, &client("d"), &live()).await,
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            h.gateway.authorize_request(&out.refresh_token, &client("d"), &live()).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn mfa_without_a_secret_is_rejected() {
        let h = harness().await;
        let err = h
            .gateway
            .verify_mfa(&h.user.id, "123456", &client("d"), &live())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MfaInvalid));
        let failures = events(&h.store, AuditEventType::MfaFailure).await;
        assert_eq!(failures[0].new_values.as_ref().unwrap()["reason"], "mfa_not_configured");
    }

    #[tokio::test]
    async fn enrolled_user_must_pass_mfa() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let passwords = PasswordVerifier::with_params(PEPPER, fast_params()).unwrap();
        let user = User::new("bob", "bob@example.com", passwords.hash(PASSWORD).unwrap(), start());
        store.create_user(&user).await.unwrap();
        let gateway = build(Stores::shared(store.clone()), SecuritySettings::default(), clock)
            .with_mfa_verifier(Arc::new(StaticCodeMfaVerifier::new("424242")))
            .with_mfa_issuer("estate-test");

        let enrollment = gateway.enroll_mfa(&user.id, &client("d"), &live()).await.unwrap();
        assert!(enrollment.otpauth_url.starts_with("otpauth://totp/"));
        assert!(enrollment.otpauth_url.contains("estate-test"));
        let stored = store.user_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.mfa_secret.as_deref(), Some(enrollment.secret_base32.as_str()));

        let out = gateway.login(attempt("bob", PASSWORD, "d"), &live()).await.unwrap();
        assert!(out.mfa_required);

        assert!(matches!(
            gateway.verify_mfa(&user.id, "000000", &client("d"), &live()).await,
            Err(AuthError::MfaInvalid)
        ));
        gateway
            .verify_mfa(&user.id, "424242", &client("d"), &live())
            .await
            .unwrap();

        assert_eq!(events(&store, AuditEventType::MfaEnrolled).await.len(), 1);
        assert_eq!(events(&store, AuditEventType::MfaSuccess).await.len(), 1);
        assert_eq!(events(&store, AuditEventType::MfaFailure).await.len(), 1);
    }

    async fn enrolled_harness() -> Harness {
        let h = harness().await;
        let gateway = build(Stores::shared(h.store.clone()), SecuritySettings::default(), h.clock.clone())
            .with_mfa_verifier(Arc::new(StaticCodeMfaVerifier::new("424242")));
        gateway.enroll_mfa(&h.user.id, &client("d"), &live()).await.unwrap();
        Harness {
            gateway: Arc::new(gateway),
            ..h
        }
    }

    #[tokio::test]
    async fn accepted_code_cannot_be_used_twice() {
        let h = enrolled_harness().await;
        h.gateway
            .verify_mfa(&h.user.id, "424242", &client("d"), &live())
            .await
            .unwrap();

        let err = h
            .gateway
            .verify_mfa(&h.user.id, "424242", &client("d"), &live())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MfaInvalid));
        let failures = events(&h.store, AuditEventType::MfaFailure).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].new_values.as_ref().unwrap()["reason"], "code_reused");
        assert_eq!(failures[0].new_values.as_ref().unwrap()["failed_attempts"], 1);

        // The next time step brings a fresh code
        h.clock.advance(Duration::seconds(30));
        h.gateway
            .verify_mfa(&h.user.id, "424242", &client("d"), &live())
            .await
            .unwrap();
        let user = h.store.user_by_id(&h.user.id).await.unwrap().unwrap();
        assert_eq!(user.failed_attempts, 0);
    }

    #[tokio::test]
    async fn repeated_mfa_failures_lock_the_account() {
        let h = enrolled_harness().await;
        for _ in 0..5 {
            let err = h
                .gateway
                .verify_mfa(&h.user.id, "000000", &client("d"), &live())
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::MfaInvalid));
        }
        let user = h.store.user_by_id(&h.user.id).await.unwrap().unwrap();
        assert_eq!(user.failed_attempts, 5);
        assert_eq!(user.locked_until, Some(start() + Duration::minutes(15)));

        let err = h
            .gateway
            .verify_mfa(&h.user.id, "424242", &client("d"), &live())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountLocked));
        let err = h
            .gateway
            .login(attempt("alice", PASSWORD, "d"), &live())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountLocked));
        let failures = events(&h.store, AuditEventType::MfaFailure).await;
        assert_eq!(failures.last().unwrap().new_values.as_ref().unwrap()["reason"], "account_locked");
    }

    #[tokio::test]
    async fn password_login_does_not_clear_mfa_failures() {
        let h = enrolled_harness().await;
        for _ in 0..3 {
            let _ = h
                .gateway
                .verify_mfa(&h.user.id, "000000", &client("d"), &live())
                .await;
        }
        h.gateway
            .login(attempt("alice", PASSWORD, "d"), &live())
            .await
            .unwrap();
        let user = h.store.user_by_id(&h.user.id).await.unwrap().unwrap();
        assert_eq!(user.failed_attempts, 3);

        h.gateway
            .verify_mfa(&h.user.id, "424242", &client("d"), &live())
            .await
            .unwrap();
        let user = h.store.user_by_id(&h.user.id).await.unwrap().unwrap();
        assert_eq!(user.failed_attempts, 0);
    }

    #[tokio::test]
    async fn permissions_are_resolved_and_denials_audited() {
        let h = harness().await;
        let now = start();
        let read = Permission::new("property", "read", now);
        h.store.insert_permission(&read).await.unwrap();
        let a = Role::new("agent", "", now);
        let b = Role::new("viewer", "", now);
        h.store.insert_role(&a).await.unwrap();
        h.store.insert_role(&b).await.unwrap();
        h.store.grant_permission(&a.id, &read.id).await.unwrap();
        h.store.grant_permission(&b.id, &read.id).await.unwrap();
        h.store.assign_role(&h.user.id, &a.id).await.unwrap();
        h.store.assign_role(&h.user.id, &b.id).await.unwrap();

        let set = h.gateway.get_user_permissions(&h.user.id, &live()).await.unwrap();
        assert_eq!(set.len(), 1);

        h.gateway
            .require_permission(&h.user.id, "property:read", &client("d"), &live())
            .await
            .unwrap();
        let err = h
            .gateway
            .require_permission(&h.user.id, "property:delete", &client("d"), &live())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InsufficientPermissions));

        let denied = events(&h.store, AuditEventType::PermissionDenied).await;
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].resource, "property");
        assert_eq!(denied[0].action, "delete");
    }

    #[tokio::test]
    async fn cancelled_login_writes_nothing() {
        let h = harness().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = h
            .gateway
            .login(attempt("alice", PASSWORD, "d"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Cancelled));
        assert!(h.store.audit_records().await.is_empty());
        assert!(h.store.revoke_by_user(&h.user.id).await.unwrap() == 0);
    }

    // -------------------------------------------------------------------------
    // Failing doubles
    // -------------------------------------------------------------------------

    struct BrokenAudit;

    #[async_trait]
    impl AuditSink for BrokenAudit {
        async fn record(&self, _record: &AuditRecord) -> StoreResult<()> {
            Err(StoreError::Unavailable("audit table offline".to_string()))
        }
    }

    struct BrokenCredentials;

    #[async_trait]
    impl CredentialStore for BrokenCredentials {
        async fn user_by_username(&self, _username: &str) -> StoreResult<Option<User>> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn user_by_id(&self, _user_id: &str) -> StoreResult<Option<User>> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn record_failed_attempt(
            &self,
            _user_id: &str,
            _policy: &LockoutPolicy,
            _now: DateTime<Utc>,
        ) -> StoreResult<LockoutState> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn reset_failed_attempts(&self, _user_id: &str, _now: DateTime<Utc>) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn update_mfa_secret(
            &self,
            _user_id: &str,
            _secret: Option<&str>,
            _now: DateTime<Utc>,
        ) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn record_mfa_step(&self, _user_id: &str, _step: u64, _now: DateTime<Utc>) -> StoreResult<bool> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn permissions_for_user(&self, _user_id: &str) -> StoreResult<Vec<Permission>> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn failing_audit_sink_does_not_fail_login() {
        let h = harness().await;
        let stores = Stores {
            credentials: h.store.clone(),
            sessions: h.store.clone(),
            audit: Arc::new(BrokenAudit),
        };
        let gateway = build(stores, SecuritySettings::default(), h.clock.clone());

        let out = gateway.login(attempt("alice", PASSWORD, "d"), &live()).await.unwrap();
        assert!(gateway.validate_session(&out.jti, &live()).await.is_ok());
        assert!(matches!(
            gateway.login(attempt("alice", "wrong", "d"), &live()).await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn store_outage_denies() {
        let store = Arc::new(InMemoryStore::new());
        let stores = Stores {
            credentials: Arc::new(BrokenCredentials),
            sessions: store.clone(),
            audit: store,
        };
        let gateway = build(stores, SecuritySettings::default(), Arc::new(ManualClock::new(start())));

        assert!(matches!(
            gateway.login(attempt("alice", PASSWORD, "d"), &live()).await,
            Err(AuthError::StoreUnavailable(_))
        ));
        assert!(matches!(
            gateway.get_user_permissions("u1", &live()).await,
            Err(AuthError::StoreUnavailable(_))
        ));
        assert!(matches!(
            gateway
                .require_permission("u1", "security_config:read", &client("d"), &live())
                .await,
            Err(AuthError::StoreUnavailable(_))
        ));
    }
}
