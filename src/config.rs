// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Process settings come from the environment at startup. Security tunables
//! live in the `security_config` table and can be changed at runtime by an
//! administrator.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding `auth.redb` | `./data` |
//! | `JWT_SECRET` | HMAC signing secret (at least 32 bytes) | Required |
//! | `PASSWORD_PEPPER` | Server-wide password pepper | Required |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files; HTTPS when both are set | Unset |
//! | `MFA_DEMO_CODE` | Accept this fixed code instead of TOTP (demo only) | Unset |
//! | `MFA_ISSUER` | Issuer label in TOTP provisioning URIs | `estate-guard` |
//! | `REQUEST_TIMEOUT_SECS` | Per-request deadline | `10` |
//! | `SEED_ADMIN_USERNAME` / `SEED_ADMIN_PASSWORD` / `SEED_ADMIN_EMAIL` | Bootstrap admin account | Unset |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//!
//! ## Persisted Security Tunables
//!
//! | Key | Range | Default |
//! |-----|-------|---------|
//! | `ACCESS_TOKEN_TTL_MINUTES` | 1-60 | 15 |
//! | `REFRESH_TOKEN_TTL_DAYS` | 1-365 | 7 |
//! | `MAX_FAILED_ATTEMPTS` | 1-20 | 5 |
//! | `LOCKOUT_DURATION_MINUTES` | 1-1440 | 15 |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::auth::lockout::LockoutPolicy;
use crate::storage::SecurityConfigStore;

// =============================================================================
// Environment Variable Names
// =============================================================================

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";

/// Directory for the embedded database file.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// HMAC secret for signing tokens. Must be at least [`MIN_JWT_SECRET_LEN`] bytes.
pub const JWT_SECRET_ENV: &str = "JWT_SECRET";

/// Pepper appended to every password before hashing.
///
/// Changing it invalidates every stored password hash.
pub const PASSWORD_PEPPER_ENV: &str = "PASSWORD_PEPPER";

pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";

/// Fixed MFA code for demos. When set, TOTP verification is bypassed.
pub const MFA_DEMO_CODE_ENV: &str = "MFA_DEMO_CODE";
pub const MFA_ISSUER_ENV: &str = "MFA_ISSUER";
pub const REQUEST_TIMEOUT_SECS_ENV: &str = "REQUEST_TIMEOUT_SECS";

pub const SEED_ADMIN_USERNAME_ENV: &str = "SEED_ADMIN_USERNAME";
pub const SEED_ADMIN_PASSWORD_ENV: &str = "SEED_ADMIN_PASSWORD";
pub const SEED_ADMIN_EMAIL_ENV: &str = "SEED_ADMIN_EMAIL";

pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

// =============================================================================
// Defaults
// =============================================================================

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DATABASE_FILE_NAME: &str = "auth.redb";
pub const DEFAULT_MFA_ISSUER: &str = "estate-guard";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

// =============================================================================
// ServerConfig
// =============================================================================

/// Bootstrap admin account created on startup if absent.
#[derive(Clone)]
pub struct SeedAdmin {
    pub username: String,
    pub password: String,
    pub email: String,
}

impl std::fmt::Debug for SeedAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedAdmin")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Process configuration resolved from the environment.
#[derive(Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub jwt_secret: Vec<u8>,
    pub password_pepper: String,
    pub tls: Option<(PathBuf, PathBuf)>,
    pub mfa_demo_code: Option<String>,
    pub mfa_issuer: String,
    pub request_timeout: StdDuration,
    pub seed_admin: Option<SeedAdmin>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("data_dir", &self.data_dir)
            .field("tls", &self.tls.is_some())
            .field("mfa_demo", &self.mfa_demo_code.is_some())
            .field("mfa_issuer", &self.mfa_issuer)
            .field("request_timeout", &self.request_timeout)
            .field("seed_admin", &self.seed_admin)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve from any variable source (the process environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let host = var(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match var(PORT_ENV) {
            Some(p) => p.parse::<u16>().map_err(|e| ConfigError::Invalid {
                name: PORT_ENV,
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };
        let bind_addr: SocketAddr =
            format!("{host}:{port}")
                .parse()
                .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                    name: HOST_ENV,
                    reason: e.to_string(),
                })?;

        let jwt_secret = var(JWT_SECRET_ENV).ok_or(ConfigError::Missing(JWT_SECRET_ENV))?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: JWT_SECRET_ENV,
                reason: format!("must be at least {MIN_JWT_SECRET_LEN} bytes"),
            });
        }
        let password_pepper =
            var(PASSWORD_PEPPER_ENV).ok_or(ConfigError::Missing(PASSWORD_PEPPER_ENV))?;

        let tls = match (var(TLS_CERT_PATH_ENV), var(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some((PathBuf::from(cert), PathBuf::from(key))),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid {
                    name: TLS_CERT_PATH_ENV,
                    reason: format!("{TLS_CERT_PATH_ENV} and {TLS_KEY_PATH_ENV} must be set together"),
                })
            }
        };

        let request_timeout_secs = match var(REQUEST_TIMEOUT_SECS_ENV) {
            Some(v) => v
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| ConfigError::Invalid {
                    name: REQUEST_TIMEOUT_SECS_ENV,
                    reason: "must be a positive integer".to_string(),
                })?,
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        let seed_admin = match (var(SEED_ADMIN_USERNAME_ENV), var(SEED_ADMIN_PASSWORD_ENV)) {
            (Some(username), Some(password)) => Some(SeedAdmin {
                email: var(SEED_ADMIN_EMAIL_ENV).unwrap_or_else(|| format!("{username}@localhost")),
                username,
                password,
            }),
            _ => None,
        };

        Ok(Self {
            bind_addr,
            data_dir: PathBuf::from(var(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())),
            jwt_secret: jwt_secret.into_bytes(),
            password_pepper,
            tls,
            mfa_demo_code: var(MFA_DEMO_CODE_ENV),
            mfa_issuer: var(MFA_ISSUER_ENV).unwrap_or_else(|| DEFAULT_MFA_ISSUER.to_string()),
            request_timeout: StdDuration::from_secs(request_timeout_secs),
            seed_admin,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE_NAME)
    }
}

// =============================================================================
// Security tunables
// =============================================================================

/// Keys of the persisted security tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityConfigKey {
    AccessTokenTtlMinutes,
    RefreshTokenTtlDays,
    MaxFailedAttempts,
    LockoutDurationMinutes,
}

impl SecurityConfigKey {
    pub const ALL: [SecurityConfigKey; 4] = [
        SecurityConfigKey::AccessTokenTtlMinutes,
        SecurityConfigKey::RefreshTokenTtlDays,
        SecurityConfigKey::MaxFailedAttempts,
        SecurityConfigKey::LockoutDurationMinutes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityConfigKey::AccessTokenTtlMinutes => "ACCESS_TOKEN_TTL_MINUTES",
            SecurityConfigKey::RefreshTokenTtlDays => "REFRESH_TOKEN_TTL_DAYS",
            SecurityConfigKey::MaxFailedAttempts => "MAX_FAILED_ATTEMPTS",
            SecurityConfigKey::LockoutDurationMinutes => "LOCKOUT_DURATION_MINUTES",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Inclusive range of accepted values.
    pub fn range(&self) -> (i64, i64) {
        match self {
            SecurityConfigKey::AccessTokenTtlMinutes => (1, 60),
            SecurityConfigKey::RefreshTokenTtlDays => (1, 365),
            SecurityConfigKey::MaxFailedAttempts => (1, 20),
            SecurityConfigKey::LockoutDurationMinutes => (1, 1440),
        }
    }

    pub fn default_value(&self) -> i64 {
        match self {
            SecurityConfigKey::AccessTokenTtlMinutes => 15,
            SecurityConfigKey::RefreshTokenTtlDays => 7,
            SecurityConfigKey::MaxFailedAttempts => 5,
            SecurityConfigKey::LockoutDurationMinutes => 15,
        }
    }

    pub fn validate(&self, value: i64) -> Result<i64, String> {
        let (min, max) = self.range();
        if (min..=max).contains(&value) {
            Ok(value)
        } else {
            Err(format!("{} must be between {min} and {max}", self.as_str()))
        }
    }
}

impl std::fmt::Display for SecurityConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved security tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SecurityConfig {
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    pub max_failed_attempts: i64,
    pub lockout_duration_minutes: i64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            access_token_ttl_minutes: SecurityConfigKey::AccessTokenTtlMinutes.default_value(),
            refresh_token_ttl_days: SecurityConfigKey::RefreshTokenTtlDays.default_value(),
            max_failed_attempts: SecurityConfigKey::MaxFailedAttempts.default_value(),
            lockout_duration_minutes: SecurityConfigKey::LockoutDurationMinutes.default_value(),
        }
    }
}

impl SecurityConfig {
    pub fn get(&self, key: SecurityConfigKey) -> i64 {
        match key {
            SecurityConfigKey::AccessTokenTtlMinutes => self.access_token_ttl_minutes,
            SecurityConfigKey::RefreshTokenTtlDays => self.refresh_token_ttl_days,
            SecurityConfigKey::MaxFailedAttempts => self.max_failed_attempts,
            SecurityConfigKey::LockoutDurationMinutes => self.lockout_duration_minutes,
        }
    }

    /// Set one value after range validation.
    pub fn set(&mut self, key: SecurityConfigKey, value: i64) -> Result<(), String> {
        let value = key.validate(value)?;
        match key {
            SecurityConfigKey::AccessTokenTtlMinutes => self.access_token_ttl_minutes = value,
            SecurityConfigKey::RefreshTokenTtlDays => self.refresh_token_ttl_days = value,
            SecurityConfigKey::MaxFailedAttempts => self.max_failed_attempts = value,
            SecurityConfigKey::LockoutDurationMinutes => self.lockout_duration_minutes = value,
        }
        Ok(())
    }

    pub fn access_token_ttl(&self) -> Duration {
        Duration::minutes(self.access_token_ttl_minutes)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::days(self.refresh_token_ttl_days)
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy::new(
            u32::try_from(self.max_failed_attempts).unwrap_or(u32::MAX),
            Duration::minutes(self.lockout_duration_minutes),
        )
    }

    /// Resolve every key from the store. Missing, unreadable or out-of-range
    /// values fall back to their default with a warning.
    pub async fn load(store: &dyn SecurityConfigStore) -> Self {
        let mut config = Self::default();
        for key in SecurityConfigKey::ALL {
            let raw = match store.config_value(key.as_str()).await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    tracing::warn!(key = %key, default = key.default_value(), "Security config key not set, using default");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Failed to read security config, using default");
                    continue;
                }
            };
            let parsed = raw
                .trim()
                .parse::<i64>()
                .map_err(|e| e.to_string())
                .and_then(|v| config.set(key, v));
            if let Err(reason) = parsed {
                tracing::warn!(key = %key, value = %raw, reason = %reason, "Invalid security config value, using default");
            }
        }
        config
    }
}

/// Shared, runtime-updatable handle on the security tunables.
#[derive(Debug, Clone, Default)]
pub struct SecuritySettings {
    inner: Arc<RwLock<SecurityConfig>>,
}

impl SecuritySettings {
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub async fn snapshot(&self) -> SecurityConfig {
        *self.inner.read().await
    }

    /// Validate, persist, then publish one value. Returns the previous value.
    ///
    /// The in-memory value only changes once the store write succeeded.
    pub async fn update(
        &self,
        store: &dyn SecurityConfigStore,
        key: SecurityConfigKey,
        value: i64,
    ) -> Result<i64, SettingsUpdateError> {
        let value = key.validate(value).map_err(SettingsUpdateError::Invalid)?;
        let mut guard = self.inner.write().await;
        let previous = guard.get(key);
        store
            .set_config_value(key.as_str(), &value.to_string())
            .await
            .map_err(SettingsUpdateError::Store)?;
        guard.set(key, value).map_err(SettingsUpdateError::Invalid)?;
        Ok(previous)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsUpdateError {
    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Store(crate::storage::StoreError),
}
