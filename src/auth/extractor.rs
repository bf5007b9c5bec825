// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated requests.
//!
//! Use the `Auth` extractor in handlers to require a live session:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(request): Auth) -> impl IntoResponse {
//!     // request is AuthenticatedRequest
//! }
//! ```
//!
//! and `Authorized<P>` to additionally require a permission:
//!
//! ```rust,ignore
//! async fn update_config(
//!     Authorized(request, ..): Authorized<UpdateSecurityConfig>,
//! ) -> impl IntoResponse { /* ... */ }
//! ```

use std::marker::PhantomData;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{
        header::{AUTHORIZATION, USER_AGENT},
        request::Parts,
        Extensions, HeaderMap,
    },
};
use tokio_util::sync::{CancellationToken, DropGuard};

use super::device::{DeviceFingerprint, DEVICE_FINGERPRINT_HEADER};
use super::gateway::ClientContext;
use super::{AuthError, AuthenticatedRequest};
use crate::state::AppState;

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;
    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or(AuthError::InvalidAuthHeader)?;
    if token.is_empty() {
        return Err(AuthError::InvalidAuthHeader);
    }
    Ok(token)
}

/// Client address, user agent and device fingerprint of a request.
///
/// The socket address wins over `X-Forwarded-For`.
pub fn client_context(headers: &HeaderMap, extensions: &Extensions) -> ClientContext {
    let ip = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .or_else(|| {
            header_value(headers, FORWARDED_FOR_HEADER)
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_string())
        });

    ClientContext {
        ip,
        user_agent: header_value(headers, USER_AGENT.as_str()).map(str::to_string),
        device: DeviceFingerprint::from_header(header_value(headers, DEVICE_FINGERPRINT_HEADER)),
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl<S: Send + Sync> FromRequestParts<S> for ClientContext {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(client) = parts.extensions.get::<ClientContext>().cloned() {
            return Ok(client);
        }
        Ok(client_context(&parts.headers, &parts.extensions))
    }
}

/// Cancellation scope of one request.
///
/// Child of the server shutdown token. Cancelled when the request deadline
/// passes, or when the owning scope is dropped (handler finished or the
/// client disconnected).
pub struct RequestScope {
    token: CancellationToken,
    _guard: Option<DropGuard>,
}

impl RequestScope {
    /// Open a scope that owns its token and arms the request deadline.
    pub fn open(state: &AppState) -> Self {
        let token = state.shutdown.child_token();
        let timer = token.clone();
        let timeout = state.request_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    tracing::debug!(?timeout, "Request deadline passed");
                    timer.cancel();
                }
            }
        });
        Self {
            _guard: Some(token.clone().drop_guard()),
            token,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl FromRequestParts<AppState> for RequestScope {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // Reuse the scope opened by the session middleware
        if let Some(token) = parts.extensions.get::<CancellationToken>().cloned() {
            return Ok(Self {
                token,
                _guard: None,
            });
        }
        Ok(Self::open(state))
    }
}

/// Extractor for requests with a live, device-bound session.
///
/// Reads the identity placed by the session middleware, or runs the full
/// check itself when mounted outside it.
pub struct Auth(pub AuthenticatedRequest);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(request) = parts.extensions.get::<AuthenticatedRequest>().cloned() {
            return Ok(Auth(request));
        }

        let token = bearer_token(&parts.headers)?.to_string();
        let client = client_context(&parts.headers, &parts.extensions);
        let scope = RequestScope::open(state);
        let request = state
            .gateway
            .authorize_request(&token, &client, scope.token())
            .await?;
        Ok(Auth(request))
    }
}

/// A permission a route demands, as `resource:action`.
pub trait RequiredPermission: Send + Sync + 'static {
    const NAME: &'static str;
}

pub struct ReadSecurityConfig;
pub struct UpdateSecurityConfig;
pub struct ReadAuditLogs;

impl RequiredPermission for ReadSecurityConfig {
    const NAME: &'static str = "security_config:read";
}

impl RequiredPermission for UpdateSecurityConfig {
    const NAME: &'static str = "security_config:update";
}

impl RequiredPermission for ReadAuditLogs {
    const NAME: &'static str = "audit_logs:read";
}

/// Extractor that requires permission `P` on top of a live session.
///
/// Denials are audited. A failing permission lookup denies with 503.
pub struct Authorized<P: RequiredPermission>(pub AuthenticatedRequest, pub PhantomData<P>);

impl<P: RequiredPermission> FromRequestParts<AppState> for Authorized<P> {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(request) = Auth::from_request_parts(parts, state).await?;
        let client = ClientContext::from_request_parts(parts, state)
            .await
            .unwrap_or_default();
        let scope = RequestScope::from_request_parts(parts, state)
            .await
            .unwrap_or_else(|never| match never {});

        state
            .gateway
            .require_permission(&request.user_id, P::NAME, &client, scope.token())
            .await?;
        Ok(Authorized(request, PhantomData))
    }
}
