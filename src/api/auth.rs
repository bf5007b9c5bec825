// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Login, token refresh, MFA and logout endpoints.

use axum::{extract::State, Json};

use crate::{
    auth::{Auth, ClientContext, LoginAttempt, RequestScope},
    error::ApiError,
    models::{
        LoginRequest, LoginResponse, LogoutAllResponse, MessageResponse, MfaEnrollResponse,
        MfaVerifyRequest, PermissionsResponse, RefreshRequest, RefreshResponse, SessionResponse,
    },
    state::AppState,
    storage::DeviceMetadata,
};

/// Exchange username and password for a token pair.
///
/// Send `X-Device-Fingerprint` to bind the session to a device; without it
/// the session is bound to `default-device`.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = LoginResponse),
        (status = 400, description = "Missing username or password", body = crate::error::ErrorBody),
        (status = 401, description = "Invalid credentials or account locked", body = crate::error::ErrorBody),
        (status = 503, description = "Store unavailable", body = crate::error::ErrorBody)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    client: ClientContext,
    scope: RequestScope,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    request.validate()?;
    let attempt = LoginAttempt {
        username: request.username,
        password: request.password,
        client,
        device_metadata: DeviceMetadata::default(),
    };
    let outcome = state.gateway.login(attempt, scope.token()).await?;
    Ok(Json(outcome.into()))
}

/// Trade a refresh token for a new access token and a rotated refresh token.
///
/// Each refresh token works once. Presenting a spent one revokes the session.
#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    tag = "Auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Tokens refreshed", body = RefreshResponse),
        (status = 400, description = "Missing refresh token", body = crate::error::ErrorBody),
        (status = 401, description = "Invalid, expired or revoked", body = crate::error::ErrorBody)
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    client: ClientContext,
    scope: RequestScope,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let token = request.refresh_token.trim();
    if token.is_empty() {
        return Err(ApiError::bad_request("refresh_token is required"));
    }
    let outcome = state
        .gateway
        .refresh_token(token, &client, scope.token())
        .await?;
    Ok(Json(outcome.into()))
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/verify",
    tag = "Auth",
    request_body = MfaVerifyRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Code accepted", body = MessageResponse),
        (status = 401, description = "Invalid code or session", body = crate::error::ErrorBody)
    )
)]
pub async fn verify_mfa(
    State(state): State<AppState>,
    Auth(identity): Auth,
    client: ClientContext,
    scope: RequestScope,
    Json(request): Json<MfaVerifyRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .gateway
        .verify_mfa(&identity.user_id, &request.code, &client, scope.token())
        .await?;
    Ok(Json(MessageResponse::new("MFA verified")))
}

/// Generate a TOTP secret for the caller, replacing any existing one.
#[utoipa::path(
    post,
    path = "/v1/auth/mfa/enroll",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Secret generated", body = MfaEnrollResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorBody)
    )
)]
pub async fn enroll_mfa(
    State(state): State<AppState>,
    Auth(identity): Auth,
    client: ClientContext,
    scope: RequestScope,
) -> Result<Json<MfaEnrollResponse>, ApiError> {
    let enrollment = state
        .gateway
        .enroll_mfa(&identity.user_id, &client, scope.token())
        .await?;
    Ok(Json(enrollment.into()))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Session revoked", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorBody)
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    Auth(identity): Auth,
    client: ClientContext,
    scope: RequestScope,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .gateway
        .logout(&identity.jti, &client, scope.token())
        .await?;
    Ok(Json(MessageResponse::new("Logged out")))
}

/// Revoke every session of the caller, including this one.
#[utoipa::path(
    post,
    path = "/v1/auth/logout/all",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Sessions revoked", body = LogoutAllResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorBody)
    )
)]
pub async fn logout_all(
    State(state): State<AppState>,
    Auth(identity): Auth,
    client: ClientContext,
    scope: RequestScope,
) -> Result<Json<LogoutAllResponse>, ApiError> {
    let count = state
        .gateway
        .logout_all(&identity.user_id, &client, scope.token())
        .await?;
    Ok(Json(LogoutAllResponse {
        message: "Logged out of all sessions".to_string(),
        sessions_revoked: count,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current session", body = SessionResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorBody)
    )
)]
pub async fn current_session(
    State(state): State<AppState>,
    Auth(identity): Auth,
    scope: RequestScope,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .gateway
        .validate_session(&identity.jti, scope.token())
        .await?;
    Ok(Json(SessionResponse::from_session(session, state.gateway.now())))
}

#[utoipa::path(
    get,
    path = "/v1/auth/permissions",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Effective permissions", body = PermissionsResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorBody),
        (status = 503, description = "Store unavailable", body = crate::error::ErrorBody)
    )
)]
pub async fn permissions(
    State(state): State<AppState>,
    Auth(identity): Auth,
    scope: RequestScope,
) -> Result<Json<PermissionsResponse>, ApiError> {
    let set = state
        .gateway
        .get_user_permissions(&identity.user_id, scope.token())
        .await?;
    let mut permissions: Vec<_> = set.iter().cloned().collect();
    permissions.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(PermissionsResponse {
        user_id: identity.user_id,
        permissions,
    }))
}
