// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admin API endpoints for security management.
//!
//! Each endpoint requires a specific permission:
//! - Security tunables: `security_config:read` / `security_config:update`
//! - Audit log queries: `audit_logs:read`

use axum::{
    extract::{Query, State},
    Json,
};
use serde_json::json;

use crate::{
    auth::{Authorized, ClientContext, ReadAuditLogs, ReadSecurityConfig, UpdateSecurityConfig},
    config::{SecurityConfig, SecurityConfigKey, SettingsUpdateError},
    error::ApiError,
    models::{AuditLogQuery, AuditLogResponse, UpdateSecurityConfigRequest, UpdateSecurityConfigResponse},
    state::AppState,
    storage::{AuditEventType, AuditFilter, AuditRecord},
};

/// Current security tunables.
#[utoipa::path(
    get,
    path = "/v1/admin/security-config",
    tag = "Admin",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Security configuration", body = SecurityConfig),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorBody),
        (status = 403, description = "Missing security_config:read", body = crate::error::ErrorBody)
    )
)]
pub async fn get_security_config(
    State(state): State<AppState>,
    _: Authorized<ReadSecurityConfig>,
) -> Json<SecurityConfig> {
    Json(state.settings().snapshot().await)
}

/// Change one security tunable. Takes effect for the next operation.
#[utoipa::path(
    put,
    path = "/v1/admin/security-config",
    tag = "Admin",
    request_body = UpdateSecurityConfigRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Value updated", body = UpdateSecurityConfigResponse),
        (status = 400, description = "Unknown key or value out of range", body = crate::error::ErrorBody),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorBody),
        (status = 403, description = "Missing security_config:update", body = crate::error::ErrorBody),
        (status = 503, description = "Store unavailable", body = crate::error::ErrorBody)
    )
)]
pub async fn update_security_config(
    State(state): State<AppState>,
    Authorized(admin, ..): Authorized<UpdateSecurityConfig>,
    client: ClientContext,
    Json(request): Json<UpdateSecurityConfigRequest>,
) -> Result<Json<UpdateSecurityConfigResponse>, ApiError> {
    let key = SecurityConfigKey::parse(request.key.trim())
        .ok_or_else(|| ApiError::bad_request("invalid configuration key"))?;

    let previous = state
        .settings()
        .update(state.config_store.as_ref(), key, request.value)
        .await
        .map_err(|e| match e {
            SettingsUpdateError::Invalid(reason) => ApiError::bad_request(reason),
            SettingsUpdateError::Store(err) => ApiError::from(err),
        })?;

    tracing::info!(
        admin_id = %admin.user_id,
        key = %key,
        old_value = previous,
        new_value = request.value,
        "Security configuration changed"
    );
    let record = AuditRecord::new(
        AuditEventType::ConfigChange,
        "security_config",
        "update",
        state.gateway.now(),
    )
    .with_user(&admin.user_id)
    .with_old_values(json!({ key.as_str(): previous }))
    .with_new_values(json!({ key.as_str(): request.value }))
    .with_ip(client.ip)
    .with_user_agent(client.user_agent);
    if let Err(e) = state.audit.record(&record).await {
        tracing::warn!(error = %e, key = %key, "Failed to write audit record");
    }

    Ok(Json(UpdateSecurityConfigResponse {
        message: "Configuration updated".to_string(),
        key: key.as_str().to_string(),
        value: request.value,
    }))
}

/// Audit trail, newest first.
#[utoipa::path(
    get,
    path = "/v1/admin/audit-logs",
    tag = "Admin",
    params(AuditLogQuery),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Audit events", body = AuditLogResponse),
        (status = 400, description = "Invalid query parameters", body = crate::error::ErrorBody),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorBody),
        (status = 403, description = "Missing audit_logs:read", body = crate::error::ErrorBody)
    )
)]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    _: Authorized<ReadAuditLogs>,
    Query(params): Query<AuditLogQuery>,
) -> Result<Json<AuditLogResponse>, ApiError> {
    let event_type = match params.event_type.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            AuditEventType::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("unknown event type: {raw}")))?,
        ),
        None => None,
    };
    let filter = AuditFilter {
        user_id: params.user_id.filter(|s| !s.is_empty()),
        event_type,
        limit: params.limit.unwrap_or(0).min(1000),
    };

    let events = state.audit_log.query(&filter).await?;
    Ok(Json(AuditLogResponse {
        count: events.len(),
        events,
    }))
}
