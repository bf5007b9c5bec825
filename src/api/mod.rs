// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::{header, HeaderValue},
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{middleware::require_session, UserSummary},
    config::SecurityConfig,
    error::ErrorBody,
    models::{
        AuditLogResponse, LoginRequest, LoginResponse, LogoutAllResponse, MessageResponse,
        MfaEnrollResponse, MfaVerifyRequest, PermissionsResponse, RefreshRequest, RefreshResponse,
        SessionResponse, UpdateSecurityConfigRequest, UpdateSecurityConfigResponse,
    },
    state::AppState,
    storage::{AuditEventType, AuditRecord, Permission, SessionState},
};

pub mod admin;
pub mod auth;
pub mod health;

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh));

    let protected_routes = Router::new()
        .route("/auth/mfa/verify", post(auth::verify_mfa))
        .route("/auth/mfa/enroll", post(auth::enroll_mfa))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/logout/all", post(auth::logout_all))
        .route("/auth/session", get(auth::current_session))
        .route("/auth/permissions", get(auth::permissions))
        .route(
            "/admin/security-config",
            get(admin::get_security_config).put(admin::update_security_config),
        )
        .route("/admin/audit-logs", get(admin::list_audit_logs))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    let v1_routes = public_routes.merge(protected_routes);

    Router::new()
        .route("/health", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/v1", v1_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http())
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_XSS_PROTECTION,
                    HeaderValue::from_static("1; mode=block"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("no-store"),
                ))
                .layer(CorsLayer::permissive()),
        )
}

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::liveness,
        health::readiness,
        auth::login,
        auth::refresh,
        auth::verify_mfa,
        auth::enroll_mfa,
        auth::logout,
        auth::logout_all,
        auth::current_session,
        auth::permissions,
        admin::get_security_config,
        admin::update_security_config,
        admin::list_audit_logs
    ),
    components(
        schemas(
            ErrorBody,
            LoginRequest,
            LoginResponse,
            UserSummary,
            RefreshRequest,
            RefreshResponse,
            MfaVerifyRequest,
            MfaEnrollResponse,
            MessageResponse,
            LogoutAllResponse,
            SessionResponse,
            SessionState,
            PermissionsResponse,
            Permission,
            SecurityConfig,
            UpdateSecurityConfigRequest,
            UpdateSecurityConfigResponse,
            AuditLogResponse,
            AuditRecord,
            AuditEventType,
            health::HealthResponse,
            health::ReadyResponse,
            health::HealthChecks
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Auth", description = "Sign-in, token refresh, MFA and sessions"),
        (name = "Admin", description = "Security tunables and audit trail")
    )
)]
pub struct ApiDoc;
