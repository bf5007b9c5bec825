// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::storage::StoreError;

/// Header echoing the trace id of a rejected request.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Human-readable message, safe to show to clients
    pub error: String,
    /// Stable machine-readable code
    pub error_code: String,
    /// Correlates the response with server-side logs
    pub trace_id: String,
}

/// Render an error body with a fresh trace id. Returns the response and the id
/// so the caller can log the internal cause under the same id.
pub(crate) fn error_response(
    status: StatusCode,
    message: impl Into<String>,
    error_code: &str,
) -> (Response, String) {
    let trace_id = uuid::Uuid::new_v4().to_string();
    let body = Json(ErrorBody {
        error: message.into(),
        error_code: error_code.to_string(),
        trace_id: trace_id.clone(),
    });
    let mut response = (status, body).into_response();
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    (response, trace_id)
}

/// Errors from non-authentication handler logic (validation, admin reads).
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub error_code: &'static str,
    /// Server-side detail, logged but never sent
    pub internal: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>, error_code: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            error_code,
            internal: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message, "not_found")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "bad_request")
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message, "validation_error")
    }

    pub fn unavailable(internal: impl Into<String>) -> Self {
        Self {
            internal: Some(internal.into()),
            ..Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable",
                "store_unavailable",
            )
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::unavailable(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (response, trace_id) = error_response(self.status, self.message, self.error_code);
        if let Some(internal) = self.internal {
            tracing::error!(trace_id = %trace_id, error = %internal, "Request failed");
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn constructors_set_status_and_message() {
        let nf = ApiError::not_found("missing");
        assert_eq!(nf.status, StatusCode::NOT_FOUND);
        assert_eq!(nf.message, "missing");

        let bad = ApiError::bad_request("bad");
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
        assert_eq!(bad.error_code, "bad_request");

        let unp = ApiError::unprocessable("oops");
        assert_eq!(unp.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(unp.message, "oops");
    }

    #[tokio::test]
    async fn into_response_returns_json_body_with_trace_id() {
        let response = ApiError::bad_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let header = response
            .headers()
            .get(TRACE_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["error"], "bad data");
        assert_eq!(body["error_code"], "bad_request");
        assert_eq!(body["trace_id"], header);
    }

    #[tokio::test]
    async fn store_failures_hide_internal_detail() {
        let err: ApiError = StoreError::Unavailable("redb storage error: disk I/O".into()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert!(!text.contains("disk"));
        assert!(text.contains("store_unavailable"));
    }
}
