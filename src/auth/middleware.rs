// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session middleware for Axum.
//!
//! Guards a router subtree: every request must carry a bearer access token
//! for a live session bound to the presented device. On success the
//! resolved [`AuthenticatedRequest`](super::AuthenticatedRequest), the
//! [`ClientContext`] and the request's cancellation token are placed in the
//! request extensions for handlers and extractors downstream.
//!
//! ```rust,ignore
//! let protected = Router::new()
//!     .route("/session", get(handler))
//!     .layer(axum::middleware::from_fn_with_state(state.clone(), require_session));
//! ```

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::extractor::{bearer_token, client_context, RequestScope};
use super::gateway::ClientContext;
use crate::state::AppState;

/// Authentication middleware function.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(request.headers()) {
        Ok(token) => token.to_string(),
        Err(e) => return e.into_response(),
    };
    let client: ClientContext = client_context(request.headers(), request.extensions());

    // Lives until the response is produced; dropping it cancels downstream work.
    let scope = RequestScope::open(&state);

    match state
        .gateway
        .authorize_request(&token, &client, scope.token())
        .await
    {
        Ok(identity) => {
            let extensions = request.extensions_mut();
            extensions.insert(identity);
            extensions.insert(client);
            extensions.insert(scope.token().clone());
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}
