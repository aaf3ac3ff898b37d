//! Caller identity check.
//!
//! Requires the configured caller header to carry the configured token.
//! Runs before the body is even classified; a mismatch answers 403.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chatrelay_core::RelayError;
use tracing::warn;

use crate::error::ApiError;
use crate::state::ProxyState;

/// Auth middleware: validate the caller identity header.
pub(crate) async fn require_caller(
    State(state): State<ProxyState>,
    req: Request,
    next: Next,
) -> Response {
    let presented = req
        .headers()
        .get(state.config.caller_header.as_str())
        .map(|v| v.to_str().ok());

    if presented == Some(Some(state.config.caller_token.as_str())) {
        return next.run(req).await;
    }

    warn!(
        path = %req.uri().path(),
        header_present = presented.is_some(),
        "Rejected request - missing or unknown caller identity"
    );
    ApiError(RelayError::AuthorizationDenied).into_response()
}
