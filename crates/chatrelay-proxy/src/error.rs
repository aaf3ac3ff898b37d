//! HTTP mapping for relay errors.
//!
//! Rejections raised before any upstream call answer with a plain
//! `{error, message}` body. Every other failure goes through the error
//! mapper and answers with the envelope carrying an assistant choice.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chatrelay_core::RelayError;
use tracing::{error, warn};

/// Axum-facing wrapper around [`RelayError`].
#[derive(Debug)]
pub struct ApiError(pub RelayError);

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);

        if err.is_rejection() {
            warn!(
                category = err.category().as_str(),
                status = status.as_u16(),
                "Request rejected: {err}"
            );
            return (status, Json(err.rejection())).into_response();
        }

        let normalized = err.normalize();
        error!(
            category = normalized.category.as_str(),
            status = status.as_u16(),
            message = %normalized.message,
            "Relay request failed: {err}"
        );
        (status, Json(normalized.envelope())).into_response()
    }
}
