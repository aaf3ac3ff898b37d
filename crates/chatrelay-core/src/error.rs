//! Error taxonomy and the caller-visible error shapes.
//!
//! Every failure a request can hit is a [`RelayError`]. Failures that happen
//! before any upstream call (identity, protocol, validation) become a plain
//! [`Rejection`]; everything else is mapped into an [`ErrorEnvelope`] that
//! also carries a well-formed `choices` entry, so callers reading the
//! completion schema always find a readable message.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::completion::Choice;
use crate::upstream::UpstreamBody;

/// Message used when nothing better can be extracted from a failure.
pub const UNKNOWN_UPSTREAM_ERROR: &str = "Unknown error from upstream";

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Stable category string reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    AuthorizationDenied,
    ProtocolRejected,
    ValidationFailed,
    Timeout,
    TransportError,
    UpstreamStatusError,
    InternalFailure,
}

impl ErrorCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthorizationDenied => "authorization_denied",
            Self::ProtocolRejected => "protocol_rejected",
            Self::ValidationFailed => "validation_failed",
            Self::Timeout => "timeout",
            Self::TransportError => "transport_error",
            Self::UpstreamStatusError => "upstream_status_error",
            Self::InternalFailure => "internal_failure",
        }
    }
}

/// Any failure of a relayed request. None of them is retried.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Caller identity header missing or wrong.
    #[error("Caller identity missing or not recognised")]
    AuthorizationDenied,

    /// A JSON-RPC payload arrived on the chat endpoint.
    #[error("JSON-RPC payloads are not accepted on the chat endpoint (method '{method}')")]
    ProtocolRejected { method: String },

    /// Body is neither a chat nor an RPC shape.
    #[error("Invalid request: {0}")]
    ValidationFailed(String),

    /// Upstream exceeded the configured bound.
    #[error("Upstream did not respond within {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Upstream unreachable, or the call was aborted mid-flight.
    #[error("Upstream transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Upstream answered with a non-success status.
    #[error("Upstream returned status {status}")]
    UpstreamStatus { status: u16, body: UpstreamBody },

    /// Anything else.
    #[error("Internal failure: {message}")]
    Internal {
        status: u16,
        message: String,
        details: Value,
    },
}

impl RelayError {
    /// Wrap a transport-level cause.
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// The caller went away before upstream finished.
    pub fn cancelled() -> Self {
        Self::Transport {
            message: "upstream call aborted: caller disconnected".to_string(),
            source: None,
        }
    }

    /// An internal failure reported with the given HTTP status.
    pub fn internal(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Internal {
            status,
            details: json!({ "message": message }),
            message,
        }
    }

    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthorizationDenied => ErrorCategory::AuthorizationDenied,
            Self::ProtocolRejected { .. } => ErrorCategory::ProtocolRejected,
            Self::ValidationFailed(_) => ErrorCategory::ValidationFailed,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Transport { .. } => ErrorCategory::TransportError,
            Self::UpstreamStatus { .. } => ErrorCategory::UpstreamStatusError,
            Self::Internal { .. } => ErrorCategory::InternalFailure,
        }
    }

    /// HTTP status reported to the caller. Upstream statuses are preserved.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::AuthorizationDenied => 403,
            Self::ProtocolRejected { .. } | Self::ValidationFailed(_) => 400,
            Self::Timeout(_) => 504,
            Self::Transport { .. } => 502,
            Self::UpstreamStatus { status, .. } | Self::Internal { status, .. } => *status,
        }
    }

    /// Failures raised before any upstream call was attempted.
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::AuthorizationDenied
                | ErrorCategory::ProtocolRejected
                | ErrorCategory::ValidationFailed
        )
    }

    /// Opaque cause reported in `details`.
    pub fn details(&self) -> Value {
        match self {
            Self::Timeout(limit) => json!({
                "message": self.to_string(),
                "timeout_ms": u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            }),
            Self::UpstreamStatus { body, .. } => body.to_value(),
            Self::Internal { details, .. } => details.clone(),
            _ => json!({ "message": self.to_string() }),
        }
    }

    /// Run the error through the mapper.
    pub fn normalize(&self) -> NormalizedError {
        let details = self.details();
        NormalizedError {
            category: self.category(),
            message: extract_message(&details),
            details,
        }
    }

    /// Body for simple status+message rejections.
    pub fn rejection(&self) -> Rejection {
        Rejection {
            error: self.category(),
            message: self.to_string(),
        }
    }
}

/// A failure after mapping: category, readable message and raw cause.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedError {
    pub category: ErrorCategory,
    pub message: String,
    pub details: Value,
}

impl NormalizedError {
    /// The caller-visible error document.
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: self.category,
            details: self.details.clone(),
            choices: vec![Choice::assistant(format!("Error: {}", self.message))],
        }
    }
}

/// Error document with an embedded assistant choice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorCategory,
    pub details: Value,
    pub choices: Vec<Choice>,
}

/// Body of a rejection raised before any upstream call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub error: ErrorCategory,
    pub message: String,
}

/// Pull the most useful human-readable message out of an error cause.
///
/// Checked in order: a validation issue (`issues[0].message`, also under
/// `error`), a structured error detail (`error.message`), a top-level
/// `message`, then [`UNKNOWN_UPSTREAM_ERROR`].
pub fn extract_message(details: &Value) -> String {
    let issue = |v: &Value| {
        v.get("issues")
            .and_then(Value::as_array)
            .and_then(|issues| issues.iter().find_map(|i| i.get("message")?.as_str()))
            .map(str::to_string)
    };
    let text = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    issue(details)
        .or_else(|| details.get("error").and_then(issue))
        .or_else(|| text(details.get("error").and_then(|e| e.get("message"))))
        .or_else(|| text(details.get("message")))
        .unwrap_or_else(|| UNKNOWN_UPSTREAM_ERROR.to_string())
}
