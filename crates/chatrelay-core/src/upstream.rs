//! Upstream response body representation.

use serde_json::Value;

/// Body of an upstream response.
///
/// Bodies that do not parse as JSON are kept as raw text so the caller
/// still sees whatever diagnostics upstream produced.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamBody {
    Json(Value),
    Text(String),
}

impl UpstreamBody {
    /// Parse body text, falling back to raw text when it is not JSON.
    pub fn parse(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(text),
        }
    }

    /// The body as a JSON value; raw text becomes a JSON string.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Json(value) => value.clone(),
            Self::Text(text) => Value::String(text.clone()),
        }
    }

    pub const fn is_json(&self) -> bool {
        matches!(self, Self::Json(_))
    }
}
