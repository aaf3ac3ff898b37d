//! Request normalizer.
//!
//! Turns a classified chat body into a [`ChatPayload`] with every field
//! populated. The normalizer is total and idempotent: any input yields a
//! payload, and normalizing the serialized form of a normalized payload
//! yields the same payload again.

use serde_json::{Map, Value};

use crate::payload::{ChatCandidate, ChatMessage, ChatPayload, SamplingOptions};

impl ChatCandidate {
    /// Normalize this candidate against the configured default model.
    pub fn normalize(&self, default_model: &str) -> ChatPayload {
        normalize_fields(self.as_map(), default_model)
    }
}

/// Normalize a raw (possibly malformed) chat body.
///
/// Non-object input is treated as an empty object, so the result is a
/// payload with the default model, no messages and `stream: false`.
pub fn normalize_chat(raw: &Value, default_model: &str) -> ChatPayload {
    match raw {
        Value::Object(obj) => normalize_fields(obj, default_model),
        _ => normalize_fields(&Map::new(), default_model),
    }
}

fn normalize_fields(obj: &Map<String, Value>, default_model: &str) -> ChatPayload {
    let model = match obj.get("model").and_then(Value::as_str) {
        Some(model) if !model.is_empty() => model.to_string(),
        _ => default_model.to_string(),
    };

    let messages = obj
        .get("messages")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(ChatMessage::from_value).collect())
        .unwrap_or_default();

    // Only a literal `true` selects the streaming path; "true", 1, etc. do not.
    let stream = matches!(obj.get("stream"), Some(Value::Bool(true)));

    ChatPayload {
        model,
        messages,
        stream,
        options: sampling_options(obj),
    }
}

fn sampling_options(obj: &Map<String, Value>) -> SamplingOptions {
    SamplingOptions {
        temperature: obj.get("temperature").and_then(Value::as_f64),
        top_p: obj.get("top_p").and_then(Value::as_f64),
        max_tokens: obj.get("max_tokens").and_then(Value::as_u64),
        stop: obj
            .get("stop")
            .filter(|v| v.is_string() || v.is_array())
            .cloned(),
        tools: obj.get("tools").filter(|v| v.is_array()).cloned(),
        tool_choice: obj
            .get("tool_choice")
            .filter(|v| v.is_string() || v.is_object())
            .cloned(),
    }
}
