//! Response normalizer.
//!
//! Reshapes whatever single document upstream returned into the fixed
//! completion schema callers depend on. Pure and total: a malformed
//! document degrades to defaults (worst case an empty `choices` list).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Object tag of every document returned to the caller.
pub const COMPLETION_OBJECT: &str = "chat.completion";

/// Prefix of locally synthesized completion ids.
pub const COMPLETION_ID_PREFIX: &str = "chatcmpl-relay-";

const DEFAULT_ROLE: &str = "assistant";
const DEFAULT_FINISH_REASON: &str = "stop";

static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Completion document in the caller-stable schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    /// Unix seconds.
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A single completion choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u64,
    pub message: ChoiceMessage,
    pub finish_reason: String,
}

/// Message inside a choice. Content is always text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceMessage {
    pub role: String,
    pub content: String,
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Choice {
    /// A finished assistant message at index 0.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            index: 0,
            message: ChoiceMessage {
                role: DEFAULT_ROLE.to_string(),
                content: content.into(),
            },
            finish_reason: DEFAULT_FINISH_REASON.to_string(),
        }
    }
}

/// Normalize an upstream completion document.
pub fn normalize_completion(doc: &Value, default_model: &str) -> ChatCompletion {
    let id = doc
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map_or_else(synthesize_id, str::to_string);

    let created = doc
        .get("created")
        .and_then(Value::as_i64)
        .unwrap_or_else(|| chrono::Utc::now().timestamp());

    let model = doc
        .get("model")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or(default_model)
        .to_string();

    let choices = doc
        .get("choices")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(normalize_choice).collect())
        .unwrap_or_default();

    ChatCompletion {
        id,
        object: COMPLETION_OBJECT.to_string(),
        created,
        model,
        choices,
        usage: doc.get("usage").and_then(normalize_usage),
    }
}

fn normalize_choice(choice: &Value) -> Choice {
    let message = choice.get("message");

    let role = message
        .and_then(|m| m.get("role"))
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_ROLE)
        .to_string();

    let content = message
        .and_then(|m| m.get("content"))
        .map(content_text)
        .unwrap_or_default();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .or_else(|| choice.get("stop_reason").and_then(Value::as_str))
        .unwrap_or(DEFAULT_FINISH_REASON)
        .to_string();

    Choice {
        index: choice.get("index").and_then(Value::as_u64).unwrap_or(0),
        message: ChoiceMessage { role, content },
        finish_reason,
    }
}

/// Strings pass through verbatim; anything else, `null` included, is
/// rendered as its JSON text. Only an absent `content` key yields `""`.
fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn normalize_usage(usage: &Value) -> Option<Usage> {
    let usage = usage.as_object()?;
    let count = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);

    Some(Usage {
        prompt_tokens: count("prompt_tokens"),
        completion_tokens: count("completion_tokens"),
        total_tokens: count("total_tokens"),
    })
}

fn synthesize_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let seq = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{COMPLETION_ID_PREFIX}{millis}-{seq}")
}
