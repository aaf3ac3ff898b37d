//! Inbound payload types and the payload classifier.
//!
//! A decoded request body is classified exactly once into [`Classified`].
//! Everything downstream works on the typed variant, never on the raw JSON.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Number, Value};

/// JSON-RPC protocol version accepted by the classifier.
pub const JSON_RPC_VERSION: &str = "2.0";

// =============================================================================
// Chat Types
// =============================================================================

/// Role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Parse a wire role name. Unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message with a recognised role.
///
/// `content` is opaque: it may be a string, an array of content parts, or
/// anything else the caller sent. Fields other than `role` and `content`
/// (`name`, `tool_calls`, `tool_call_id`, ...) ride along in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub content: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One element of the `messages` array.
///
/// Elements that are not objects with a known role are kept verbatim so
/// upstream can reject them with its own diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChatMessage {
    Structured(Message),
    Opaque(Value),
}

impl ChatMessage {
    /// Build a message from one raw array element. Never fails.
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::Opaque(value.clone());
        };
        let Some(role) = obj.get("role").and_then(Value::as_str).and_then(Role::parse) else {
            return Self::Opaque(value.clone());
        };

        let mut extra = obj.clone();
        extra.remove("role");
        let content = extra.remove("content").unwrap_or(Value::Null);

        Self::Structured(Message {
            role,
            content,
            extra,
        })
    }

    /// Role of the message, if it was recognised.
    pub const fn role(&self) -> Option<Role> {
        match self {
            Self::Structured(message) => Some(message.role),
            Self::Opaque(_) => None,
        }
    }
}

/// Optional OpenAI sampling fields carried through to upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SamplingOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    /// A stop string or an array of stop strings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    /// `"auto"`, `"none"`, `"required"` or a specific tool object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

/// A fully-populated chat-completion request, ready to send upstream.
///
/// Produced only by the request normalizer: `model` is never empty,
/// `messages` is always present and `stream` is always a real boolean.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(flatten)]
    pub options: SamplingOptions,
}

// =============================================================================
// RPC Types
// =============================================================================

/// JSON-RPC request id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(Number),
    String(String),
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Absent and `null` ids are both `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RpcId>,
}

impl RpcRequest {
    fn from_object(obj: &Map<String, Value>) -> Self {
        let method = match obj.get("method") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let id = match obj.get("id") {
            Some(Value::Number(n)) => Some(RpcId::Number(n.clone())),
            Some(Value::String(s)) => Some(RpcId::String(s.clone())),
            _ => None,
        };

        Self {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            method,
            params: obj.get("params").cloned(),
            id,
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// An object already known to carry a `messages` array.
///
/// Element-level validation is left to the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCandidate(Map<String, Value>);

impl ChatCandidate {
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

/// Why a body could not be classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    NotAnObject,
    MissingMessages,
    MessagesNotArray,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotAnObject => "request body must be a JSON object",
            Self::MissingMessages => "request body must contain a 'messages' array",
            Self::MessagesNotArray => "'messages' must be an array",
        })
    }
}

/// The shape of a decoded request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Chat(ChatCandidate),
    Rpc(RpcRequest),
    Invalid(InvalidReason),
}

impl Classified {
    /// Short label for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Chat(_) => "chat",
            Self::Rpc(_) => "rpc",
            Self::Invalid(_) => "invalid",
        }
    }
}

/// Classify a decoded request body.
///
/// RPC shape is checked first, so an object that is both a JSON-RPC request
/// and carries `messages` is treated as RPC.
pub fn classify(value: Value) -> Classified {
    let Value::Object(obj) = value else {
        return Classified::Invalid(InvalidReason::NotAnObject);
    };

    let is_rpc = obj.get("jsonrpc").and_then(Value::as_str) == Some(JSON_RPC_VERSION)
        && obj.contains_key("method");
    if is_rpc {
        return Classified::Rpc(RpcRequest::from_object(&obj));
    }

    match obj.get("messages") {
        Some(Value::Array(_)) => Classified::Chat(ChatCandidate(obj)),
        Some(_) => Classified::Invalid(InvalidReason::MessagesNotArray),
        None => Classified::Invalid(InvalidReason::MissingMessages),
    }
}
