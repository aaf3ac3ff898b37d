#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

pub mod completion;
pub mod config;
pub mod error;
pub mod normalize;
pub mod payload;
pub mod upstream;

// Re-export commonly used types for convenience
pub use completion::{ChatCompletion, Choice, ChoiceMessage, Usage, normalize_completion};
pub use config::{ConfigError, RelayConfig};
pub use error::{
    ErrorCategory, ErrorEnvelope, NormalizedError, Rejection, RelayError, extract_message,
};
pub use normalize::normalize_chat;
pub use payload::{
    ChatCandidate, ChatMessage, ChatPayload, Classified, InvalidReason, Message, Role,
    RpcId, RpcRequest, SamplingOptions, classify,
};
pub use upstream::UpstreamBody;
