#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

mod auth;
pub mod dispatch;
pub mod error;
mod handlers;
pub mod heartbeat;
pub mod relay;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use heartbeat::StreamGauge;
pub use server::{create_router, serve};
pub use state::ProxyState;
