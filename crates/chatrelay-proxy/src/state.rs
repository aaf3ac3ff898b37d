//! Shared state injected into every handler.

use std::sync::Arc;

use chatrelay_core::RelayConfig;
use reqwest::Client;

use crate::heartbeat::StreamGauge;

/// Shared proxy state - cloneable, injected via Axum `State`.
///
/// Holds only read-only configuration plus the pooled HTTP client; request
/// tasks share nothing mutable apart from the stream gauge counter.
#[derive(Clone)]
pub struct ProxyState {
    /// HTTP client for forwarding requests upstream.
    pub client: Client,
    /// Immutable relay configuration.
    pub config: Arc<RelayConfig>,
    /// Live heartbeat timers, one per open relayed stream.
    pub streams: StreamGauge,
}

impl ProxyState {
    /// Build state with a pooled client for the given configuration.
    pub fn new(config: Arc<RelayConfig>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().pool_max_idle_per_host(10).build()?;
        Ok(Self {
            client,
            config,
            streams: StreamGauge::default(),
        })
    }
}
