//! Relay configuration.
//!
//! A single immutable [`RelayConfig`] is built once at startup and shared
//! (behind an `Arc`) by every request task. Nothing in the relay reads the
//! environment directly; the CLI adapter is the only place that does.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use http::HeaderName;
use thiserror::Error;
use url::Url;

/// Default model identifier used when the caller does not name one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default header carrying the caller identity token.
pub const DEFAULT_CALLER_HEADER: &str = "x-caller-id";

/// Default listen port for the relay.
pub const DEFAULT_LISTEN_PORT: u16 = 8787;

/// Default bound on a single upstream call.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between keep-alive frames on a relayed stream.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Default cap on inbound request bodies (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Errors raised while validating a [`RelayConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Upstream URL '{url}' is not an absolute http(s) URL: {reason}")]
    InvalidUpstreamUrl { url: String, reason: String },

    #[error("RPC forwarding URL '{url}' is not an absolute http(s) URL: {reason}")]
    InvalidRpcUrl { url: String, reason: String },

    #[error("Caller token must not be empty")]
    EmptyCallerToken,

    #[error("Caller header name must not be empty")]
    EmptyCallerHeader,

    #[error("Caller header '{0}' is not a valid HTTP header name")]
    InvalidCallerHeader(String),

    #[error("Default model must not be empty")]
    EmptyDefaultModel,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("Maximum body size must be greater than zero")]
    ZeroBodyLimit,
}

/// Immutable process configuration for the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Full URL of the upstream chat-completion endpoint.
    pub upstream_url: String,
    /// Optional URL that RPC payloads are forwarded to.
    pub rpc_url: Option<String>,
    /// Bearer credential presented to upstream.
    pub api_key: Option<String>,
    /// Model used when the caller omits one (and when upstream omits one).
    pub default_model: String,
    /// Address the HTTP server binds to.
    pub listen_addr: SocketAddr,
    /// Name of the header identifying the caller.
    pub caller_header: String,
    /// Value the caller header must carry.
    pub caller_token: String,
    /// Bound on one upstream call, measured from dispatch.
    pub upstream_timeout: Duration,
    /// Interval between keep-alive comments on relayed streams.
    pub heartbeat_interval: Duration,
    /// Largest inbound body accepted, in bytes.
    pub max_body_bytes: usize,
}

impl RelayConfig {
    /// Create a config with defaults for everything but the two required values.
    pub fn new(upstream_url: impl Into<String>, caller_token: impl Into<String>) -> Self {
        Self {
            upstream_url: upstream_url.into(),
            rpc_url: None,
            api_key: None,
            default_model: DEFAULT_MODEL.to_string(),
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_LISTEN_PORT),
            caller_header: DEFAULT_CALLER_HEADER.to_string(),
            caller_token: caller_token.into(),
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Set the RPC forwarding URL.
    #[must_use]
    pub fn with_rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    /// Set the bearer credential sent upstream.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the default model identifier.
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Set the listen address.
    #[must_use]
    pub const fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Set the caller identity header name.
    #[must_use]
    pub fn with_caller_header(mut self, header: impl Into<String>) -> Self {
        self.caller_header = header.into().to_ascii_lowercase();
        self
    }

    /// Set the upstream timeout.
    #[must_use]
    pub const fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    /// Set the heartbeat interval for relayed streams.
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the inbound body limit.
    #[must_use]
    pub const fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Check the configuration for values the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Err(reason) = check_http_url(&self.upstream_url) {
            return Err(ConfigError::InvalidUpstreamUrl {
                url: self.upstream_url.clone(),
                reason,
            });
        }

        if let Some(rpc_url) = &self.rpc_url
            && let Err(reason) = check_http_url(rpc_url)
        {
            return Err(ConfigError::InvalidRpcUrl {
                url: rpc_url.clone(),
                reason,
            });
        }

        if self.caller_token.trim().is_empty() {
            return Err(ConfigError::EmptyCallerToken);
        }
        if self.caller_header.trim().is_empty() {
            return Err(ConfigError::EmptyCallerHeader);
        }
        if HeaderName::from_bytes(self.caller_header.as_bytes()).is_err() {
            return Err(ConfigError::InvalidCallerHeader(self.caller_header.clone()));
        }
        if self.default_model.trim().is_empty() {
            return Err(ConfigError::EmptyDefaultModel);
        }

        if self.upstream_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("Upstream timeout"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("Heartbeat interval"));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::ZeroBodyLimit);
        }

        Ok(())
    }
}

/// Parse `raw` and require an http(s) scheme with a host.
fn check_http_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err("missing host".to_string());
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> RelayConfig {
        RelayConfig::new("http://127.0.0.1:9000/v1/chat/completions", "secret")
    }

    #[test]
    fn test_defaults() {
        let config = valid();
        assert_eq!(config.default_model, DEFAULT_MODEL);
        assert_eq!(config.caller_header, DEFAULT_CALLER_HEADER);
        assert_eq!(config.listen_addr.port(), DEFAULT_LISTEN_PORT);
        assert_eq!(config.upstream_timeout, DEFAULT_UPSTREAM_TIMEOUT);
        assert!(config.rpc_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_caller_header_is_lowercased() {
        let config = valid().with_caller_header("X-Relay-Caller");
        assert_eq!(config.caller_header, "x-relay-caller");
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert_eq!(
            RelayConfig::new("ftp://example.com", "secret").validate(),
            Err(ConfigError::InvalidUpstreamUrl {
                url: "ftp://example.com".into(),
                reason: "unsupported scheme 'ftp'".into(),
            })
        );

        for bad in [
            "http://exa mple.com/v1",
            "http://:0/x",
            "https://[::1/x",
            "http://host:notaport/",
            "/v1/chat/completions",
            "api.example.com/v1",
        ] {
            let result = RelayConfig::new(bad, "secret").validate();
            assert!(
                matches!(&result, Err(ConfigError::InvalidUpstreamUrl { url, .. }) if url == bad),
                "{bad} -> {result:?}"
            );
        }

        let config = valid().with_rpc_url("http://host:notaport/rpc");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRpcUrl { .. })));
    }

    #[test]
    fn test_accepts_http_and_https_urls() {
        for good in [
            "http://127.0.0.1:9000/v1/chat/completions",
            "https://api.example.com/v1/chat/completions",
            "http://[::1]:8080/v1",
        ] {
            assert_eq!(RelayConfig::new(good, "secret").validate(), Ok(()), "{good}");
        }
    }

    #[test]
    fn test_rejects_invalid_caller_header() {
        assert_eq!(
            valid().with_caller_header("x caller").validate(),
            Err(ConfigError::InvalidCallerHeader("x caller".into()))
        );
        assert_eq!(
            valid().with_caller_header("x-caller:id").validate(),
            Err(ConfigError::InvalidCallerHeader("x-caller:id".into()))
        );
        assert_eq!(
            valid().with_caller_header("").validate(),
            Err(ConfigError::EmptyCallerHeader)
        );
        assert!(valid().with_caller_header("X-Team-Caller").validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_values() {
        assert_eq!(
            RelayConfig::new("https://api.example.com", "  ").validate(),
            Err(ConfigError::EmptyCallerToken)
        );
        assert_eq!(
            valid().with_default_model("").validate(),
            Err(ConfigError::EmptyDefaultModel)
        );
        assert_eq!(
            valid().with_heartbeat_interval(Duration::ZERO).validate(),
            Err(ConfigError::ZeroDuration("Heartbeat interval"))
        );
        assert_eq!(
            valid().with_max_body_bytes(0).validate(),
            Err(ConfigError::ZeroBodyLimit)
        );
    }
}
