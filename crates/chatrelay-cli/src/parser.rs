//! Command-line and environment configuration.
//!
//! Every option can also come from a `CHATRELAY_*` environment variable
//! (or a `.env` file loaded before parsing). Flags win over the environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use chatrelay_core::RelayConfig;
use chatrelay_core::config::{
    DEFAULT_CALLER_HEADER, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_LISTEN_PORT,
    DEFAULT_MAX_BODY_BYTES, DEFAULT_MODEL, DEFAULT_UPSTREAM_TIMEOUT,
};
use clap::Parser;

/// Single-endpoint chat-completion relay.
#[derive(Debug, Parser)]
#[command(name = "chatrelay")]
#[command(about = "Relay chat completions to an upstream provider")]
#[command(version)]
pub struct Cli {
    /// Upstream chat-completions URL
    #[arg(long, env = "CHATRELAY_UPSTREAM_URL")]
    pub upstream_url: String,

    /// Upstream JSON-RPC URL; `/v1/rpc` answers 501 when unset
    #[arg(long, env = "CHATRELAY_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Bearer credential sent upstream
    #[arg(long, env = "CHATRELAY_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model used when the caller names none
    #[arg(long, env = "CHATRELAY_DEFAULT_MODEL", default_value = DEFAULT_MODEL)]
    pub default_model: String,

    /// Address to listen on
    #[arg(long, env = "CHATRELAY_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "CHATRELAY_PORT", default_value_t = DEFAULT_LISTEN_PORT)]
    pub port: u16,

    /// Header carrying the caller identity
    #[arg(long, env = "CHATRELAY_CALLER_HEADER", default_value = DEFAULT_CALLER_HEADER)]
    pub caller_header: String,

    /// Expected caller identity value
    #[arg(long, env = "CHATRELAY_CALLER_TOKEN", hide_env_values = true)]
    pub caller_token: String,

    /// Upstream timeout in seconds
    #[arg(long, env = "CHATRELAY_TIMEOUT_SECS", default_value_t = DEFAULT_UPSTREAM_TIMEOUT.as_secs())]
    pub timeout_secs: u64,

    /// Heartbeat interval for relayed streams, in seconds
    #[arg(long, env = "CHATRELAY_HEARTBEAT_SECS", default_value_t = DEFAULT_HEARTBEAT_INTERVAL.as_secs())]
    pub heartbeat_secs: u64,

    /// Largest accepted request body, in bytes
    #[arg(long, env = "CHATRELAY_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Cli {
    /// Build the relay configuration. Call [`RelayConfig::validate`] on the result.
    pub fn into_config(self) -> RelayConfig {
        let mut config = RelayConfig::new(self.upstream_url, self.caller_token)
            .with_default_model(self.default_model)
            .with_listen_addr(SocketAddr::new(self.host, self.port))
            .with_caller_header(self.caller_header)
            .with_upstream_timeout(Duration::from_secs(self.timeout_secs))
            .with_heartbeat_interval(Duration::from_secs(self.heartbeat_secs))
            .with_max_body_bytes(self.max_body_bytes);

        if let Some(url) = self.rpc_url {
            config = config.with_rpc_url(url);
        }
        if let Some(key) = self.api_key {
            config = config.with_api_key(key);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const REQUIRED: [&str; 5] = [
        "chatrelay",
        "--upstream-url",
        "http://upstream.test/v1/chat/completions",
        "--caller-token",
        "secret",
    ];

    #[test]
    fn test_cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let config = Cli::parse_from(REQUIRED).into_config();

        assert_eq!(config.default_model, DEFAULT_MODEL);
        assert_eq!(config.caller_header, DEFAULT_CALLER_HEADER);
        assert_eq!(config.listen_addr.port(), DEFAULT_LISTEN_PORT);
        assert!(config.listen_addr.ip().is_loopback());
        assert_eq!(config.upstream_timeout, DEFAULT_UPSTREAM_TIMEOUT);
        assert_eq!(config.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
        assert_eq!(config.rpc_url, None);
        assert_eq!(config.api_key, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let args = REQUIRED.into_iter().chain([
            "--rpc-url",
            "http://upstream.test/rpc",
            "--api-key",
            "sk-test",
            "--host",
            "0.0.0.0",
            "-p",
            "9000",
            "--caller-header",
            "X-Team",
            "--timeout-secs",
            "5",
            "--heartbeat-secs",
            "2",
            "-v",
        ]);
        let cli = Cli::parse_from(args);
        assert!(cli.verbose);

        let config = cli.into_config();
        assert_eq!(config.rpc_url.as_deref(), Some("http://upstream.test/rpc"));
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.listen_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.caller_header, "x-team");
        assert_eq!(config.upstream_timeout, Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_caller_header_with_space_fails_validation() {
        let args = REQUIRED.into_iter().chain(["--caller-header", "x caller"]);
        let config = Cli::parse_from(args).into_config();
        assert!(matches!(
            config.validate(),
            Err(chatrelay_core::ConfigError::InvalidCallerHeader(_))
        ));
    }

        #[test]
    fn test_zero_timeout_fails_validation() {
        let args = REQUIRED.into_iter().chain(["--timeout-secs", "0"]);
        let config = Cli::parse_from(args).into_config();
        assert!(config.validate().is_err());
    }
}
