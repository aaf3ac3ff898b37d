//! CLI entry point - the composition root.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use chatrelay_cli::{Cli, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before parsing so it can supply CHATRELAY_* values
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.into_config();
    config.validate().context("invalid relay configuration")?;

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                signal.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    chatrelay_proxy::serve(listener, Arc::new(config), shutdown).await
}
