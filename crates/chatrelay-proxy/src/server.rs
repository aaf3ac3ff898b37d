//! Axum HTTP server for the relay.
//!
//! This module provides the `serve()` function that runs the relay
//! using a pre-bound `TcpListener`.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Router, middleware};
use chatrelay_core::RelayConfig;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::require_caller;
use crate::handlers;
use crate::state::ProxyState;

/// Build the relay router.
///
/// `/health` is open; every other route requires the caller identity header.
pub fn create_router(state: ProxyState) -> Router {
    let auth_layer = middleware::from_fn_with_state(state.clone(), require_caller);

    let relayed = Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/rpc", post(handlers::rpc))
        .route_layer(auth_layer)
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(relayed)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the relay with a pre-bound listener.
///
/// Runs until `shutdown` is cancelled. In-flight requests are allowed to
/// finish before this returns.
///
/// # Returns
///
/// Returns `Ok(())` on clean shutdown, or an error if the configuration is
/// invalid or the server fails.
pub async fn serve(
    listener: TcpListener,
    config: Arc<RelayConfig>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    config.validate()?;
    let addr = listener.local_addr()?;
    let state = ProxyState::new(Arc::clone(&config))?;
    let app = create_router(state);

    info!(
        %addr,
        upstream = %config.upstream_url,
        rpc_forwarding = config.rpc_url.is_some(),
        default_model = %config.default_model,
        "Relay listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("Relay shut down");
    Ok(())
}
