//! Shared helpers for chatrelay-proxy integration tests.

#![allow(dead_code)]

pub mod mock_upstream;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use chatrelay_core::RelayConfig;
use chatrelay_proxy::{ProxyState, create_router};
use http_body_util::BodyExt;
use serde_json::Value;

pub const CALLER_HEADER: &str = "x-caller-id";
pub const CALLER_TOKEN: &str = "test-caller";
pub const TEST_MODEL: &str = "relay-test-model";

/// Config pointing at `upstream_url` with test defaults.
pub fn test_config(upstream_url: impl Into<String>) -> RelayConfig {
    RelayConfig::new(upstream_url, CALLER_TOKEN)
        .with_default_model(TEST_MODEL)
        .with_upstream_timeout(Duration::from_secs(5))
        .with_heartbeat_interval(Duration::from_secs(30))
}

pub fn test_state(config: RelayConfig) -> ProxyState {
    ProxyState::new(Arc::new(config)).expect("build proxy state")
}

pub fn test_router(config: RelayConfig) -> Router {
    create_router(test_state(config))
}

/// Authenticated JSON POST.
pub fn post_json(path: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .header(CALLER_HEADER, CALLER_TOKEN)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

/// Poll `condition` until it holds, failing after two seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
