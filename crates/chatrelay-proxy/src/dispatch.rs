//! Upstream dispatcher.
//!
//! Issues exactly one outbound call per request. The call races a timeout
//! and the caller's cancellation token; whichever finishes first wins and
//! the losing futures are dropped, which aborts the in-flight reqwest call.
//!
//! A non-success upstream status is NOT an error here: it comes back as
//! [`UpstreamResult::Status`] so the caller sees the same status code.

use std::future::Future;
use std::time::Duration;

use chatrelay_core::{ChatPayload, RelayConfig, RelayError, RpcRequest, UpstreamBody};
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How the upstream answer should be consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Read one JSON document.
    Document,
    /// Hand back the open event stream.
    Stream,
}

impl DispatchMode {
    /// Mode matching the caller's (already normalized) streaming flag.
    pub const fn for_payload(payload: &ChatPayload) -> Self {
        if payload.stream {
            Self::Stream
        } else {
            Self::Document
        }
    }

    const fn accept(self) -> &'static str {
        match self {
            Self::Document => "application/json",
            Self::Stream => "text/event-stream",
        }
    }
}

/// Outcome of a dispatched call that reached upstream.
#[derive(Debug)]
pub enum UpstreamResult {
    /// Success status with a fully read body.
    Document(UpstreamBody),
    /// Success status; the body is an open event stream.
    Stream(reqwest::Response),
    /// Non-success status with whatever body upstream sent.
    Status { status: u16, body: UpstreamBody },
}

/// Send a normalized chat payload upstream.
pub async fn dispatch(
    client: &Client,
    config: &RelayConfig,
    payload: &ChatPayload,
    mode: DispatchMode,
    cancel: &CancellationToken,
) -> Result<UpstreamResult, RelayError> {
    debug!(
        upstream = %config.upstream_url,
        model = %payload.model,
        ?mode,
        "Dispatching chat completion upstream"
    );

    let request = authorized(client.post(&config.upstream_url), config)
        .header(ACCEPT, mode.accept())
        .json(payload);

    let call = async move {
        let response = request.send().await.map_err(RelayError::transport)?;
        let status = response.status();

        if !status.is_success() {
            let body = read_body(response).await?;
            debug!(status = status.as_u16(), "Upstream returned non-success status");
            return Ok(UpstreamResult::Status {
                status: status.as_u16(),
                body,
            });
        }

        match mode {
            DispatchMode::Stream => Ok(UpstreamResult::Stream(response)),
            DispatchMode::Document => Ok(UpstreamResult::Document(read_body(response).await?)),
        }
    };

    bounded(call, config.upstream_timeout, cancel).await
}

/// Forward an RPC request to the configured RPC endpoint.
///
/// Returns the upstream status and body untouched, whatever the status.
pub async fn forward_rpc(
    client: &Client,
    config: &RelayConfig,
    rpc_url: &str,
    rpc: &RpcRequest,
    cancel: &CancellationToken,
) -> Result<(u16, UpstreamBody), RelayError> {
    debug!(upstream = %rpc_url, method = %rpc.method, "Forwarding RPC request");

    let request = authorized(client.post(rpc_url), config)
        .header(ACCEPT, DispatchMode::Document.accept())
        .json(rpc);

    let call = async move {
        let response = request.send().await.map_err(RelayError::transport)?;
        let status = response.status().as_u16();
        Ok((status, read_body(response).await?))
    };

    bounded(call, config.upstream_timeout, cancel).await
}

fn authorized(builder: RequestBuilder, config: &RelayConfig) -> RequestBuilder {
    match &config.api_key {
        Some(key) => builder.bearer_auth(key),
        None => builder,
    }
}

async fn read_body(response: reqwest::Response) -> Result<UpstreamBody, RelayError> {
    let text = response.text().await.map_err(RelayError::transport)?;
    Ok(UpstreamBody::parse(text))
}

/// Race `call` against the timeout and the caller's cancellation.
async fn bounded<T, F>(
    call: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T, RelayError>
where
    F: Future<Output = Result<T, RelayError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            debug!("Upstream call aborted by caller disconnect");
            Err(RelayError::cancelled())
        }
        () = tokio::time::sleep(timeout) => {
            warn!(timeout_ms = timeout.as_millis(), "Upstream call timed out");
            Err(RelayError::Timeout(timeout))
        }
        result = call => result,
    }
}
