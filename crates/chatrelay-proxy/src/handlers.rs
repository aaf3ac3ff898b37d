//! Route handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chatrelay_core::payload::JSON_RPC_VERSION;
use chatrelay_core::{
    ChatPayload, Classified, RelayError, RpcRequest, UpstreamBody, classify, normalize_completion,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::{DispatchMode, UpstreamResult, dispatch, forward_rpc};
use crate::error::ApiError;
use crate::relay;
use crate::state::ProxyState;

/// JSON-RPC "method not found", used when RPC forwarding is not configured.
const RPC_METHOD_NOT_FOUND: i64 = -32601;

/// Health check endpoint.
pub(crate) async fn health(State(state): State<ProxyState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "active_streams": state.streams.active(),
    }))
}

/// `POST /v1/chat/completions`.
///
/// Classifies and normalizes the body, then either relays an event stream
/// (when the caller asked for `stream: true`) or returns one normalized
/// completion document.
pub(crate) async fn chat_completions(
    State(state): State<ProxyState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    debug!("POST /v1/chat/completions");

    let payload = match classify(decode_body(body)?) {
        Classified::Chat(candidate) => candidate.normalize(&state.config.default_model),
        Classified::Rpc(rpc) => {
            return Err(RelayError::ProtocolRejected { method: rpc.method }.into());
        }
        Classified::Invalid(reason) => {
            return Err(RelayError::ValidationFailed(reason.to_string()).into());
        }
    };

    info!(
        model = %payload.model,
        stream = payload.stream,
        messages = payload.messages.len(),
        "Relaying chat completion"
    );

    match DispatchMode::for_payload(&payload) {
        DispatchMode::Stream => {
            let (stream, _relay) = relay::start(&state, payload, CancellationToken::new());
            Ok(relay::sse_response(stream))
        }
        DispatchMode::Document => complete_document(&state, &payload).await,
    }
}

async fn complete_document(state: &ProxyState, payload: &ChatPayload) -> Result<Response, ApiError> {
    // Fires if the caller disconnects and this future is dropped mid-call.
    let cancel = CancellationToken::new();
    let _disconnect = cancel.clone().drop_guard();

    let result = dispatch(
        &state.client,
        &state.config,
        payload,
        DispatchMode::Document,
        &cancel,
    )
    .await?;

    match result {
        UpstreamResult::Document(UpstreamBody::Json(doc)) => {
            let completion = normalize_completion(&doc, &state.config.default_model);
            debug!(id = %completion.id, choices = completion.choices.len(), "Completion normalized");
            Ok(Json(completion).into_response())
        }
        UpstreamResult::Document(UpstreamBody::Text(raw)) => Err(RelayError::Internal {
            status: 502,
            message: "upstream returned a completion that is not JSON".to_string(),
            details: json!({
                "message": "upstream returned a completion that is not JSON",
                "raw": raw,
            }),
        }
        .into()),
        UpstreamResult::Status { status, body } => {
            Err(RelayError::UpstreamStatus { status, body }.into())
        }
        UpstreamResult::Stream(_) => {
            Err(RelayError::internal(502, "upstream opened a stream for a document request").into())
        }
    }
}

/// `POST /v1/rpc`: forward a JSON-RPC request to the configured RPC endpoint.
pub(crate) async fn rpc(
    State(state): State<ProxyState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    debug!("POST /v1/rpc");

    let request = match classify(decode_body(body)?) {
        Classified::Rpc(rpc) => rpc,
        Classified::Chat(_) => {
            return Err(RelayError::ValidationFailed(
                "chat payloads must be sent to /v1/chat/completions".to_string(),
            )
            .into());
        }
        Classified::Invalid(reason) => {
            return Err(RelayError::ValidationFailed(reason.to_string()).into());
        }
    };

    let Some(rpc_url) = state.config.rpc_url.as_deref() else {
        warn!(method = %request.method, "RPC request received but no RPC endpoint is configured");
        return Ok(rpc_not_configured(&request));
    };

    let cancel = CancellationToken::new();
    let _disconnect = cancel.clone().drop_guard();
    let (status, body) = forward_rpc(&state.client, &state.config, rpc_url, &request, &cancel).await?;

    info!(method = %request.method, status, "RPC request forwarded");
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    Ok(match body {
        UpstreamBody::Json(value) => (status, Json(value)).into_response(),
        UpstreamBody::Text(text) => (status, text).into_response(),
    })
}

fn rpc_not_configured(request: &RpcRequest) -> Response {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(json!({
            "jsonrpc": JSON_RPC_VERSION,
            "id": request.id,
            "error": {
                "code": RPC_METHOD_NOT_FOUND,
                "message": "RPC forwarding is not configured",
            },
        })),
    )
        .into_response()
}

/// Buffer and decode a request body.
///
/// A body over the size limit surfaces as an internal failure carrying the
/// limit's status (413); anything that is not JSON is a validation failure.
fn decode_body(body: Result<Bytes, BytesRejection>) -> Result<Value, RelayError> {
    let body = body.map_err(|rejection| {
        RelayError::internal(rejection.status().as_u16(), rejection.body_text())
    })?;

    serde_json::from_slice(&body)
        .map_err(|e| RelayError::ValidationFailed(format!("body is not valid JSON: {e}")))
}
