//! Streaming relay.
//!
//! One relay task per stream-mode request, moving through
//! `Opening -> Relaying -> Draining -> Closed`:
//!
//! - **Opening**: response headers go out as soon as the handler returns,
//!   followed by a `: connected` comment, before upstream has answered.
//! - **Relaying**: upstream bytes are copied to the caller untouched. A
//!   heartbeat comment is injected on a fixed interval, but only at an
//!   event boundary so it never splits an upstream event. If an event
//!   stalls for a whole interval at the end of a line, a bare comment line
//!   is written instead; SSE parsers skip it without ending the event.
//! - **Draining**: upstream finished; the `event: end` frame is written.
//! - **Closed**: heartbeat released, caller channel dropped.
//!
//! All frames flow through one task and one channel, so writes are
//! serialized per frame. The caller side of the channel holds a drop guard
//! on the request's [`CancellationToken`]: when the caller goes away the
//! token fires, the dispatcher aborts the upstream call, and the relay goes
//! straight to Closed without writing a terminal frame.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chatrelay_core::{ChatPayload, RelayError};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::dispatch::{DispatchMode, UpstreamResult, dispatch};
use crate::heartbeat::Heartbeat;
use crate::state::ProxyState;

/// First frame on every relayed stream.
pub const CONNECTED_FRAME: &[u8] = b": connected\n\n";

/// Keep-alive comment frame.
pub const PING_FRAME: &[u8] = b": ping\n\n";

/// Keep-alive comment line for an event that has stalled between lines.
/// Carries no blank line, so the caller's parser keeps the event open.
pub const PING_LINE: &[u8] = b": ping\n";

/// Terminal frame marking explicit completion.
pub const END_FRAME: &[u8] = b"event: end\ndata: [DONE]\n\n";

/// Blank line closing a partially relayed event.
const EVENT_TERMINATOR: &[u8] = b"\n\n";

/// Frames buffered between the relay task and the caller connection.
const RELAY_BUFFER: usize = 32;

/// Lifecycle of one relayed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Opening,
    Relaying,
    Draining,
    Closed,
}

/// What a finished relay did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Non-empty upstream chunks copied to the caller.
    pub upstream_chunks: u64,
    /// Ping frames written.
    pub heartbeats: u64,
    pub error_frame_sent: bool,
    pub terminal_frame_sent: bool,
    /// The caller went away before the relay finished.
    pub caller_disconnected: bool,
}

/// Frame stream handed to the caller connection.
///
/// Dropping it (caller disconnect, or normal end of the response body)
/// fires the request's cancellation token.
pub struct CallerStream {
    frames: ReceiverStream<Bytes>,
    _disconnect: DropGuard,
}

impl Stream for CallerStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames.poll_next_unpin(cx).map(|frame| frame.map(Ok))
    }
}

/// Spawn the relay task for a stream-mode request.
///
/// Returns the caller-side frame stream and a handle resolving to the
/// relay's outcome once it reaches Closed.
pub fn start(
    state: &ProxyState,
    payload: ChatPayload,
    cancel: CancellationToken,
) -> (CallerStream, JoinHandle<RelayOutcome>) {
    let (tx, rx) = mpsc::channel(RELAY_BUFFER);

    let stream = CallerStream {
        frames: ReceiverStream::new(rx),
        _disconnect: cancel.clone().drop_guard(),
    };

    let relay = Relay {
        tx: Some(tx),
        cancel,
        state: RelayState::Opening,
        boundary: FrameBoundary::default(),
        ping_pending: false,
        outcome: RelayOutcome::default(),
    };
    let handle = tokio::spawn(relay.run(state.clone(), payload));

    (stream, handle)
}

/// Wrap a caller stream in an SSE response with buffering disabled.
pub fn sse_response(stream: CallerStream) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache, no-transform")
        .header(header::CONNECTION, "keep-alive")
        .header("x-accel-buffering", "no") // Disable nginx buffering
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// In-band error frame carrying the mapped error envelope.
pub fn error_frame(err: &RelayError) -> Bytes {
    let envelope = err.normalize().envelope();
    let data = serde_json::to_string(&envelope)
        .unwrap_or_else(|_| r#"{"error":"internal_failure"}"#.to_string());
    Bytes::from(format!("event: error\ndata: {data}\n\n"))
}

struct Relay {
    tx: Option<mpsc::Sender<Bytes>>,
    cancel: CancellationToken,
    state: RelayState,
    boundary: FrameBoundary,
    ping_pending: bool,
    outcome: RelayOutcome,
}

impl Relay {
    async fn run(mut self, state: ProxyState, payload: ChatPayload) -> RelayOutcome {
        let mut heartbeat = Heartbeat::start(state.config.heartbeat_interval, &state.streams);
        let cancel = self.cancel.clone();
        info!(model = %payload.model, "Opening relayed stream");

        if !self.emit(Bytes::from_static(CONNECTED_FRAME)).await {
            return self.close(heartbeat);
        }

        let opened = {
            let upstream = dispatch(
                &state.client,
                &state.config,
                &payload,
                DispatchMode::Stream,
                &cancel,
            );
            tokio::pin!(upstream);

            loop {
                tokio::select! {
                    biased;
                    result = &mut upstream => break result,
                    () = heartbeat.tick() => {
                        if !self.emit_heartbeat().await {
                            return self.close(heartbeat);
                        }
                    }
                }
            }
        };

        let response = match opened {
            Ok(UpstreamResult::Stream(response)) => response,
            Ok(UpstreamResult::Status { status, body }) => {
                return self
                    .fail(RelayError::UpstreamStatus { status, body }, heartbeat)
                    .await;
            }
            Ok(UpstreamResult::Document(body)) => {
                let err = RelayError::Internal {
                    status: 502,
                    message: "upstream answered a stream request with a document".to_string(),
                    details: body.to_value(),
                };
                return self.fail(err, heartbeat).await;
            }
            Err(err) => return self.fail(err, heartbeat).await,
        };

        self.transition(RelayState::Relaying);
        let mut upstream = response.bytes_stream().boxed();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return self.close(heartbeat),
                chunk = upstream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        if !self.relay_chunk(bytes).await {
                            return self.close(heartbeat);
                        }
                    }
                    Some(Err(err)) => {
                        return self.fail(RelayError::transport(err), heartbeat).await;
                    }
                    None => break,
                },
                () = heartbeat.tick() => {
                    if !self.emit_heartbeat().await {
                        return self.close(heartbeat);
                    }
                }
            }
        }

        self.transition(RelayState::Draining);
        self.terminate_partial_event().await;
        if self.emit(Bytes::from_static(END_FRAME)).await {
            self.outcome.terminal_frame_sent = true;
        }
        self.close(heartbeat)
    }

    /// Write one error frame and the terminal frame, then close.
    ///
    /// Skipped entirely when the caller is already gone.
    async fn fail(mut self, err: RelayError, heartbeat: Heartbeat) -> RelayOutcome {
        if self.cancel.is_cancelled() {
            return self.close(heartbeat);
        }

        warn!(
            category = err.category().as_str(),
            state = ?self.state,
            "Relayed stream failed: {err}"
        );

        self.transition(RelayState::Draining);
        self.terminate_partial_event().await;
        if self.emit(error_frame(&err)).await {
            self.outcome.error_frame_sent = true;
            if self.emit(Bytes::from_static(END_FRAME)).await {
                self.outcome.terminal_frame_sent = true;
            }
        }
        self.close(heartbeat)
    }

    fn close(mut self, heartbeat: Heartbeat) -> RelayOutcome {
        drop(heartbeat);
        self.outcome.caller_disconnected = self.cancel.is_cancelled();
        self.close_caller();
        self.transition(RelayState::Closed);

        info!(
            chunks = self.outcome.upstream_chunks,
            heartbeats = self.outcome.heartbeats,
            completed = self.outcome.terminal_frame_sent,
            caller_disconnected = self.outcome.caller_disconnected,
            "Relayed stream closed"
        );
        self.outcome
    }

    /// Drop the caller side of the channel. Safe to call repeatedly.
    fn close_caller(&mut self) {
        if self.tx.take().is_some() {
            debug!("Caller stream released");
        }
    }

    fn transition(&mut self, next: RelayState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Relay state change");
            self.state = next;
        }
    }

    async fn relay_chunk(&mut self, chunk: Bytes) -> bool {
        if chunk.is_empty() {
            return true;
        }
        self.boundary.observe(&chunk);
        self.outcome.upstream_chunks += 1;

        if !self.emit(chunk).await {
            return false;
        }
        if self.ping_pending && self.boundary.at_boundary() {
            return self.emit_heartbeat().await;
        }
        true
    }

    /// Write a ping now, or defer it if an upstream event is half written.
    ///
    /// A ping deferred for a whole interval goes out as a comment line if
    /// upstream stalled at the end of a line. A stall mid-line gets nothing.
    async fn emit_heartbeat(&mut self) -> bool {
        let frame = if self.boundary.at_boundary() {
            PING_FRAME
        } else if self.ping_pending && self.boundary.at_line_start() {
            PING_LINE
        } else {
            self.ping_pending = true;
            return true;
        };

        self.ping_pending = false;
        self.boundary.observe(frame);
        self.outcome.heartbeats += 1;
        self.emit(Bytes::from_static(frame)).await
    }

    async fn terminate_partial_event(&mut self) {
        if !self.boundary.at_boundary() {
            self.boundary.observe(EVENT_TERMINATOR);
            self.emit(Bytes::from_static(EVENT_TERMINATOR)).await;
        }
    }

    /// Send one frame to the caller. `false` means the caller is gone.
    async fn emit(&self, frame: Bytes) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = tx.send(frame) => sent.is_ok(),
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.close_caller();
    }
}

/// Tracks whether the relayed bytes currently end on an SSE event boundary.
#[derive(Debug, Default)]
struct FrameBoundary {
    /// Up to the last four bytes relayed.
    tail: Vec<u8>,
}

impl FrameBoundary {
    const TAIL_LEN: usize = 4;

    fn observe(&mut self, chunk: &[u8]) {
        let start = chunk.len().saturating_sub(Self::TAIL_LEN);
        self.tail.extend_from_slice(&chunk[start..]);
        let excess = self.tail.len().saturating_sub(Self::TAIL_LEN);
        self.tail.drain(..excess);
    }

    /// A comment line can be inserted here without splitting a line.
    fn at_line_start(&self) -> bool {
        self.tail.is_empty() || self.tail.ends_with(b"\n")
    }

    fn at_boundary(&self) -> bool {
        self.tail.is_empty()
            || self.tail.ends_with(b"\n\n")
            || self.tail.ends_with(b"\r\r")
            || self.tail.ends_with(b"\r\n\r\n")
    }
}
