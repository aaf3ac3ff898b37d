//! Mock upstream provider for relay integration tests.
//!
//! Binds `127.0.0.1:0`, answers every path with one canned [`Reply`] and
//! records each request it receives so tests can assert on hit counts.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use futures_util::{StreamExt, stream};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What the mock answers with.
#[derive(Debug, Clone)]
pub enum Reply {
    Json { status: u16, body: Value },
    Text { status: u16, body: String },
    /// SSE body. The first frame is sent immediately, later ones after `delay`.
    Stream {
        frames: Vec<&'static str>,
        delay: Duration,
    },
    /// Never answers. Counted in [`MockUpstream::released`] once the
    /// handler is dropped, which happens when the client hangs up.
    Hang,
}

/// One request as seen by the mock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub authorization: Option<String>,
    pub accept: Option<String>,
    pub body: Value,
}

#[derive(Clone)]
struct MockState {
    reply: Arc<Reply>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    released: Arc<AtomicUsize>,
}

pub struct MockUpstream {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    released: Arc<AtomicUsize>,
    server: JoinHandle<()>,
}

/// Bumps the counter when a hanging handler goes away.
struct ReleaseGuard(Arc<AtomicUsize>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl MockUpstream {
    pub async fn start(reply: Reply) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let released = Arc::new(AtomicUsize::new(0));
        let state = MockState {
            reply: Arc::new(reply),
            requests: Arc::clone(&requests),
            released: Arc::clone(&released),
        };
        let app = Router::new().fallback(respond).with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock upstream");
        let addr = listener.local_addr().expect("mock upstream address");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            requests,
            released,
            server,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn chat_url(&self) -> String {
        self.url("/v1/chat/completions")
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// How many `Reply::Hang` handlers have been dropped.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn respond(
    State(state): State<MockState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_text = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.requests.lock().unwrap().push(RecordedRequest {
        path: uri.path().to_string(),
        authorization: header_text(header::AUTHORIZATION),
        accept: header_text(header::ACCEPT),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });

    match &*state.reply {
        Reply::Json { status, body } => {
            (status_code(*status), axum::Json(body.clone())).into_response()
        }
        Reply::Text { status, body } => (status_code(*status), body.clone()).into_response(),
        Reply::Stream { frames, delay } => {
            let delay = *delay;
            let frames = stream::iter(frames.clone().into_iter().enumerate()).then(
                move |(i, frame)| async move {
                    if i > 0 {
                        tokio::time::sleep(delay).await;
                    }
                    Ok::<_, Infallible>(Bytes::from_static(frame.as_bytes()))
                },
            );
            Response::builder()
                .header(header::CONTENT_TYPE, "text/event-stream")
                .body(Body::from_stream(frames))
                .unwrap()
        }
        Reply::Hang => {
            let _guard = ReleaseGuard(Arc::clone(&state.released));
            tokio::time::sleep(Duration::from_secs(3600)).await;
            StatusCode::OK.into_response()
        }
    }
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap()
}

/// Raw TCP upstream that opens an SSE response, writes `partial`, then drops
/// the connection before the promised content length is reached.
pub struct TruncatedStream {
    addr: SocketAddr,
    server: JoinHandle<()>,
}

impl TruncatedStream {
    pub async fn start(partial: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind truncated upstream");
        let addr = listener.local_addr().expect("truncated upstream address");
        let server = tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            read_request(&mut socket).await;

            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\n\r\n",
                partial.len() + 1024
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(partial.as_bytes()).await;
            let _ = socket.flush().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
        });

        Self { addr, server }
    }

    pub fn chat_url(&self) -> String {
        format!("http://{}/v1/chat/completions", self.addr)
    }
}

impl Drop for TruncatedStream {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Consume one request head and its `content-length` body.
async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let text = String::from_utf8_lossy(&buf);
        if let Some(head_end) = text.find("\r\n\r\n") {
            let body_len = text[..head_end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + body_len {
                return;
            }
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}
