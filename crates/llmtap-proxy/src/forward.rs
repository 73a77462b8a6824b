//! The transparent streaming proxy.
//!
//! Every request is forwarded verbatim to the configured upstream; the
//! response is relayed to the client byte for byte. Whole responses are
//! buffered, captured, and sent; SSE responses are forwarded chunk by chunk
//! as they arrive while a tee copy accumulates for capture. Exactly one
//! capture record is appended per exchange, after the exchange terminates.

use crate::store::CaptureStore;
use anyhow::{anyhow, Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{SecondsFormat, Utc};
use futures::StreamExt;
use llmtap_providers::sse::split_sse_lines;
use llmtap_providers::AdapterRegistry;
use llmtap_types::{CaptureRecord, CapturedRequest, CapturedResponse};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

pub struct ProxyConfig {
    pub port: u16,
    /// Upstream base URL (scheme + host, optionally a base path).
    pub target: String,
    /// Capture log path.
    pub output: PathBuf,
    /// Per-exchange upstream deadline.
    pub timeout: Duration,
    /// Reassemble SSE streams at capture time instead of deferring to cook.
    pub reassemble: bool,
}

pub struct ProxyState {
    client: reqwest::Client,
    target: String,
    timeout: Duration,
    reassemble: bool,
    registry: AdapterRegistry,
    store: CaptureStore,
}

impl ProxyState {
    pub fn new(config: &ProxyConfig) -> Result<Arc<Self>> {
        let store = CaptureStore::open(&config.output)?;
        // Redirects are relayed to the client, not followed
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("build upstream HTTP client")?;
        Ok(Arc::new(Self {
            client,
            target: config.target.trim_end_matches('/').to_string(),
            timeout: config.timeout,
            reassemble: config.reassemble,
            registry: AdapterRegistry::new(),
            store,
        }))
    }

    /// Append a capture record. Store failures are logged, never fatal: the
    /// exchange has already been served and the proxy keeps running.
    async fn capture(&self, record: CaptureRecord) {
        if let Err(err) = self.store.append(&record).await {
            tracing::error!("capture_io: {:#}", err);
        }
    }
}

/// One in-flight exchange, identified and timestamped at request receipt.
struct Exchange {
    id: String,
    timestamp: String,
    request: CapturedRequest,
    started: Instant,
}

impl Exchange {
    fn finish(self, response: Option<CapturedResponse>, error: Option<String>) -> CaptureRecord {
        CaptureRecord {
            id: self.id,
            timestamp: self.timestamp,
            request: self.request,
            response,
            duration_ms: self.started.elapsed().as_millis() as u64,
            error,
        }
    }
}

pub fn router(state: Arc<ProxyState>) -> Router {
    // No route table: everything under the root path is proxied, any method
    Router::new().fallback(forward).with_state(state)
}

pub async fn run_proxy(config: ProxyConfig) -> Result<()> {
    let state = ProxyState::new(&config)?;
    let target = state.target.clone();
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|err| {
        if err.kind() == ErrorKind::AddrInUse {
            anyhow!("failed to bind {}: address already in use", addr)
        } else {
            anyhow!("failed to bind {}: {}", addr, err)
        }
    })?;

    tracing::info!("proxy listening on http://{} -> {}", addr, target);
    tracing::info!("capturing to {}", config.output.display());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("proxy server")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down");
}

async fn forward(State(state): State<Arc<ProxyState>>, req: Request) -> Response {
    let started = Instant::now();
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    // Buffer the request body fully so it can be re-sent and captured
    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return plain_response(
                StatusCode::BAD_REQUEST,
                format!("failed to read request body: {}", err),
            );
        }
    };

    let request_content_type = header_str(&parts.headers, CONTENT_TYPE.as_str());
    let exchange = Exchange {
        id: Uuid::new_v4().to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        request: CapturedRequest {
            url: path_and_query.clone(),
            method: parts.method.to_string(),
            headers: capture_headers(&parts.headers),
            body: body_to_value(request_content_type.as_deref(), &body_bytes),
        },
        started,
    };

    let mut upstream_headers = parts.headers.clone();
    for name in [HOST, CONTENT_LENGTH, TRANSFER_ENCODING, CONNECTION] {
        upstream_headers.remove(&name);
    }

    let url = format!("{}{}", state.target, path_and_query);
    let send = state
        .client
        .request(parts.method.clone(), &url)
        .headers(upstream_headers)
        .body(body_bytes)
        .timeout(state.timeout)
        .send()
        .await;

    let upstream = match send {
        Ok(upstream) => upstream,
        Err(err) => {
            let reason = format!("upstream_connect: {}", err);
            tracing::warn!("{} {}: {}", exchange.request.method, path_and_query, reason);
            state.capture(exchange.finish(None, Some(reason.clone()))).await;
            return plain_response(StatusCode::BAD_GATEWAY, reason);
        }
    };

    let status = upstream.status();
    let headers = upstream.headers().clone();
    let is_sse = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|ct| ct.to_ascii_lowercase().contains("text/event-stream"))
        .unwrap_or(false);

    if is_sse {
        stream_exchange(state, exchange, status, headers, upstream)
    } else {
        whole_exchange(state, exchange, status, headers, upstream).await
    }
}

/// Non-SSE path: await the complete upstream body, relay it, capture it.
async fn whole_exchange(
    state: Arc<ProxyState>,
    exchange: Exchange,
    status: StatusCode,
    headers: HeaderMap,
    upstream: reqwest::Response,
) -> Response {
    match upstream.bytes().await {
        Ok(bytes) => {
            let content_type = header_str(&headers, CONTENT_TYPE.as_str());
            let captured = CapturedResponse::whole(
                status.as_u16(),
                capture_headers(&headers),
                body_to_value(content_type.as_deref(), &bytes),
            );
            state.capture(exchange.finish(Some(captured), None)).await;
            client_response(status, &headers, Body::from(bytes))
        }
        Err(err) => {
            // Nothing was sent to the client yet, so an error status is
            // still possible here.
            let reason = format!("upstream_truncated: {}", err);
            let captured =
                CapturedResponse::whole(status.as_u16(), capture_headers(&headers), Value::Null);
            state
                .capture(exchange.finish(Some(captured), Some(reason.clone())))
                .await;
            plain_response(StatusCode::BAD_GATEWAY, reason)
        }
    }
}

/// SSE path: relay the response head immediately, then forward every chunk
/// as it arrives while teeing a copy into a buffer. The capture record is
/// written after the stream terminates, from the spawned task, so a slow
/// store can never stall the client byte stream.
fn stream_exchange(
    state: Arc<ProxyState>,
    exchange: Exchange,
    status: StatusCode,
    headers: HeaderMap,
    upstream: reqwest::Response,
) -> Response {
    let (tx, rx) = mpsc::channel::<std::result::Result<Bytes, std::io::Error>>(32);
    let captured_headers = capture_headers(&headers);
    let response_status = status.as_u16();
    let task_state = state.clone();

    tokio::spawn(async move {
        let mut stream = upstream.bytes_stream();
        let mut buffered: Vec<u8> = Vec::new();
        let mut error: Option<String> = None;

        loop {
            match stream.next().await {
                Some(Ok(chunk)) => {
                    // Forward first; the tee copy only keeps chunks the
                    // client was actually handed.
                    if tx.send(Ok(chunk.clone())).await.is_err() {
                        // Client went away; dropping the stream cancels the
                        // upstream call.
                        error = Some("client_cancelled".to_string());
                        break;
                    }
                    buffered.extend_from_slice(&chunk);
                }
                Some(Err(err)) => {
                    error = Some(format!("upstream_truncated: {}", err));
                    let _ = tx.send(Err(std::io::Error::other(err))).await;
                    break;
                }
                None => break,
            }
        }
        drop(tx);

        let sse_lines = split_sse_lines(&buffered);
        let captured = if task_state.reassemble {
            match task_state.registry.reassemble_capture(&sse_lines) {
                Ok(body) => CapturedResponse {
                    status: response_status,
                    headers: captured_headers,
                    body,
                    stream: true,
                    sse_lines: Vec::new(),
                },
                Err(err) => {
                    tracing::warn!("eager reassembly failed, storing raw events: {}", err);
                    CapturedResponse::streamed(response_status, captured_headers, sse_lines)
                }
            }
        } else {
            CapturedResponse::streamed(response_status, captured_headers, sse_lines)
        };

        if let Some(reason) = &error {
            tracing::warn!("stream ended early: {}", reason);
        }
        task_state.capture(exchange.finish(Some(captured), error)).await;
    });

    client_response(
        status,
        &headers,
        Body::from_stream(ReceiverStream::new(rx)),
    )
}

/// Relay status and headers, minus message-framing headers the local hyper
/// connection manages itself.
fn client_response(status: StatusCode, upstream_headers: &HeaderMap, body: Body) -> Response {
    let mut builder = Response::builder().status(status);
    for (name, value) in upstream_headers {
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING || name == CONNECTION {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder.body(body).unwrap_or_else(|_| {
        plain_response(StatusCode::INTERNAL_SERVER_ERROR, "response build failed")
    })
}

fn plain_response(status: StatusCode, message: impl Into<String>) -> Response {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(message.into()))
        .unwrap_or_default()
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Request/response headers for capture, minus hop-by-hop headers.
fn capture_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut captured = BTreeMap::new();
    for (name, value) in headers {
        if name == HOST || name == CONTENT_LENGTH || name == TRANSFER_ENCODING || name == CONNECTION
        {
            continue;
        }
        if let Ok(value) = value.to_str() {
            captured.insert(name.as_str().to_string(), value.to_string());
        }
    }
    captured
}

/// Decode a body for capture: JSON bodies are stored decoded, anything else
/// as base64.
fn body_to_value(content_type: Option<&str>, bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    let is_json = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false);
    if is_json {
        if let Ok(value) = serde_json::from_slice(bytes) {
            return value;
        }
    }
    json!({ "base64": BASE64.encode(bytes) })
}
