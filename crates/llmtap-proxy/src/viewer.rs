//! The viewer server: static assets plus the `/_local` data endpoint the
//! front-end uses to load trace files. Raw capture logs are cooked on the
//! fly; already-cooked bundles are returned verbatim.

use anyhow::{anyhow, bail, Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower_http::services::ServeDir;

pub const APP_NAME: &str = "llmtap";
const MAX_PORT_ATTEMPTS: u16 = 10;

pub struct ViewerState {
    root: PathBuf,
    trace: PathBuf,
}

impl ViewerState {
    /// Resolve the server root (the working directory) and the launched
    /// trace file. The trace may live outside the root; everything else
    /// served through `/_local` must stay inside it.
    pub fn new(root: &Path, trace: &Path) -> Result<Self> {
        Ok(Self {
            root: root
                .canonicalize()
                .with_context(|| format!("resolve server root {}", root.display()))?,
            trace: trace
                .canonicalize()
                .with_context(|| format!("trace file not found: {}", trace.display()))?,
        })
    }
}

pub fn viewer_router(state: Arc<ViewerState>, assets: Option<PathBuf>) -> Router {
    let app = Router::new()
        .route("/_info", get(info))
        .route("/_local", get(local));
    let app = match assets {
        Some(dir) => app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true)),
        None => app.fallback(no_assets),
    };
    app.with_state(state)
}

pub async fn run_viewer(
    trace: &Path,
    port: u16,
    assets: Option<PathBuf>,
) -> Result<()> {
    let root = std::env::current_dir().context("resolve working directory")?;
    let state = Arc::new(ViewerState::new(&root, trace)?);
    let trace_display = state.trace.display().to_string();
    let app = viewer_router(state, assets);

    for offset in 0..MAX_PORT_ATTEMPTS {
        let candidate = port + offset;
        let addr = SocketAddr::from(([127, 0, 0, 1], candidate));
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                println!("llmtap viewer at http://{}", addr);
                println!("open http://{}/?local={}", addr, trace_display);
                return axum::serve(listener, app.clone())
                    .with_graceful_shutdown(shutdown_signal())
                    .await
                    .context("viewer server");
            }
            Err(err) if err.kind() == ErrorKind::AddrInUse => {
                if offset == 0 {
                    if let Some(version) = existing_viewer_version(candidate).await {
                        if version == env!("CARGO_PKG_VERSION") {
                            println!("reusing viewer at http://{}", addr);
                            println!("open http://{}/?local={}", addr, trace_display);
                            return Ok(());
                        }
                        println!(
                            "port {} is in use by {} v{} (current: v{})",
                            candidate,
                            APP_NAME,
                            version,
                            env!("CARGO_PKG_VERSION")
                        );
                    } else {
                        println!("port {} is in use by another service", candidate);
                    }
                }
            }
            Err(err) => return Err(anyhow!("failed to bind {}: {}", addr, err)),
        }
    }
    bail!(
        "no available port in range {}-{}",
        port,
        port + MAX_PORT_ATTEMPTS - 1
    )
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Probe `/_info` on a busy port; returns the version when another llmtap
/// viewer answers.
async fn existing_viewer_version(port: u16) -> Option<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .ok()?;
    let info: serde_json::Value = client
        .get(format!("http://127.0.0.1:{}/_info", port))
        .send()
        .await
        .ok()?
        .json()
        .await
        .ok()?;
    if info.get("name").and_then(serde_json::Value::as_str) == Some(APP_NAME) {
        info.get("version")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    } else {
        None
    }
}

async fn info() -> Json<serde_json::Value> {
    Json(json!({
        "name": APP_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Deserialize)]
struct LocalQuery {
    path: Option<String>,
}

async fn local(State(state): State<Arc<ViewerState>>, Query(query): Query<LocalQuery>) -> Response {
    let Some(path) = query.path else {
        return error_response(StatusCode::BAD_REQUEST, "missing 'path' parameter");
    };

    let requested = Path::new(&path);
    let candidate = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        state.root.join(requested)
    };

    if !candidate.exists() {
        return error_response(StatusCode::NOT_FOUND, format!("file not found: {}", path));
    }
    let canonical = match candidate.canonicalize() {
        Ok(canonical) => canonical,
        Err(err) => {
            return error_response(StatusCode::NOT_FOUND, format!("cannot resolve {}: {}", path, err));
        }
    };
    // Only the launched trace may live outside the server root
    if !canonical.starts_with(&state.root) && canonical != state.trace {
        return error_response(StatusCode::BAD_REQUEST, "path escapes server root");
    }

    match llmtap_engine::load_or_cook(&canonical) {
        Ok(value) => Json(value).into_response(),
        Err(llmtap_engine::Error::Json(err)) => {
            error_response(StatusCode::BAD_REQUEST, format!("invalid JSON: {}", err))
        }
        Err(err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to load trace: {}", err),
        ),
    }
}

async fn no_assets() -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        "viewer assets not bundled; trace data is served at /_local?path=<file>",
    )
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}
