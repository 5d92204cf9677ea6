//! Long-lived HTTP query service over the persisted index.
//!
//! The server never writes the index file. It serves requests from an immutable
//! [`Snapshot`](snapshot::Snapshot); `POST /reload` loads a fresh one off the
//! async runtime and swaps it in.

pub mod handlers;
pub mod snapshot;

use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::FutureExt;
use serde::Serialize;
use tracing::{Instrument, error, info, info_span, warn};

use crate::error::IndexError;
use crate::vector::{DEFAULT_ANN_TIMEOUT_MS, GatewayConfig, VectorGateway};
use handlers::ApiError;
use snapshot::{SnapshotHandle, SnapshotSource};

pub const DEFAULT_PORT: u16 = 3001;
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest caller-supplied request id that is echoed back verbatim.
const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub index_path: PathBuf,
    pub vectors_path: PathBuf,
    pub ann_url: Option<String>,
    pub ann_timeout: Duration,
}

impl ServerConfig {
    pub fn new(index_path: PathBuf, vectors_path: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            index_path,
            vectors_path,
            ann_url: None,
            ann_timeout: Duration::from_millis(DEFAULT_ANN_TIMEOUT_MS),
        }
    }

    fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            ann_url: self.ann_url.clone().filter(|u| !u.trim().is_empty()),
            timeout: self.ann_timeout,
        }
    }

    fn source(&self) -> SnapshotSource {
        SnapshotSource { index_path: self.index_path.clone(), vectors_path: self.vectors_path.clone() }
    }
}

/// The id attached to every request, honored from `x-request-id` or generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Server-wide request counters.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    pub total: AtomicU64,
    pub search_requests: AtomicU64,
    pub reloads: AtomicU64,
    pub reload_failures: AtomicU64,
    pub panics: AtomicU64,
    next_id: AtomicU64,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetricsSnapshot {
    pub total: u64,
    pub search: u64,
    pub reloads: u64,
    pub reload_failures: u64,
    pub panics: u64,
}

impl RequestMetrics {
    pub fn snapshot(&self) -> RequestMetricsSnapshot {
        RequestMetricsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            search: self.search_requests.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
            reload_failures: self.reload_failures.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
        }
    }

    fn generate_id(&self) -> String {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("req-{:x}-{:06x}", chrono::Utc::now().timestamp_millis(), seq)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub snapshot: SnapshotHandle,
    pub source: SnapshotSource,
    pub gateway: Arc<VectorGateway>,
    pub metrics: Arc<RequestMetrics>,
    pub started: Instant,
}

impl AppState {
    pub fn new(config: &ServerConfig, snapshot: SnapshotHandle) -> Result<Self, IndexError> {
        let gateway = VectorGateway::new(config.gateway_config())
            .map_err(|e| IndexError::InvalidArgs(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            snapshot,
            source: config.source(),
            gateway: Arc::new(gateway),
            metrics: Arc::new(RequestMetrics::default()),
            started: Instant::now(),
        })
    }
}

// ─── Middleware ──────────────────────────────────────────────────────

fn incoming_request_id(req: &Request) -> Option<String> {
    let raw = req.headers().get(REQUEST_ID_HEADER)?.to_str().ok()?.trim();
    (!raw.is_empty() && raw.len() <= MAX_REQUEST_ID_LEN).then(|| raw.to_string())
}

/// Assign the request id, run the request inside its span, turn panics into 500s
/// and echo the id on every response.
async fn request_context(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    state.metrics.total.fetch_add(1, Ordering::Relaxed);
    let id = incoming_request_id(&req).unwrap_or_else(|| state.metrics.generate_id());
    req.extensions_mut().insert(RequestId(id.clone()));

    let span = info_span!("request", request_id = %id, method = %req.method(), path = %req.uri().path());
    let outcome = AssertUnwindSafe(next.run(req)).catch_unwind().instrument(span).await;

    let mut response = match outcome {
        Ok(response) => response,
        Err(panic) => {
            state.metrics.panics.fetch_add(1, Ordering::Relaxed);
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(request_id = %id, panic = %message, "request handler panicked");
            ApiError::Internal("internal error".to_string())
                .for_request(&RequestId(id.clone()))
                .into_response()
        }
    };

    match HeaderValue::from_str(&id) {
        Ok(value) => {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        Err(e) => warn!(request_id = %id, error = %e, "request id is not a valid header value"),
    }
    response
}

// ─── Router ──────────────────────────────────────────────────────────

/// Routes without middleware or state.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/search", get(handlers::search))
        .route("/vector-search", get(handlers::vector_search))
        .route("/reload", post(handlers::reload))
        .fallback(handlers::not_found)
}

/// Wrap `routes` with the request-context middleware and bind the state.
pub fn with_middleware(routes: Router<AppState>, state: AppState) -> Router {
    routes
        .layer(middleware::from_fn_with_state(state.clone(), request_context))
        .with_state(state)
}

pub fn router(state: AppState) -> Router {
    with_middleware(api_routes(), state)
}

// ─── Serve ───────────────────────────────────────────────────────────

/// Load the initial snapshot (a missing index is not fatal), bind and serve
/// until `shutdown` resolves.
pub async fn serve<F>(config: ServerConfig, shutdown: F) -> Result<(), IndexError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let source = config.source();
    let initial = match tokio::task::spawn_blocking(move || source.load()).await {
        Ok(Ok(snapshot)) => {
            info!(files = snapshot.index.len(), vectors = snapshot.vectors.len(), "index snapshot loaded");
            Some(snapshot)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "starting without an index; /search returns 503 until POST /reload succeeds");
            None
        }
        Err(e) => {
            warn!(error = %e, "initial snapshot load task failed");
            None
        }
    };

    let state = AppState::new(&config, SnapshotHandle::new(initial))?;
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| IndexError::InvalidArgs(format!("invalid bind address: {}", e)))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, ann = config.ann_url.is_some(), "index server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    info!("index server stopped");
    Ok(())
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
