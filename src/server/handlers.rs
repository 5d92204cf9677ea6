//! Route handlers and the JSON error envelope.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::{Extension, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, warn};

use super::snapshot::Snapshot;
use super::{AppState, RequestId};
use crate::query::{self, QueryOptions};
use crate::vector::DEFAULT_TOP;

/// Upper bound on `limit` / `top` accepted from callers.
const MAX_RESULTS: usize = 200;

// ─── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest { field: &'static str, message: String },

    #[error("index not loaded; run `codeindex build` and POST /reload")]
    IndexNotLoaded,

    #[error("no route for {0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::IndexNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn for_request(self, id: &RequestId) -> ApiFailure {
        ApiFailure { error: self, request_id: id.0.clone() }
    }
}

/// An [`ApiError`] bound to the request it failed.
#[derive(Debug)]
pub struct ApiFailure {
    pub error: ApiError,
    pub request_id: String,
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.error.to_string(),
            "requestId": self.request_id,
        });
        if let ApiError::BadRequest { field, .. } = &self.error {
            body["field"] = Value::from(*field);
        }
        (self.error.status(), Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiFailure>;

fn current_snapshot(state: &AppState, id: &RequestId) -> ApiResult<Arc<Snapshot>> {
    state.snapshot.current().ok_or_else(|| ApiError::IndexNotLoaded.for_request(id))
}

fn required_query(params: &HashMap<String, String>, id: &RequestId) -> ApiResult<String> {
    match params.get("q").map(|q| q.trim()) {
        Some(q) if !q.is_empty() => Ok(q.to_string()),
        _ => Err(ApiError::BadRequest { field: "q", message: "query parameter 'q' is required".to_string() }
            .for_request(id)),
    }
}

fn bounded_count(
    params: &HashMap<String, String>,
    field: &'static str,
    default: usize,
    id: &RequestId,
) -> ApiResult<usize> {
    match params.get(field) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<usize>() {
            Ok(n) if (1..=MAX_RESULTS).contains(&n) => Ok(n),
            _ => Err(ApiError::BadRequest {
                field,
                message: format!("'{}' must be an integer between 1 and {}", field, MAX_RESULTS),
            }
            .for_request(id)),
        },
    }
}

// ─── /health ─────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.snapshot.current();
    Json(json!({
        "status": if snapshot.is_some() { "ok" } else { "degraded" },
        "indexLoaded": snapshot.is_some(),
        "files": snapshot.map_or(0, |s| s.index.len()),
    }))
}

// ─── /search ─────────────────────────────────────────────────────────

pub async fn search(
    State(state): State<AppState>,
    Extension(id): Extension<RequestId>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    state.metrics.search_requests.fetch_add(1, Ordering::Relaxed);
    let q = required_query(&params, &id)?;
    let limit = bounded_count(&params, "limit", query::DEFAULT_LIMIT, &id)?;
    let snapshot = current_snapshot(&state, &id)?;

    let opts = QueryOptions {
        limit,
        category: params.get("category").filter(|c| !c.is_empty()).cloned(),
        ..QueryOptions::default()
    };
    let results = query::search(&snapshot.index, &q, &opts);
    Ok(Json(json!({
        "results": results.hits,
        "meta": { "q": q, "total": results.hits.len(), "source": results.source },
    })))
}

// ─── /vector-search ──────────────────────────────────────────────────

pub async fn vector_search(
    State(state): State<AppState>,
    Extension(id): Extension<RequestId>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let q = required_query(&params, &id)?;
    let top = bounded_count(&params, "top", DEFAULT_TOP, &id)?;
    let snapshot = current_snapshot(&state, &id)?;

    let response = state
        .gateway
        .search(&q, top, &snapshot.vectors, Some(&snapshot.index))
        .await;
    serde_json::to_value(response)
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()).for_request(&id))
}

// ─── /reload ─────────────────────────────────────────────────────────

pub async fn reload(State(state): State<AppState>, Extension(id): Extension<RequestId>) -> ApiResult<Json<Value>> {
    let source = state.source.clone();
    let loaded = tokio::task::spawn_blocking(move || source.load())
        .await
        .map_err(|e| ApiError::Internal(format!("reload task failed: {}", e)).for_request(&id))?;

    match loaded {
        Ok(snapshot) => {
            let snapshot = state.snapshot.publish(snapshot);
            state.metrics.reloads.fetch_add(1, Ordering::Relaxed);
            info!(files = snapshot.index.len(), "snapshot reloaded");
            Ok(Json(json!({
                "reloaded": true,
                "files": snapshot.index.len(),
                "vectors": snapshot.vectors.len(),
                "loadedAt": snapshot.loaded_at.to_rfc3339(),
            })))
        }
        Err(e) => {
            state.metrics.reload_failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "reload failed; keeping previous snapshot");
            Err(ApiError::Internal(format!("reload failed: {}", e)).for_request(&id))
        }
    }
}

// ─── /metrics ────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexMetrics {
    loaded: bool,
    files: usize,
    tokens: usize,
    categories: usize,
    semantic_terms: usize,
    last_indexed: Option<String>,
    last_indexed_commit: Option<String>,
    vectors: usize,
}

fn index_metrics(snapshot: Option<&Snapshot>) -> IndexMetrics {
    match snapshot {
        Some(s) => IndexMetrics {
            loaded: true,
            files: s.index.len(),
            tokens: s.index.tokens.len(),
            categories: s.index.categories.len(),
            semantic_terms: s.index.semantic_map.len(),
            last_indexed: s.index.last_indexed.clone(),
            last_indexed_commit: s.index.last_indexed_commit.clone(),
            vectors: s.vectors.len(),
        },
        None => IndexMetrics {
            loaded: false,
            files: 0,
            tokens: 0,
            categories: 0,
            semantic_terms: 0,
            last_indexed: None,
            last_indexed_commit: None,
            vectors: 0,
        },
    }
}

/// Resident set size from `/proc/self/status` (Linux only).
fn rss_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

fn render_prometheus(doc: &Value) -> String {
    let mut out = String::new();
    let mut metric = |name: &str, help: &str, value: Option<f64>| {
        if let Some(v) = value {
            let kind = if name.ends_with("_total") { "counter" } else { "gauge" };
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} {}", name, kind);
            let _ = writeln!(out, "{} {}", name, v);
        }
    };
    let num = |ptr: &str| doc.pointer(ptr).and_then(Value::as_f64);
    let loaded = doc.pointer("/index/loaded").and_then(Value::as_bool);

    metric("codeindex_index_loaded", "1 if an index snapshot is loaded", loaded.map(|b| if b { 1.0 } else { 0.0 }));
    metric("codeindex_index_files", "Files in the loaded index", num("/index/files"));
    metric("codeindex_index_tokens", "Distinct tokens in the loaded index", num("/index/tokens"));
    metric("codeindex_index_categories", "Categories in the loaded index", num("/index/categories"));
    metric("codeindex_index_vectors", "Embeddings in the loaded snapshot", num("/index/vectors"));
    metric("codeindex_uptime_seconds", "Seconds since server start", num("/uptimeSeconds"));
    metric("codeindex_memory_rss_bytes", "Resident set size", num("/memory/rssBytes"));
    metric("codeindex_requests_total", "HTTP requests received", num("/requests/total"));
    metric("codeindex_search_requests_total", "Lexical search requests", num("/requests/search"));
    metric("codeindex_reloads_total", "Successful reloads", num("/requests/reloads"));
    metric("codeindex_reload_failures_total", "Failed reloads", num("/requests/reloadFailures"));
    metric("codeindex_panics_total", "Requests that panicked", num("/requests/panics"));
    metric("codeindex_vector_requests_total", "Vector search requests", num("/vector/requests"));
    metric("codeindex_ann_calls_total", "Calls made to the ANN backend", num("/vector/annCalls"));
    metric("codeindex_ann_successes_total", "ANN calls that served the request", num("/vector/annSuccesses"));
    metric("codeindex_ann_failures_total", "ANN calls that failed", num("/vector/annFailures"));
    metric("codeindex_ann_fallbacks_total", "Requests that fell back to brute force", num("/vector/fallbacks"));
    metric("codeindex_brute_served_total", "Requests served by brute force", num("/vector/bruteServed"));
    metric("codeindex_ann_latency_ms_total", "Cumulative ANN call latency", num("/vector/annLatencyMsTotal"));
    out
}

pub async fn metrics(State(state): State<AppState>, Query(params): Query<HashMap<String, String>>) -> Response {
    let snapshot = state.snapshot.current();
    let doc = json!({
        "index": index_metrics(snapshot.as_deref()),
        "uptimeSeconds": state.started.elapsed().as_secs(),
        "memory": { "rssBytes": rss_bytes() },
        "requests": state.metrics.snapshot(),
        "vector": state.gateway.metrics(),
        "annConfigured": state.gateway.ann_configured(),
    });

    if params.get("format").is_some_and(|f| f == "prometheus") {
        (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render_prometheus(&doc),
        )
            .into_response()
    } else {
        Json(doc).into_response()
    }
}

/// Fallback for unknown routes.
pub async fn not_found(id: Option<Extension<RequestId>>, uri: axum::http::Uri) -> ApiFailure {
    let id = id.map_or_else(|| RequestId("unknown".to_string()), |Extension(id)| id);
    ApiError::NotFound(uri.path().to_string()).for_request(&id)
}
