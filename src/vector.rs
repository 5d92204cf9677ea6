//! Hashing-trick embeddings, brute-force similarity and the optional ANN backend.
//!
//! [`VectorGateway::search`] always answers: when the ANN backend is absent,
//! slow, down or returns garbage, the local brute-force scan serves the request
//! and the response says so in `meta.backend`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::IndexError;
use crate::index::write_atomic;
use crate::store::{FileEntry, IndexStore};

pub const DEFAULT_DIMS: usize = 128;
pub const MAX_DIMS: usize = 10_000;
/// Characters of file content considered per embedding.
pub const MAX_EMBED_CHARS: usize = 20_000;
pub const DEFAULT_ANN_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_TOP: usize = 10;

// ─── Embeddings ──────────────────────────────────────────────────────

fn normalize_term(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Bucket index: first 4 digest bytes as a big-endian u32, modulo `dims`.
fn bucket(term: &str, dims: usize) -> usize {
    let digest = Sha256::digest(term.as_bytes());
    let value = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    value as usize % dims
}

/// L2-normalized term-frequency vector. An input with no terms yields all zeros.
pub fn embed_terms<'a, I>(terms: I, dims: usize) -> Vec<f32>
where
    I: IntoIterator<Item = (&'a str, u32)>,
{
    let dims = dims.clamp(1, MAX_DIMS);
    let mut freq: BTreeMap<String, u32> = BTreeMap::new();
    for (raw, weight) in terms {
        let term = normalize_term(raw);
        if !term.is_empty() {
            *freq.entry(term).or_insert(0) += weight;
        }
    }

    let mut vec = vec![0f32; dims];
    for (term, weight) in &freq {
        vec[bucket(term, dims)] += *weight as f32;
    }
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}

/// Embed free text: split on non-word characters, strip to ASCII alphanumerics.
pub fn embed_text(text: &str, dims: usize) -> Vec<f32> {
    embed_terms(
        text.split(|c: char| !c.is_alphanumeric() && c != '_').map(|w| (w, 1)),
        dims,
    )
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Persisted embeddings: `{ "dims": N, "vectors": { path: [f32; N] } }`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct VectorStore {
    pub dims: usize,
    pub vectors: BTreeMap<String, Vec<f32>>,
}

impl VectorStore {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    fn embed_entry(entry: &FileEntry, dims: usize) -> Vec<f32> {
        embed_terms(entry.tokens.iter().map(|t| (t.as_str(), 1)), dims)
    }

    /// Embeddings derived from each entry's token set, for when no vectors file exists.
    pub fn from_index(store: &IndexStore, dims: usize) -> Self {
        let dims = dims.clamp(1, MAX_DIMS);
        let vectors = store
            .files
            .iter()
            .map(|(path, entry)| (path.clone(), Self::embed_entry(entry, dims)))
            .collect();
        Self { dims, vectors }
    }

    /// Align with `index`: drop vectors for files no longer indexed and derive
    /// token embeddings for indexed files that have none. Returns `(dropped, derived)`.
    pub fn reconcile(&mut self, index: &IndexStore) -> (usize, usize) {
        let before = self.vectors.len();
        self.vectors.retain(|path, _| index.files.contains_key(path));
        let dropped = before - self.vectors.len();

        let mut derived = 0;
        for (path, entry) in &index.files {
            if !self.vectors.contains_key(path) {
                self.vectors.insert(path.clone(), Self::embed_entry(entry, self.dims));
                derived += 1;
            }
        }
        (dropped, derived)
    }

    /// Embed every indexed file's content (capped), falling back to its summary
    /// when the file can no longer be read.
    pub fn build_from_files(root: &Path, store: &IndexStore, dims: usize) -> Self {
        let dims = dims.clamp(1, MAX_DIMS);
        let mut vectors = BTreeMap::new();
        for (path, entry) in &store.files {
            let content = match fs::read(root.join(path)) {
                Ok(raw) => String::from_utf8_lossy(&raw).into_owned(),
                Err(e) => {
                    debug!(path = %path, error = %e, "embedding summary instead of content");
                    entry.summary.clone()
                }
            };
            vectors.insert(path.clone(), embed_text(truncate_chars(&content, MAX_EMBED_CHARS), dims));
        }
        Self { dims, vectors }
    }

    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let raw = fs::read(path).map_err(|e| IndexError::IndexLoad {
            path: path.display().to_string(),
            message: format!("cannot read vectors: {}", e),
        })?;
        let store: Self = serde_json::from_slice(&raw).map_err(|e| IndexError::IndexLoad {
            path: path.display().to_string(),
            message: format!("invalid vectors file: {}", e),
        })?;
        if store.dims == 0 || store.vectors.values().any(|v| v.len() != store.dims) {
            return Err(IndexError::IndexLoad {
                path: path.display().to_string(),
                message: format!("vectors do not all have dims={}", store.dims),
            });
        }
        Ok(store)
    }

    /// Load `path` if present (reconciled against `index`), otherwise derive from `index`.
    pub fn load_or_derive(path: &Path, index: &IndexStore) -> Result<Self, IndexError> {
        if !path.exists() {
            return Ok(Self::from_index(index, DEFAULT_DIMS));
        }
        let mut store = Self::load(path)?;
        let (dropped, derived) = store.reconcile(index);
        if dropped + derived > 0 {
            warn!(
                path = %path.display(),
                dropped,
                derived,
                "vectors file is out of date with the index; run `codeindex embed` to refresh"
            );
        }
        Ok(store)
    }

    /// Dot product against every vector; descending score, ties by path.
    pub fn brute_force(&self, query: &str, top: usize) -> Vec<(String, f64)> {
        let qvec = embed_text(query, self.dims);
        let mut scores: Vec<(String, f64)> = self
            .vectors
            .iter()
            .map(|(file, vec)| (file.clone(), f64::from(dot(&qvec, vec))))
            .collect();
        scores.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scores.truncate(top);
        scores
    }
}

/// Fraction of the first `k` ground-truth files that also appear in the first
/// `k` approximate results. An empty truth set counts as full recall.
pub fn recall_at_k(truth: &[String], approx: &[String], k: usize) -> f64 {
    let expected: BTreeSet<&str> = truth.iter().take(k).map(String::as_str).collect();
    if expected.is_empty() {
        return 1.0;
    }
    let found = approx
        .iter()
        .take(k)
        .filter(|f| expected.contains(f.as_str()))
        .count();
    found as f64 / expected.len() as f64
}

// ─── ANN backend ─────────────────────────────────────────────────────

/// Why an ANN call was abandoned. Never surfaced to HTTP callers.
#[derive(Error, Debug)]
pub enum AnnError {
    #[error("ANN backend timed out after {0} ms")]
    Timeout(u64),

    #[error("ANN backend unreachable: {0}")]
    Connect(String),

    #[error("ANN backend returned HTTP {0}")]
    Status(u16),

    #[error("ANN backend returned an unusable payload: {0}")]
    Payload(String),

    #[error("ANN request failed: {0}")]
    Http(String),
}

impl AnnError {
    fn from_reqwest(err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            AnnError::Timeout(timeout_ms)
        } else if err.is_connect() {
            AnnError::Connect(err.to_string())
        } else if let Some(status) = err.status() {
            AnnError::Status(status.as_u16())
        } else {
            AnnError::Http(err.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL; `/ann-search` is appended.
    pub ann_url: Option<String>,
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ann_url: None,
            timeout: Duration::from_millis(DEFAULT_ANN_TIMEOUT_MS),
        }
    }
}

#[derive(Serialize)]
struct AnnRequest<'a> {
    q: &'a str,
    vector: &'a [f32],
    top: usize,
}

#[derive(Deserialize)]
struct AnnResponse {
    #[serde(default)]
    results: Vec<AnnHit>,
}

#[derive(Deserialize)]
struct AnnHit {
    file: String,
    score: Option<f64>,
    distance: Option<f64>,
}

static NON_FINITE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-?\bInfinity\b|\bNaN\b").expect("non-finite pattern is a valid literal regex")
});

/// Parse an ANN body, tolerating bare `NaN`/`Infinity` literals (read as 0).
fn parse_ann_body(body: &str) -> Result<Vec<(String, f64)>, AnnError> {
    let parsed: AnnResponse = match serde_json::from_str(body) {
        Ok(p) => p,
        Err(_) => {
            let sanitized = NON_FINITE_RE.replace_all(body, "0");
            serde_json::from_str(&sanitized).map_err(|e| AnnError::Payload(e.to_string()))?
        }
    };
    if parsed.results.is_empty() {
        return Err(AnnError::Payload("empty results".to_string()));
    }
    Ok(parsed
        .results
        .into_iter()
        .map(|hit| {
            let score = hit.score.or(hit.distance).unwrap_or(0.0);
            (hit.file, if score.is_finite() { score } else { 0.0 })
        })
        .collect())
}

// ─── Metrics ─────────────────────────────────────────────────────────

/// Per-backend counters. Updated on every call, read by `/metrics`.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    requests: AtomicU64,
    ann_calls: AtomicU64,
    ann_successes: AtomicU64,
    ann_failures: AtomicU64,
    fallbacks: AtomicU64,
    brute_served: AtomicU64,
    ann_latency_ms_total: AtomicU64,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GatewayMetricsSnapshot {
    pub requests: u64,
    pub ann_calls: u64,
    pub ann_successes: u64,
    pub ann_failures: u64,
    pub fallbacks: u64,
    pub brute_served: u64,
    pub ann_latency_ms_total: u64,
}

impl GatewayMetrics {
    pub fn snapshot(&self) -> GatewayMetricsSnapshot {
        GatewayMetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            ann_calls: self.ann_calls.load(Ordering::Relaxed),
            ann_successes: self.ann_successes.load(Ordering::Relaxed),
            ann_failures: self.ann_failures.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            brute_served: self.brute_served.load(Ordering::Relaxed),
            ann_latency_ms_total: self.ann_latency_ms_total.load(Ordering::Relaxed),
        }
    }
}

// ─── Gateway ─────────────────────────────────────────────────────────

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Ann,
    Brute,
}

/// Lightweight file metadata attached to each hit.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HitInfo {
    pub category: String,
    pub summary: String,
    pub size_bytes: u64,
    pub last_modified: String,
}

impl From<&FileEntry> for HitInfo {
    fn from(e: &FileEntry) -> Self {
        Self {
            category: e.category.clone(),
            summary: e.summary.clone(),
            size_bytes: e.size_bytes,
            last_modified: e.last_modified.clone(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub file: String,
    pub score: f64,
    pub info: Option<HitInfo>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct VectorMeta {
    pub q: String,
    pub total: usize,
    pub backend: Backend,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct VectorResponse {
    pub results: Vec<VectorHit>,
    pub meta: VectorMeta,
}

pub struct VectorGateway {
    config: GatewayConfig,
    client: reqwest::Client,
    metrics: GatewayMetrics,
}

impl VectorGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client, metrics: GatewayMetrics::default() })
    }

    pub fn ann_configured(&self) -> bool {
        self.config.ann_url.is_some()
    }

    pub fn metrics(&self) -> GatewayMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Similarity search: ANN first when configured, brute force otherwise.
    pub async fn search(
        &self,
        query: &str,
        top: usize,
        vectors: &VectorStore,
        index: Option<&IndexStore>,
    ) -> VectorResponse {
        self.metrics.requests.fetch_add(1, Ordering::Relaxed);
        let annotate = |scored: Vec<(String, f64)>| -> Vec<VectorHit> {
            scored
                .into_iter()
                .map(|(file, score)| {
                    let info = index.and_then(|i| i.get(&file)).map(HitInfo::from);
                    VectorHit { file, score, info }
                })
                .collect()
        };

        if let Some(base) = self.config.ann_url.as_deref() {
            self.metrics.ann_calls.fetch_add(1, Ordering::Relaxed);
            let start = Instant::now();
            let outcome = self.call_ann(base, query, vectors.dims, top).await;
            self.metrics
                .ann_latency_ms_total
                .fetch_add(start.elapsed().as_millis() as u64, Ordering::Relaxed);
            match outcome {
                Ok(mut scored) => {
                    self.metrics.ann_successes.fetch_add(1, Ordering::Relaxed);
                    scored.truncate(top);
                    let results = annotate(scored);
                    return VectorResponse {
                        meta: VectorMeta { q: query.to_string(), total: results.len(), backend: Backend::Ann },
                        results,
                    };
                }
                Err(e) => {
                    self.metrics.ann_failures.fetch_add(1, Ordering::Relaxed);
                    self.metrics.fallbacks.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "ANN backend failed; falling back to brute force");
                }
            }
        }

        self.metrics.brute_served.fetch_add(1, Ordering::Relaxed);
        let results = annotate(vectors.brute_force(query, top));
        VectorResponse {
            meta: VectorMeta { q: query.to_string(), total: results.len(), backend: Backend::Brute },
            results,
        }
    }

    async fn call_ann(&self, base: &str, query: &str, dims: usize, top: usize) -> Result<Vec<(String, f64)>, AnnError> {
        let timeout_ms = self.config.timeout.as_millis() as u64;
        let url = format!("{}/ann-search", base.trim_end_matches('/'));
        let vector = embed_text(query, dims.max(1));
        let request = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&AnnRequest { q: query, vector: &vector, top })
            .send();

        let body = tokio::time::timeout(self.config.timeout, async {
            let response = request.await.map_err(|e| AnnError::from_reqwest(e, timeout_ms))?;
            let status = response.status();
            if !status.is_success() {
                return Err(AnnError::Status(status.as_u16()));
            }
            response.text().await.map_err(|e| AnnError::from_reqwest(e, timeout_ms))
        })
        .await
        .map_err(|_| AnnError::Timeout(timeout_ms))??;

        parse_ann_body(&body)
    }
}

#[cfg(test)]
#[path = "vector_tests.rs"]
mod tests;
