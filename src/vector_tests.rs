use super::*;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;

fn entry(path: &str, tokens: &[&str]) -> FileEntry {
    FileEntry {
        path: path.to_string(),
        content_hash: "00".to_string(),
        size_bytes: 7,
        tokens: tokens.iter().map(|t| t.to_string()).collect(),
        category: "other".to_string(),
        fingerprint: "0000000000000000".to_string(),
        last_modified: "2026-01-01T00:00:00Z".to_string(),
        summary: format!("summary of {}", path),
        symbols: vec![],
    }
}

fn sample_index() -> IndexStore {
    let mut store = IndexStore::new();
    store.insert_entry(entry("src/user.ts", &["user", "store", "create"]));
    store.insert_entry(entry("src/vote.ts", &["vote", "ballot", "count"]));
    store.insert_entry(entry("docs/test.md", &["test", "plan"]));
    store
}

/// Serve `app` on an ephemeral local port and return its base URL.
async fn spawn_stub(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

fn gateway(url: Option<String>, timeout_ms: u64) -> VectorGateway {
    VectorGateway::new(GatewayConfig { ann_url: url, timeout: Duration::from_millis(timeout_ms) }).unwrap()
}

// ─── Embeddings ──────────────────────────────────────────────────────

#[test]
fn test_embed_text_is_normalized_and_deterministic() {
    let a = embed_text("UserStore createUser user", DEFAULT_DIMS);
    assert_eq!(a.len(), DEFAULT_DIMS);
    let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5, "norm {}", norm);
    assert_eq!(a, embed_text("UserStore createUser user", DEFAULT_DIMS));
}

#[test]
fn test_embed_empty_text_is_zero_vector() {
    let v = embed_text("  ;; ", 16);
    assert_eq!(v, vec![0.0; 16]);
}

#[test]
fn test_bucket_uses_big_endian_prefix() {
    let digest = Sha256::digest(b"user");
    let expected = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize % 128;
    assert_eq!(bucket("user", 128), expected);
    let v = embed_text("user", 128);
    assert_eq!(v[expected], 1.0);
}

#[test]
fn test_embed_term_frequency_weights() {
    let v = embed_terms([("user", 3), ("store", 1)], 1);
    // single dimension: everything collapses into one bucket
    assert_eq!(v, vec![1.0]);
    let v = embed_terms([("user", 1), ("user", 1)], 64);
    assert_eq!(v.iter().filter(|x| **x > 0.0).count(), 1);
}

#[test]
fn test_dims_are_clamped() {
    assert_eq!(embed_text("user", 0).len(), 1);
    assert_eq!(embed_text("user", MAX_DIMS + 5).len(), MAX_DIMS);
}

// ─── VectorStore ─────────────────────────────────────────────────────

#[test]
fn test_from_index_and_brute_force() {
    let vectors = VectorStore::from_index(&sample_index(), DEFAULT_DIMS);
    assert_eq!(vectors.len(), 3);
    let hits = vectors.brute_force("vote ballot", 2);
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].0, "src/vote.ts");
    assert!(hits[0].1 > hits[1].1);
}

#[test]
fn test_brute_force_ties_by_path() {
    let vectors = VectorStore::from_index(&sample_index(), DEFAULT_DIMS);
    // a query with no terms scores every file 0
    let hits = vectors.brute_force("?!", 10);
    assert!(hits.iter().all(|(_, s)| *s == 0.0));
    let files: Vec<_> = hits.iter().map(|(f, _)| f.as_str()).collect();
    assert_eq!(files, vec!["docs/test.md", "src/user.ts", "src/vote.ts"]);
}

#[test]
fn test_save_load_and_dims_check() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("semantic-vectors.json");
    let vectors = VectorStore::from_index(&sample_index(), 32);
    vectors.save(&path).unwrap();
    assert_eq!(VectorStore::load(&path).unwrap(), vectors);

    fs::write(&path, r#"{"dims": 4, "vectors": {"a.ts": [1.0, 0.0]}}"#).unwrap();
    assert!(matches!(VectorStore::load(&path), Err(IndexError::IndexLoad { .. })));
}

#[test]
fn test_load_or_derive_without_file() {
    let dir = tempfile::tempdir().unwrap();
    let vectors = VectorStore::load_or_derive(&dir.path().join("missing.json"), &sample_index()).unwrap();
    assert_eq!(vectors.dims, DEFAULT_DIMS);
    assert_eq!(vectors.len(), 3);
}

#[test]
fn test_load_or_derive_reconciles_stale_vectors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("semantic-vectors.json");
    let mut embedded = VectorStore::from_index(&sample_index(), 16);
    embedded.vectors.insert("src/deleted.ts".to_string(), embed_text("deleted user store", 16));
    embedded.vectors.remove("src/vote.ts");
    embedded.save(&path).unwrap();

    let mut index = sample_index();
    index.insert_entry(entry("src/added.ts", &["ballot", "added"]));
    let vectors = VectorStore::load_or_derive(&path, &index).unwrap();

    assert_eq!(vectors.dims, 16);
    let files: Vec<_> = vectors.vectors.keys().map(String::as_str).collect();
    assert_eq!(files, vec!["docs/test.md", "src/added.ts", "src/user.ts", "src/vote.ts"]);
    assert_eq!(vectors.vectors["src/added.ts"], embed_terms([("added", 1), ("ballot", 1)], 16));
    assert!(vectors.brute_force("deleted user store", 10).iter().all(|(f, _)| f != "src/deleted.ts"));
}

#[test]
fn test_reconcile_counts() {
    let mut vectors = VectorStore::from_index(&sample_index(), 8);
    assert_eq!(vectors.reconcile(&sample_index()), (0, 0));
    let mut index = sample_index();
    index.remove_path("docs/test.md");
    index.insert_entry(entry("src/new.ts", &["fresh"]));
    assert_eq!(vectors.reconcile(&index), (1, 1));
    assert_eq!(vectors.len(), 3);
}

#[test]
fn test_build_from_files_uses_summary_for_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/user.ts"), "export const user = createUser();").unwrap();
    let vectors = VectorStore::build_from_files(dir.path(), &sample_index(), 64);
    assert_eq!(vectors.len(), 3);
    assert_eq!(vectors.vectors["src/user.ts"], embed_text("export const user = createUser();", 64));
    assert_eq!(vectors.vectors["src/vote.ts"], embed_text("summary of src/vote.ts", 64));
}

#[test]
fn test_recall_at_k() {
    let truth: Vec<String> = ["a.ts", "b.ts", "c.ts", "d.ts"].iter().map(|s| s.to_string()).collect();
    let approx: Vec<String> = ["b.ts", "x.ts", "a.ts", "d.ts"].iter().map(|s| s.to_string()).collect();
    assert_eq!(recall_at_k(&truth, &approx, 3), 2.0 / 3.0);
    assert_eq!(recall_at_k(&truth, &approx, 4), 0.75);
    assert_eq!(recall_at_k(&[], &approx, 3), 1.0);
    // brute force against itself is exact
    let vectors = VectorStore::from_index(&sample_index(), DEFAULT_DIMS);
    let files: Vec<String> = vectors.brute_force("vote", 3).into_iter().map(|(f, _)| f).collect();
    assert_eq!(recall_at_k(&files, &files, 3), 1.0);
}

// ─── ANN payload parsing ─────────────────────────────────────────────

#[test]
fn test_parse_ann_body_score_or_distance() {
    let hits = parse_ann_body(r#"{"results":[{"file":"a.ts","score":0.9},{"file":"b.ts","distance":0.2},{"file":"c.ts"}]}"#)
        .unwrap();
    assert_eq!(
        hits,
        vec![("a.ts".to_string(), 0.9), ("b.ts".to_string(), 0.2), ("c.ts".to_string(), 0.0)]
    );
}

#[test]
fn test_parse_ann_body_sanitizes_non_finite() {
    let hits = parse_ann_body(r#"{"results":[{"file":"a.ts","score":NaN},{"file":"b.ts","score":-Infinity}]}"#).unwrap();
    assert_eq!(hits, vec![("a.ts".to_string(), 0.0), ("b.ts".to_string(), 0.0)]);
}

#[test]
fn test_parse_ann_body_rejects_empty_and_garbage() {
    assert!(matches!(parse_ann_body(r#"{"results":[]}"#), Err(AnnError::Payload(_))));
    assert!(matches!(parse_ann_body("<html>"), Err(AnnError::Payload(_))));
}

// ─── Gateway ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_no_ann_serves_brute() {
    let index = sample_index();
    let vectors = VectorStore::from_index(&index, DEFAULT_DIMS);
    let gw = gateway(None, 500);
    let resp = gw.search("user store", 2, &vectors, Some(&index)).await;
    assert_eq!(resp.meta.backend, Backend::Brute);
    assert_eq!(resp.meta.total, 2);
    assert_eq!(resp.results[0].file, "src/user.ts");
    assert_eq!(resp.results[0].info.as_ref().unwrap().summary, "summary of src/user.ts");

    let m = gw.metrics();
    assert_eq!((m.requests, m.ann_calls, m.brute_served, m.fallbacks), (1, 0, 1, 0));
}

#[tokio::test]
async fn test_unreachable_ann_falls_back() {
    let index = sample_index();
    let vectors = VectorStore::from_index(&index, DEFAULT_DIMS);
    let gw = gateway(Some("http://127.0.0.1:9".to_string()), 500);
    let resp = gw.search("test", 3, &vectors, Some(&index)).await;
    assert_eq!(resp.meta.backend, Backend::Brute);
    assert!(!resp.results.is_empty());

    let m = gw.metrics();
    assert_eq!((m.ann_calls, m.ann_failures, m.fallbacks, m.brute_served), (1, 1, 1, 1));
}

#[tokio::test]
async fn test_ann_success_is_annotated_and_truncated() {
    let app = Router::new().route(
        "/ann-search",
        post(|| async {
            r#"{"results":[{"file":"src/vote.ts","score":0.8},{"file":"src/user.ts","distance":0.5},{"file":"gone.ts","score":0.1}]}"#
        }),
    );
    let base = spawn_stub(app).await;
    let index = sample_index();
    let vectors = VectorStore::from_index(&index, DEFAULT_DIMS);
    let gw = gateway(Some(format!("{}/", base)), 2_000);

    let resp = gw.search("ballot", 2, &vectors, Some(&index)).await;
    assert_eq!(resp.meta.backend, Backend::Ann);
    assert_eq!(resp.meta.total, 2);
    assert_eq!(resp.results[0].file, "src/vote.ts");
    assert!(resp.results[0].info.is_some());
    assert_eq!(resp.results[1].score, 0.5);

    let m = gw.metrics();
    assert_eq!((m.ann_calls, m.ann_successes, m.fallbacks, m.brute_served), (1, 1, 0, 0));
}

#[tokio::test]
async fn test_ann_receives_query_vector() {
    let app = Router::new().route(
        "/ann-search",
        post(|axum::Json(body): axum::Json<serde_json::Value>| async move {
            let ok = body["q"] == "user" && body["top"] == 3 && body["vector"].as_array().is_some_and(|v| v.len() == DEFAULT_DIMS);
            let file = if ok { "src/user.ts" } else { "bad-request.ts" };
            axum::Json(serde_json::json!({ "results": [{ "file": file, "score": 1.0 }] }))
        }),
    );
    let base = spawn_stub(app).await;
    let index = sample_index();
    let vectors = VectorStore::from_index(&index, DEFAULT_DIMS);
    let resp = gateway(Some(base), 2_000).search("user", 3, &vectors, None).await;
    assert_eq!(resp.results[0].file, "src/user.ts");
    assert!(resp.results[0].info.is_none());
}

#[tokio::test]
async fn test_ann_error_status_falls_back() {
    let app = Router::new().route("/ann-search", post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }));
    let base = spawn_stub(app).await;
    let index = sample_index();
    let vectors = VectorStore::from_index(&index, DEFAULT_DIMS);
    let gw = gateway(Some(base), 2_000);
    let resp = gw.search("vote", 3, &vectors, Some(&index)).await;
    assert_eq!(resp.meta.backend, Backend::Brute);
    assert_eq!(gw.metrics().ann_failures, 1);
}

#[tokio::test]
async fn test_ann_empty_results_fall_back() {
    let app = Router::new().route("/ann-search", post(|| async { r#"{"results":[]}"# }));
    let base = spawn_stub(app).await;
    let index = sample_index();
    let vectors = VectorStore::from_index(&index, DEFAULT_DIMS);
    let resp = gateway(Some(base), 2_000).search("vote", 3, &vectors, Some(&index)).await;
    assert_eq!(resp.meta.backend, Backend::Brute);
}

#[tokio::test]
async fn test_slow_ann_times_out() {
    let app = Router::new().route(
        "/ann-search",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            r#"{"results":[{"file":"src/vote.ts","score":1.0}]}"#
        }),
    );
    let base = spawn_stub(app).await;
    let index = sample_index();
    let vectors = VectorStore::from_index(&index, DEFAULT_DIMS);
    let gw = gateway(Some(base), 100);

    let start = Instant::now();
    let resp = gw.search("vote", 3, &vectors, Some(&index)).await;
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(resp.meta.backend, Backend::Brute);
    assert_eq!(gw.metrics().fallbacks, 1);
}

#[test]
fn test_ann_error_display() {
    assert!(AnnError::Timeout(2000).to_string().contains("2000 ms"));
    assert!(AnnError::Status(502).to_string().contains("502"));
}
