//! Full index build: parallel walk, per-file extraction on worker threads,
//! single-threaded merge into an [`IndexStore`].

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Instant, SystemTime};

use chrono::{DateTime, SecondsFormat, Utc};
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::IndexError;
use crate::features::{self, ContentExtractor, DEFAULT_MIN_TOKEN_LEN, ExtractorRegistry};
use crate::fingerprint::Fingerprint;
use crate::git;
use crate::index::{DEFAULT_SIZE_WARN_BYTES, save_index};
use crate::store::{FileEntry, IndexStore};

/// Directory names never descended into.
pub const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "dist",
    "build",
    "coverage",
    "target",
    "ai-index",
    "ai-cache",
    "ai-metrics",
];

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub root: PathBuf,
    /// Worker threads for walking and extraction (0 = available parallelism).
    pub threads: usize,
    /// Include hidden files and directories.
    pub hidden: bool,
    /// Ignore `.gitignore` and friends.
    pub no_ignore: bool,
    pub min_token_len: usize,
    /// Record HEAD as `lastIndexedCommit` when the root is a git work tree.
    pub record_commit: bool,
    pub size_warn_bytes: u64,
}

impl BuildOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            threads: 0,
            hidden: false,
            no_ignore: false,
            min_token_len: DEFAULT_MIN_TOKEN_LEN,
            record_commit: true,
            size_warn_bytes: DEFAULT_SIZE_WARN_BYTES,
        }
    }

    fn thread_count(&self) -> usize {
        if self.threads == 0 {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
        } else {
            self.threads
        }
    }
}

/// Result of a persisted build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub files: usize,
    pub tokens: usize,
    pub bytes: u64,
    pub oversized: bool,
    pub elapsed_ms: u64,
}

// ─── Eligibility ─────────────────────────────────────────────────────

fn is_test_or_minified(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    lower.contains(".spec.") || lower.contains(".test.") || lower.ends_with(".min.js")
}

/// Whether a corpus-relative path should be indexed at all.
///
/// Rejects excluded directories, hidden components (unless `include_hidden`),
/// test/spec and minified files, and extensions with no registered extractor.
pub fn is_eligible(rel_path: &str, registry: &ExtractorRegistry, include_hidden: bool) -> bool {
    let path = Path::new(rel_path);
    let mut file_name = None;
    for component in path.components() {
        let Component::Normal(name) = component else {
            return false;
        };
        let name = name.to_string_lossy();
        if EXCLUDED_DIRS.contains(&name.as_ref()) {
            return false;
        }
        if !include_hidden && name.starts_with('.') {
            return false;
        }
        file_name = Some(name);
    }
    match file_name {
        Some(name) if !is_test_or_minified(&name) => registry.for_path(path).is_some(),
        _ => false,
    }
}

/// `root`-relative path with `/` separators.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let s = rel.to_string_lossy().replace('\\', "/");
    (!s.is_empty()).then_some(s)
}

// ─── Per-file extraction ─────────────────────────────────────────────

fn rfc3339(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Build a file entry from raw bytes. `None` for whitespace-only content.
pub fn extract_entry(
    rel_path: &str,
    raw: &[u8],
    last_modified: String,
    extractor: &dyn ContentExtractor,
    min_len: usize,
) -> Option<FileEntry> {
    let content = String::from_utf8_lossy(raw);
    if content.trim().is_empty() {
        return None;
    }
    let extracted = extractor.extract(&content, min_len);
    let fingerprint = Fingerprint::from_frequencies(&extracted.frequencies);
    Some(FileEntry {
        path: rel_path.to_string(),
        content_hash: hex::encode(Sha256::digest(raw)),
        size_bytes: raw.len() as u64,
        tokens: extracted.tokens,
        category: features::categorize(rel_path).to_string(),
        fingerprint: fingerprint.to_hex(),
        last_modified,
        summary: features::summarize(&content),
        symbols: extracted.symbols,
    })
}

/// Read and extract one file under `root`.
///
/// `Ok(None)` when the path is ineligible or whitespace-only; `Err` only when
/// the file exists but cannot be read.
pub fn read_entry(
    root: &Path,
    rel_path: &str,
    registry: &ExtractorRegistry,
    min_len: usize,
) -> Result<Option<FileEntry>, IndexError> {
    let Some(extractor) = registry.for_path(Path::new(rel_path)) else {
        return Ok(None);
    };
    let abs = root.join(rel_path);
    let processing = |source| IndexError::FileProcessing { path: rel_path.to_string(), source };
    let raw = fs::read(&abs).map_err(processing)?;
    debug!(path = %rel_path, extractor = extractor.name(), bytes = raw.len(), "extracting");
    let modified = fs::metadata(&abs)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH);
    Ok(extract_entry(rel_path, &raw, rfc3339(modified), extractor, min_len))
}

// ─── Build ───────────────────────────────────────────────────────────

/// Every indexable path under `root`, sorted. Symlinks are not followed.
pub(crate) fn walk_eligible(
    root: &Path,
    opts: &BuildOptions,
    registry: &ExtractorRegistry,
    cancel: &AtomicBool,
) -> Vec<String> {
    let mut builder = WalkBuilder::new(root);
    builder.hidden(!opts.hidden);
    builder.git_ignore(!opts.no_ignore);
    builder.git_global(!opts.no_ignore);
    builder.git_exclude(!opts.no_ignore);
    builder.threads(opts.thread_count());
    builder.filter_entry(|e| {
        !e.file_type().is_some_and(|ft| ft.is_dir())
            || !EXCLUDED_DIRS.iter().any(|d| e.file_name() == *d)
    });

    let paths: Mutex<Vec<String>> = Mutex::new(Vec::new());
    builder.build_parallel().run(|| {
        let paths = &paths;
        Box::new(move |result| {
            if cancel.load(Ordering::Relaxed) {
                return ignore::WalkState::Quit;
            }
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "walk error");
                    return ignore::WalkState::Continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                return ignore::WalkState::Continue;
            }
            if let Some(rel) = relative_path(root, entry.path())
                && is_eligible(&rel, registry, opts.hidden)
            {
                paths.lock().unwrap_or_else(|e| e.into_inner()).push(rel);
            }
            ignore::WalkState::Continue
        })
    });

    let mut paths = paths.into_inner().unwrap_or_else(|e| e.into_inner());
    paths.sort();
    paths
}

/// Build an index over `opts.root` in memory. Nothing is persisted.
pub fn build_index(
    opts: &BuildOptions,
    registry: &ExtractorRegistry,
    cancel: &AtomicBool,
) -> Result<IndexStore, IndexError> {
    if !opts.root.is_dir() {
        return Err(IndexError::DirNotFound(opts.root.display().to_string()));
    }
    let root = fs::canonicalize(&opts.root)?;
    let start = Instant::now();

    let paths = walk_eligible(&root, opts, registry, cancel);
    if cancel.load(Ordering::Relaxed) {
        return Err(IndexError::Cancelled);
    }
    let file_count = paths.len();
    debug!(files = file_count, "walk complete");

    // ─── Parallel extraction ────────────────────────────────────
    let chunk_size = file_count.div_ceil(opts.thread_count().max(1)).max(1);
    let min_len = opts.min_token_len;
    let root_ref = root.as_path();

    let chunk_results: Vec<Vec<FileEntry>> = std::thread::scope(|s| {
        let handles: Vec<_> = paths
            .chunks(chunk_size)
            .map(|chunk| {
                s.spawn(move || {
                    let mut local = Vec::with_capacity(chunk.len());
                    for rel in chunk {
                        if cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        match read_entry(root_ref, rel, registry, min_len) {
                            Ok(Some(entry)) => local.push(entry),
                            Ok(None) => {}
                            Err(e) => warn!(path = %rel, error = %e, "skipping unreadable file"),
                        }
                    }
                    local
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_default())
            .collect()
    });

    if cancel.load(Ordering::Relaxed) {
        return Err(IndexError::Cancelled);
    }

    // ─── Merge ──────────────────────────────────────────────────
    let mut store = IndexStore::new();
    for entry in chunk_results.into_iter().flatten() {
        store.insert_entry(entry);
    }
    store.validate()?;

    store.last_indexed = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
    if opts.record_commit
        && let Some(state) = git::head_state(&root)
    {
        store.working_tree_paths = state.dirty.into_iter().filter(|p| store.files.contains_key(p)).collect();
        store.last_indexed_commit = Some(state.commit);
    }

    info!(
        root = %root.display(),
        files = store.len(),
        tokens = store.tokens.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "index built"
    );
    Ok(store)
}

/// Build, then persist atomically to `index_path` unless cancelled.
pub fn build_and_save(
    opts: &BuildOptions,
    registry: &ExtractorRegistry,
    index_path: &Path,
    cancel: &AtomicBool,
) -> Result<BuildReport, IndexError> {
    let start = Instant::now();
    let store = build_index(opts, registry, cancel)?;
    if cancel.load(Ordering::Relaxed) {
        return Err(IndexError::Cancelled);
    }
    let saved = save_index(&store, index_path, opts.size_warn_bytes)?;
    Ok(BuildReport {
        files: store.len(),
        tokens: store.tokens.len(),
        bytes: saved.bytes,
        oversized: saved.oversized,
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod tests;
