//! Incremental update: patch a persisted index with only the paths that
//! changed since its `lastIndexedCommit`.
//!
//! Candidates are the git diff against the working tree, the paths that were
//! dirty when last indexed, and any path where the walked file set and the
//! index disagree. The patch is applied to an in-memory copy; the file on disk
//! is replaced only after the patched store validates.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::builder::{BuildOptions, read_entry, walk_eligible};
use crate::error::IndexError;
use crate::features::{DEFAULT_MIN_TOKEN_LEN, ExtractorRegistry};
use crate::git::ChangeSource;
use crate::index::{DEFAULT_SIZE_WARN_BYTES, load_index, save_index};
use crate::store::IndexStore;

#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub root: PathBuf,
    pub index_path: PathBuf,
    /// Diff from this revision instead of the stored `lastIndexedCommit`.
    pub since: Option<String>,
    pub min_token_len: usize,
    /// Walker settings; must match the ones the index was built with.
    pub hidden: bool,
    pub no_ignore: bool,
    pub threads: usize,
    pub size_warn_bytes: u64,
}

impl UpdateOptions {
    pub fn new(root: impl Into<PathBuf>, index_path: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index_path: index_path.into(),
            since: None,
            min_token_len: DEFAULT_MIN_TOKEN_LEN,
            hidden: false,
            no_ignore: false,
            threads: 0,
            size_warn_bytes: DEFAULT_SIZE_WARN_BYTES,
        }
    }

    fn walk_options(&self, root: &Path) -> BuildOptions {
        BuildOptions {
            threads: self.threads,
            hidden: self.hidden,
            no_ignore: self.no_ignore,
            min_token_len: self.min_token_len,
            ..BuildOptions::new(root)
        }
    }
}

/// Counts for one update pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReport {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// Files that exist but could not be read; their previous entries are kept.
    pub skipped: usize,
    pub from_commit: Option<String>,
    pub to_commit: Option<String>,
}

impl UpdateReport {
    pub fn touched(&self) -> usize {
        self.added + self.modified + self.deleted
    }
}

/// Paths worth re-examining: `changed` and `previously_dirty`, plus every path
/// that is indexed but no longer eligible or eligible but not yet indexed.
pub fn candidate_paths(
    store: &IndexStore,
    changed: &[String],
    previously_dirty: &BTreeSet<String>,
    eligible: &BTreeSet<String>,
) -> BTreeSet<String> {
    let mut candidates: BTreeSet<String> = changed.iter().cloned().collect();
    candidates.extend(previously_dirty.iter().cloned());
    candidates.extend(store.files.keys().filter(|p| !eligible.contains(*p)).cloned());
    candidates.extend(eligible.iter().filter(|p| !store.files.contains_key(*p)).cloned());
    candidates
}

/// Apply a set of candidate paths to `store`.
///
/// A path outside `eligible` (gone, ignored, a symlink, wrong extension) or
/// with whitespace-only content is removed; anything else is re-extracted and
/// re-registered. Read failures keep the old entry.
pub fn apply_changes<'a, I>(
    store: &mut IndexStore,
    root: &Path,
    candidates: I,
    eligible: &BTreeSet<String>,
    registry: &ExtractorRegistry,
    min_len: usize,
) -> UpdateReport
where
    I: IntoIterator<Item = &'a String>,
{
    let mut report = UpdateReport::default();

    for rel in candidates {
        if !eligible.contains(rel) {
            if store.remove_path(rel).is_some() {
                debug!(path = %rel, "removed");
                report.deleted += 1;
            }
            continue;
        }

        match read_entry(root, rel, registry, min_len) {
            Ok(Some(entry)) => match store.get(rel) {
                Some(existing) if *existing == entry => report.unchanged += 1,
                Some(_) => {
                    store.insert_entry(entry);
                    report.modified += 1;
                }
                None => {
                    store.insert_entry(entry);
                    report.added += 1;
                }
            },
            Ok(None) => {
                if store.remove_path(rel).is_some() {
                    report.deleted += 1;
                }
            }
            Err(e) => {
                warn!(path = %rel, error = %e, "failed to re-index file; keeping previous entry");
                report.skipped += 1;
            }
        }
    }
    report
}

/// Load the index, diff against history, patch, validate and persist.
///
/// A diff failure leaves the persisted index untouched.
pub fn update_index(
    opts: &UpdateOptions,
    registry: &ExtractorRegistry,
    source: &dyn ChangeSource,
    cancel: &AtomicBool,
) -> Result<UpdateReport, IndexError> {
    let start = Instant::now();
    if !opts.root.is_dir() {
        return Err(IndexError::DirNotFound(opts.root.display().to_string()));
    }
    let root = fs::canonicalize(&opts.root)?;
    let mut store = load_index(&opts.index_path)?;

    let since = opts
        .since
        .clone()
        .or_else(|| store.last_indexed_commit.clone())
        .ok_or(IndexError::MissingCommit)?;
    let diff_failure = |message: String| IndexError::DiffFailure { commit: since.clone(), message };

    let from = source.resolve(&since).map_err(diff_failure)?;
    let changed = source.changed_paths(&from).map_err(diff_failure)?;
    let head = source.current_commit().map_err(diff_failure)?;
    let dirty = source.changed_paths(&head).map_err(diff_failure)?;
    debug!(since = %from, head = %head, changed = changed.len(), dirty = dirty.len(), "diff computed");

    let eligible: BTreeSet<String> = walk_eligible(&root, &opts.walk_options(&root), registry, cancel)
        .into_iter()
        .collect();
    if cancel.load(Ordering::Relaxed) {
        return Err(IndexError::Cancelled);
    }

    let previously_dirty = std::mem::take(&mut store.working_tree_paths);
    let candidates = candidate_paths(&store, &changed, &previously_dirty, &eligible);
    let mut report = apply_changes(&mut store, &root, &candidates, &eligible, registry, opts.min_token_len);
    report.from_commit = Some(from.clone());
    report.to_commit = Some(head.clone());

    store.working_tree_paths = dirty.into_iter().filter(|p| store.files.contains_key(p)).collect();

    if report.touched() == 0
        && store.last_indexed_commit.as_deref() == Some(head.as_str())
        && store.working_tree_paths == previously_dirty
    {
        info!(commit = %head, "index already up to date");
        return Ok(report);
    }

    store.validate()?;
    store.last_indexed = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
    store.last_indexed_commit = Some(head);

    if cancel.load(Ordering::Relaxed) {
        return Err(IndexError::Cancelled);
    }
    save_index(&store, &opts.index_path, opts.size_warn_bytes)?;

    info!(
        added = report.added,
        modified = report.modified,
        deleted = report.deleted,
        skipped = report.skipped,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "incremental update saved"
    );
    Ok(report)
}

#[cfg(test)]
#[path = "incremental_tests.rs"]
mod tests;
