//! The persisted index structure and its invariants.
//!
//! Every map is keyed and valued with ordered collections so serialization is
//! deterministic: two stores with the same logical content produce byte-identical
//! JSON apart from the metadata timestamps.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::features::normalize_semantic;
use crate::fingerprint::{Fingerprint, PREFIX_TIERS};

/// token / category / prefix → set of corpus-relative paths.
pub type PathIndex = BTreeMap<String, BTreeSet<String>>;

/// One indexed file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub path: String,
    /// SHA-256 hex of the raw bytes.
    pub content_hash: String,
    pub size_bytes: u64,
    pub tokens: BTreeSet<String>,
    pub category: String,
    /// 16 lowercase hex chars.
    pub fingerprint: String,
    /// RFC 3339.
    pub last_modified: String,
    pub summary: String,
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl FileEntry {
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Terms this entry contributes to the semantic map.
    pub fn semantic_terms(&self) -> BTreeSet<String> {
        let mut terms = normalize_semantic(self.file_name());
        terms.extend(normalize_semantic(&self.symbols.join(" ")));
        terms.extend(normalize_semantic(&self.summary));
        terms
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndexStore {
    pub files: BTreeMap<String, FileEntry>,
    pub tokens: PathIndex,
    #[serde(default)]
    pub categories: PathIndex,
    #[serde(default)]
    pub semantic_map: PathIndex,
    #[serde(default)]
    pub simhash_index: PathIndex,
    #[serde(default)]
    pub last_indexed: Option<String>,
    #[serde(default)]
    pub last_indexed_commit: Option<String>,
    /// Indexed paths whose content differed from `lastIndexedCommit` when they
    /// were read. The next update re-reads them even if git no longer lists them.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub working_tree_paths: BTreeSet<String>,
}

/// Summary counts for `stats` and `/metrics`.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub files: usize,
    pub tokens: usize,
    pub categories: BTreeMap<String, usize>,
    pub semantic_terms: usize,
    pub fingerprint_buckets: usize,
    pub total_bytes: u64,
    pub last_indexed: Option<String>,
    pub last_indexed_commit: Option<String>,
}

fn purge(map: &mut PathIndex, path: &str) {
    map.retain(|_, paths| {
        paths.remove(path);
        !paths.is_empty()
    });
}

fn register(map: &mut PathIndex, key: &str, path: &str) {
    map.entry(key.to_string()).or_default().insert(path.to_string());
}

impl IndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }

    /// Add (or replace) a file and register it in every secondary index.
    pub fn insert_entry(&mut self, entry: FileEntry) {
        let path = entry.path.clone();
        if self.files.contains_key(&path) {
            self.remove_path(&path);
        }
        for token in &entry.tokens {
            register(&mut self.tokens, token, &path);
        }
        register(&mut self.categories, &entry.category, &path);
        for term in entry.semantic_terms() {
            register(&mut self.semantic_map, &term, &path);
        }
        for prefix in PREFIX_TIERS.iter().filter_map(|&n| entry.fingerprint.get(..n)) {
            register(&mut self.simhash_index, prefix, &path);
        }
        self.files.insert(path, entry);
    }

    /// Remove a file and every reference to it, pruning buckets left empty.
    pub fn remove_path(&mut self, path: &str) -> Option<FileEntry> {
        let removed = self.files.remove(path);
        purge(&mut self.tokens, path);
        purge(&mut self.categories, path);
        purge(&mut self.semantic_map, path);
        purge(&mut self.simhash_index, path);
        removed
    }

    /// Same files and secondary indexes, ignoring `lastIndexed*` metadata.
    pub fn same_content(&self, other: &IndexStore) -> bool {
        self.files == other.files
            && self.tokens == other.tokens
            && self.categories == other.categories
            && self.semantic_map == other.semantic_map
            && self.simhash_index == other.simhash_index
    }

    /// `(path, fingerprint)` for every entry with a well-formed fingerprint.
    pub fn fingerprints(&self) -> impl Iterator<Item = (&str, Fingerprint)> {
        self.files
            .values()
            .filter_map(|e| Fingerprint::from_hex(&e.fingerprint).map(|fp| (e.path.as_str(), fp)))
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            files: self.files.len(),
            tokens: self.tokens.len(),
            categories: self
                .categories
                .iter()
                .map(|(k, v)| (k.clone(), v.len()))
                .collect(),
            semantic_terms: self.semantic_map.len(),
            fingerprint_buckets: self.simhash_index.len(),
            total_bytes: self.files.values().map(|e| e.size_bytes).sum(),
            last_indexed: self.last_indexed.clone(),
            last_indexed_commit: self.last_indexed_commit.clone(),
        }
    }

    // ─── Validation ──────────────────────────────────────────────

    /// Check the referential invariants between files and every secondary index.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (key, entry) in &self.files {
            let field = |name: &str| format!("files.{}.{}", key, name);
            if entry.path != *key {
                return Err(ValidationError::new(field("path"), format!("does not match key (got '{}')", entry.path)));
            }
            if entry.content_hash.is_empty() {
                return Err(ValidationError::new(field("contentHash"), "missing or empty"));
            }
            if Fingerprint::from_hex(&entry.fingerprint).is_none() {
                return Err(ValidationError::new(field("fingerprint"), format!("not 16 hex chars: '{}'", entry.fingerprint)));
            }
            for token in &entry.tokens {
                if !self.tokens.get(token).is_some_and(|p| p.contains(key)) {
                    return Err(ValidationError::new(format!("tokens.{}", token), format!("does not list '{}'", key)));
                }
            }
            if !self.categories.get(&entry.category).is_some_and(|p| p.contains(key)) {
                return Err(ValidationError::new(format!("categories.{}", entry.category), format!("does not list '{}'", key)));
            }
            for &n in &PREFIX_TIERS {
                let prefix = &entry.fingerprint[..n];
                if !self.simhash_index.get(prefix).is_some_and(|p| p.contains(key)) {
                    return Err(ValidationError::new(format!("simhashIndex.{}", prefix), format!("does not list '{}'", key)));
                }
            }
        }

        for (token, paths) in &self.tokens {
            check_bucket("tokens", token, paths, |p| self.files.get(p).is_some_and(|e| e.tokens.contains(token)))?;
        }
        for (category, paths) in &self.categories {
            check_bucket("categories", category, paths, |p| self.files.get(p).is_some_and(|e| e.category == *category))?;
        }
        for (term, paths) in &self.semantic_map {
            check_bucket("semanticMap", term, paths, |p| self.files.contains_key(p))?;
        }
        for (prefix, paths) in &self.simhash_index {
            check_bucket("simhashIndex", prefix, paths, |p| {
                self.files.get(p).is_some_and(|e| e.fingerprint.starts_with(prefix.as_str()))
            })?;
        }
        Ok(())
    }

    /// Structural check of a raw JSON document before deserializing it.
    pub fn validate_raw(value: &Value) -> Result<(), ValidationError> {
        let root = value
            .as_object()
            .ok_or_else(|| ValidationError::new("$", "expected a JSON object"))?;

        let files = root
            .get("files")
            .and_then(Value::as_object)
            .ok_or_else(|| ValidationError::new("files", "missing or not an object"))?;
        let tokens = root
            .get("tokens")
            .and_then(Value::as_object)
            .ok_or_else(|| ValidationError::new("tokens", "missing or not an object"))?;

        for (path, entry) in files {
            let field = |name: &str| format!("files.{}.{}", path, name);
            let entry = entry
                .as_object()
                .ok_or_else(|| ValidationError::new(format!("files.{}", path), "not an object"))?;
            match entry.get("contentHash").and_then(Value::as_str) {
                Some(h) if !h.is_empty() => {}
                _ => return Err(ValidationError::new(field("contentHash"), "missing or empty")),
            }
            if !entry.get("sizeBytes").is_some_and(Value::is_number) {
                return Err(ValidationError::new(field("sizeBytes"), "missing or not a number"));
            }
            if !entry.get("tokens").is_some_and(is_string_array) {
                return Err(ValidationError::new(field("tokens"), "missing or not an array of strings"));
            }
        }

        for (token, paths) in tokens {
            if !is_string_array(paths) {
                return Err(ValidationError::new(format!("tokens.{}", token), "not an array of strings"));
            }
        }
        Ok(())
    }
}

fn is_string_array(v: &Value) -> bool {
    v.as_array().is_some_and(|items| items.iter().all(Value::is_string))
}

fn check_bucket(
    map: &str,
    key: &str,
    paths: &BTreeSet<String>,
    consistent: impl Fn(&str) -> bool,
) -> Result<(), ValidationError> {
    if paths.is_empty() {
        return Err(ValidationError::new(format!("{}.{}", map, key), "empty bucket"));
    }
    match paths.iter().find(|p| !consistent(p)) {
        Some(p) => Err(ValidationError::new(
            format!("{}.{}", map, key),
            format!("references '{}' inconsistently or without a file entry", p),
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
