//! Lexical search over the token index with density and special-file boosts.
//!
//! Score for a candidate file with `raw` matched query tokens and `n` distinct
//! tokens of its own:
//!
//! ```text
//! score = raw × (raw / n) × density_boost  [× special_file_boost]
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::builder::EXCLUDED_DIRS;
use crate::features::{DEFAULT_MIN_TOKEN_LEN, normalize_semantic, semantic_tokens};
use crate::store::IndexStore;

pub const DEFAULT_LIMIT: usize = 10;
pub const DEFAULT_DENSITY_BOOST: f64 = 10.0;
pub const DEFAULT_SPECIAL_FILE_BOOST: f64 = 2.0;

/// Words that carry no signal in a code-search query.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "in", "into", "is", "it", "of", "on", "or", "that", "the", "this", "to", "was", "what",
    "when", "where", "which", "who", "why", "with", "you", "your",
];

/// Governance / rule files that get `special_file_boost`.
const SPECIAL_FILE_NAMES: &[&str] = &["agents.md", "claude.md", "contributing.md", ".cursorrules"];
const SPECIAL_PATH_MARKERS: &[&str] = &["governance", "copilot-instructions"];

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub limit: usize,
    pub density_boost: f64,
    pub special_file_boost: f64,
    /// Only return files in this category.
    pub category: Option<String>,
    pub min_token_len: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            density_boost: DEFAULT_DENSITY_BOOST,
            special_file_boost: DEFAULT_SPECIAL_FILE_BOOST,
            category: None,
            min_token_len: DEFAULT_MIN_TOKEN_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub file: String,
    pub score: f64,
}

/// Which index produced the hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Tokens,
    Semantic,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    pub source: MatchSource,
}

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// True for governance and agent-instruction files.
pub fn is_special_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    let file_name = lower.rsplit('/').next().unwrap_or(&lower);
    SPECIAL_FILE_NAMES.contains(&file_name)
        || SPECIAL_PATH_MARKERS.iter().any(|m| lower.contains(m))
        || lower.split('/').any(|c| c == "rules")
}

/// Paths under the index's own storage directories never appear in results.
fn is_storage_path(path: &str) -> bool {
    path.split('/')
        .next()
        .is_some_and(|first| EXCLUDED_DIRS.contains(&first))
}

/// The query's semantic tokens with stopwords removed.
pub fn expand_query(query: &str, min_len: usize) -> BTreeSet<String> {
    let content: Vec<&str> = query
        .split_whitespace()
        .filter(|w| !is_stopword(&w.to_lowercase()))
        .collect();
    semantic_tokens(&content.join(" "), min_len)
        .into_iter()
        .filter(|t| !is_stopword(t))
        .collect()
}

fn rank(
    store: &IndexStore,
    raw: BTreeMap<&str, usize>,
    opts: &QueryOptions,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = raw
        .into_iter()
        .filter(|(path, _)| !is_storage_path(path))
        .filter_map(|(path, count)| {
            let entry = store.get(path)?;
            if opts.category.as_deref().is_some_and(|c| c != entry.category) {
                return None;
            }
            let raw = count as f64;
            let vocabulary = entry.tokens.len().max(1) as f64;
            let mut score = raw * (raw / vocabulary) * opts.density_boost;
            if is_special_file(path) {
                score *= opts.special_file_boost;
            }
            Some(SearchHit { file: path.to_string(), score })
        })
        .collect();

    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.file.cmp(&b.file)));
    hits.truncate(opts.limit);
    hits
}

fn count_matches<'a, I>(index: &'a BTreeMap<String, BTreeSet<String>>, terms: I) -> BTreeMap<&'a str, usize>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut raw: BTreeMap<&str, usize> = BTreeMap::new();
    for term in terms {
        if let Some(paths) = index.get(term) {
            for path in paths {
                *raw.entry(path.as_str()).or_insert(0) += 1;
            }
        }
    }
    raw
}

/// Rank files for `query`. Falls back to the semantic map when no token matches.
pub fn search(store: &IndexStore, query: &str, opts: &QueryOptions) -> SearchResults {
    let empty = SearchResults { hits: Vec::new(), source: MatchSource::None };
    let tokens = expand_query(query, opts.min_token_len);
    let terms: BTreeSet<String> = normalize_semantic(query)
        .into_iter()
        .filter(|t| !is_stopword(t))
        .collect();
    if (tokens.is_empty() && terms.is_empty()) || opts.limit == 0 {
        return empty;
    }

    if !tokens.is_empty() {
        let hits = rank(store, count_matches(&store.tokens, &tokens), opts);
        if !hits.is_empty() {
            return SearchResults { hits, source: MatchSource::Tokens };
        }
    }

    let raw = count_matches(&store.semantic_map, &terms);
    let hits = rank(store, raw, opts);
    let source = if hits.is_empty() { MatchSource::None } else { MatchSource::Semantic };
    SearchResults { hits, source }
}
