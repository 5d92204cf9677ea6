//! Feature extraction: raw file content → normalized token set + frequency map.
//!
//! The token set feeds the inverted index, the frequency map feeds the simhash
//! fingerprint. Extraction never fails: binary or malformed content simply yields
//! few (or no) tokens.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;

/// Minimum token length for the token index and for query expansion.
pub const DEFAULT_MIN_TOKEN_LEN: usize = 3;

/// Minimum token length for the semantic map (file names, symbols, summaries).
pub const SEMANTIC_MIN_TOKEN_LEN: usize = 2;

/// Maximum number of characters kept in a file summary.
pub const SUMMARY_CHARS: usize = 500;

/// Bidirectional abbreviation table: when either form is present, the other is added.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("function", "func"),
    ("component", "comp"),
    ("interface", "iface"),
    ("configuration", "config"),
    ("parameter", "param"),
    ("argument", "arg"),
    ("request", "req"),
    ("response", "res"),
    ("message", "msg"),
    ("repository", "repo"),
    ("document", "doc"),
    ("directory", "dir"),
    ("initialize", "init"),
    ("implementation", "impl"),
    ("authentication", "auth"),
    ("application", "app"),
    ("variable", "var"),
    ("environment", "env"),
    ("utility", "util"),
    ("library", "lib"),
];

/// Keyword table for coarse categories, checked in order against each path component.
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("components", &["component", "view", "screen", "page"]),
    ("services", &["service", "api", "client", "provider", "manager"]),
    ("models", &["model", "entity", "schema", "interface", "types"]),
    ("utilities", &["util", "helper", "tool", "lib", "common"]),
    ("config", &["config", "setting", "env", "constant"]),
    ("tests", &["test", "spec", "mock", "fixture"]),
    ("docs", &["readme", "doc", "guide", "tutorial"]),
];

// ─── Tokenization ────────────────────────────────────────────────────

/// Split text into raw words (original case) on characters that are neither
/// alphanumeric nor `_`.
fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
}

fn long_enough(token: &str, min_len: usize) -> bool {
    token.chars().count() >= min_len
}

/// Split an identifier into lowercase parts on `_`, camelCase and acronym boundaries.
///
/// # Examples
///
/// ```
/// use codeindex::features::split_identifier;
///
/// assert_eq!(split_identifier("getUserData"), vec!["get", "user", "data"]);
/// assert_eq!(split_identifier("HTTPClient"), vec!["http", "client"]);
/// assert_eq!(split_identifier("max_age_secs"), vec!["max", "age", "secs"]);
/// ```
#[must_use]
pub fn split_identifier(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for segment in word.split('_').filter(|s| !s.is_empty()) {
        let chars: Vec<char> = segment.chars().collect();
        let mut current = String::new();
        for (i, &c) in chars.iter().enumerate() {
            if i > 0 && !current.is_empty() && c.is_uppercase() {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
                if prev.is_lowercase() || prev.is_numeric() || (prev.is_uppercase() && next_is_lower) {
                    parts.push(current.to_lowercase());
                    current.clear();
                }
            }
            current.push(c);
        }
        if !current.is_empty() {
            parts.push(current.to_lowercase());
        }
    }
    parts
}

/// Add the counterpart of every abbreviation-table entry present in the set,
/// subject to the same minimum length.
fn expand_abbreviations(tokens: &mut BTreeSet<String>, min_len: usize) {
    for (long, short) in ABBREVIATIONS {
        let has_long = tokens.contains(*long);
        let has_short = tokens.contains(*short);
        if has_long && !has_short && long_enough(short, min_len) {
            tokens.insert((*short).to_string());
        } else if has_short && !has_long {
            tokens.insert((*long).to_string());
        }
    }
}

/// Expand text into its deduplicated semantic token set.
///
/// Used for both file content and queries so the two always agree on
/// what a token is.
#[must_use]
pub fn semantic_tokens(text: &str, min_len: usize) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    for word in words(text) {
        let lower = word.to_lowercase();
        if long_enough(&lower, min_len) {
            tokens.insert(lower);
        }
        let parts = split_identifier(word);
        if parts.len() > 1 {
            tokens.extend(parts.into_iter().filter(|p| long_enough(p, min_len)));
        }
    }
    expand_abbreviations(&mut tokens, min_len);
    tokens
}

/// Occurrence count per base (lowercased, length-filtered) word.
#[must_use]
pub fn token_frequencies(text: &str, min_len: usize) -> BTreeMap<String, u32> {
    let mut freq = BTreeMap::new();
    for word in words(text) {
        let lower = word.to_lowercase();
        if long_enough(&lower, min_len) {
            *freq.entry(lower).or_insert(0) += 1;
        }
    }
    freq
}

/// Normalize text for the semantic map: lowercase ASCII alphanumerics only,
/// plus identifier parts, minimum length [`SEMANTIC_MIN_TOKEN_LEN`].
#[must_use]
pub fn normalize_semantic(text: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut push = |raw: &str| {
        let t: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if t.len() >= SEMANTIC_MIN_TOKEN_LEN {
            out.insert(t);
        }
    };
    for word in words(text) {
        push(word);
        let parts = split_identifier(word);
        if parts.len() > 1 {
            for p in &parts {
                push(p);
            }
        }
    }
    out
}

/// Bounded-length excerpt of the content, on a char boundary.
#[must_use]
pub fn summarize(content: &str) -> String {
    match content.char_indices().nth(SUMMARY_CHARS) {
        Some((byte_idx, _)) => format!("{}...", &content[..byte_idx]),
        None => content.to_string(),
    }
}

fn keyword_category(component: &str) -> Option<&'static str> {
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| component.contains(k)))
        .map(|(category, _)| *category)
}

/// Coarse content type from the file path: keywords in the file name first,
/// then in directory names from the deepest up, then the extension.
#[must_use]
pub fn categorize(rel_path: &str) -> &'static str {
    let lower = rel_path.to_lowercase();
    let mut components = lower.rsplit('/');
    let file_name = components.next().unwrap_or(&lower);
    if let Some(category) = keyword_category(file_name) {
        return category;
    }
    if let Some(category) = components.find_map(keyword_category) {
        return category;
    }
    match Path::new(file_name).extension().and_then(|e| e.to_str()) {
        Some("md") => "docs",
        Some("json" | "yml" | "yaml" | "toml") => "config",
        _ => "other",
    }
}

// ─── Extractors ──────────────────────────────────────────────────────

/// Everything the index needs from one file's content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features {
    pub tokens: BTreeSet<String>,
    pub frequencies: BTreeMap<String, u32>,
    pub symbols: Vec<String>,
}

/// Per-file-type extraction strategy.
pub trait ContentExtractor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Declared names (functions, classes, ...) found in the content.
    fn symbols(&self, _content: &str) -> Vec<String> {
        Vec::new()
    }

    fn extract(&self, content: &str, min_len: usize) -> Features {
        Features {
            tokens: semantic_tokens(content, min_len),
            frequencies: token_frequencies(content, min_len),
            symbols: self.symbols(content),
        }
    }
}

/// Prose and configuration files: tokens only.
#[derive(Debug, Default)]
pub struct TextExtractor;

impl ContentExtractor for TextExtractor {
    fn name(&self) -> &'static str {
        "text"
    }
}

/// Upper bound on symbols kept per file.
const MAX_SYMBOLS: usize = 200;

static DECLARATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:function|class|struct|trait|interface|enum|def|fn|type)\s+([A-Za-z_][A-Za-z0-9_]*)|\bfunc\s+(?:\([^)]*\)\s*)?([A-Za-z_][A-Za-z0-9_]*)",
    )
    .expect("declaration pattern is a valid literal regex")
});

static ARROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:const|let)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*(?:async\s*)?\(")
        .expect("arrow pattern is a valid literal regex")
});

/// Source files: tokens plus declared symbols.
#[derive(Debug, Default)]
pub struct SourceExtractor;

impl ContentExtractor for SourceExtractor {
    fn name(&self) -> &'static str {
        "source"
    }

    fn symbols(&self, content: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut symbols = Vec::new();
        let decls = DECLARATION_RE
            .captures_iter(content)
            .filter_map(|c| c.get(1).or_else(|| c.get(2)));
        let arrows = ARROW_RE.captures_iter(content).filter_map(|c| c.get(1));
        for m in decls.chain(arrows) {
            if symbols.len() >= MAX_SYMBOLS {
                break;
            }
            if seen.insert(m.as_str()) {
                symbols.push(m.as_str().to_string());
            }
        }
        symbols
    }
}

pub const TEXT_EXTENSIONS: &[&str] = &["md", "json", "yml", "yaml", "toml"];
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "js", "jsx", "ts", "tsx", "mjs", "cjs", "py", "java", "go", "rs",
];

/// Extension → extractor. The registered extensions are the indexing allowlist.
#[derive(Clone)]
pub struct ExtractorRegistry {
    by_ext: HashMap<String, Arc<dyn ContentExtractor>>,
}

impl ExtractorRegistry {
    pub fn empty() -> Self {
        Self { by_ext: HashMap::new() }
    }

    pub fn register(&mut self, ext: &str, extractor: Arc<dyn ContentExtractor>) {
        self.by_ext.insert(ext.trim_start_matches('.').to_lowercase(), extractor);
    }

    pub fn get(&self, ext: &str) -> Option<&dyn ContentExtractor> {
        self.by_ext.get(&ext.to_lowercase()).map(|e| e.as_ref())
    }

    pub fn for_path(&self, path: &Path) -> Option<&dyn ContentExtractor> {
        path.extension().and_then(|e| e.to_str()).and_then(|e| self.get(e))
    }

    /// Registered extensions, sorted.
    pub fn extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.by_ext.keys().cloned().collect();
        exts.sort();
        exts
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        let text: Arc<dyn ContentExtractor> = Arc::new(TextExtractor);
        let source: Arc<dyn ContentExtractor> = Arc::new(SourceExtractor);
        for ext in TEXT_EXTENSIONS {
            registry.register(ext, Arc::clone(&text));
        }
        for ext in SOURCE_EXTENSIONS {
            registry.register(ext, Arc::clone(&source));
        }
        registry
    }
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("extensions", &self.extensions())
            .finish()
    }
}
