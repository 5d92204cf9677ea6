//! CLI argument structs for all subcommands.

use std::path::PathBuf;

use clap::{Args, Parser};

use codeindex::index::{DEFAULT_SIZE_WARN_BYTES, default_index_path, vectors_path_for};

/// Corpus root and index location, shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct IndexLocation {
    /// Corpus root directory
    #[arg(short, long, default_value = ".")]
    pub dir: String,

    /// Index file (default: <dir>/ai-index/codebase-index.json)
    #[arg(long, env = "INDEX_PATH")]
    pub index: Option<PathBuf>,
}

impl IndexLocation {
    pub fn root(&self) -> PathBuf {
        PathBuf::from(&self.dir)
    }

    pub fn index_path(&self) -> PathBuf {
        self.index.clone().unwrap_or_else(|| default_index_path(&self.root()))
    }

    pub fn vectors_path(&self) -> PathBuf {
        vectors_path_for(&self.index_path())
    }
}

#[derive(Parser, Debug)]
pub struct BuildArgs {
    #[command(flatten)]
    pub location: IndexLocation,

    /// Include hidden files and directories
    #[arg(long)]
    pub hidden: bool,

    /// Also index .gitignore'd files
    #[arg(long)]
    pub no_ignore: bool,

    /// Number of parallel threads (0 = auto)
    #[arg(short, long, default_value = "0")]
    pub threads: usize,

    /// Warn when the saved index exceeds this many bytes
    #[arg(long, default_value_t = DEFAULT_SIZE_WARN_BYTES)]
    pub warn_bytes: u64,

    /// Log level for stderr output (error, warn, info, debug, trace)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: String,
}

#[derive(Parser, Debug)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub location: IndexLocation,

    /// Diff from this revision instead of the index's lastIndexedCommit
    #[arg(long)]
    pub since: Option<String>,

    /// Include hidden files and directories (use the same value as for build)
    #[arg(long)]
    pub hidden: bool,

    /// Also index .gitignore'd files (use the same value as for build)
    #[arg(long)]
    pub no_ignore: bool,

    /// Number of parallel walker threads (0 = auto)
    #[arg(short, long, default_value = "0")]
    pub threads: usize,

    /// Warn when the saved index exceeds this many bytes
    #[arg(long, default_value_t = DEFAULT_SIZE_WARN_BYTES)]
    pub warn_bytes: u64,

    /// Log level for stderr output (error, warn, info, debug, trace)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: String,
}

#[derive(Parser, Debug)]
#[command(after_long_help = r#"EXAMPLES:
  Simple:          codeindex search "user store"
  Top 3:           codeindex search "vote service" --limit 3
  One category:    codeindex search "button" --category components

NOTES:
  - Requires an index. Build one first: codeindex build -d .
  - Prints a header line followed by a JSON array of {file, score}
  - Falls back to semantic terms when no token matches
"#)]
pub struct SearchArgs {
    /// Free-text query
    pub query: String,

    #[command(flatten)]
    pub location: IndexLocation,

    /// Maximum results
    #[arg(short, long, default_value = "10")]
    pub limit: usize,

    /// Only return files of this category
    #[arg(long)]
    pub category: Option<String>,
}

#[derive(Parser, Debug)]
pub struct StatsArgs {
    #[command(flatten)]
    pub location: IndexLocation,
}

#[derive(Parser, Debug)]
pub struct EmbedArgs {
    #[command(flatten)]
    pub location: IndexLocation,

    /// Embedding dimensions
    #[arg(long, default_value = "128")]
    pub dims: usize,

    /// Output file (default: semantic-vectors.json next to the index)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct DuplicatesArgs {
    #[command(flatten)]
    pub location: IndexLocation,

    /// Maximum Hamming distance for a pair to count as a near-duplicate
    #[arg(long, default_value = "3")]
    pub max_distance: u32,
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub location: IndexLocation,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "INDEX_PORT", default_value = "3001")]
    pub port: u16,

    /// Base URL of an external ANN backend; brute force only when unset
    #[arg(long, env = "ANN_BACKEND_URL")]
    pub ann_url: Option<String>,

    /// Per-call ANN timeout in milliseconds
    #[arg(long, env = "ANN_TIMEOUT_MS", default_value = "2000")]
    pub ann_timeout_ms: u64,

    /// Log level for stderr output (error, warn, info, debug, trace)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}
