//! CLI layer: argument parsing, command dispatch, and subcommand implementations.

pub mod args;
pub(crate) mod serve;

pub use args::*;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use codeindex::fingerprint::near_duplicates;
use codeindex::{
    BuildOptions, ExtractorRegistry, GitCli, IndexError, QueryOptions, UpdateOptions, VectorStore,
    build_and_save, load_index, search, update_index,
};

// ─── CLI ─────────────────────────────────────────────────────────────

/// Semantic index and search over a codebase
#[derive(Parser, Debug)]
#[command(name = "codeindex", version, about, after_help = "\
Run 'codeindex <COMMAND> --help' for detailed options and examples.\n\
Common options: -d <DIR> (corpus root), --index <FILE> (index path)")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Build the index from scratch
    Build(BuildArgs),

    /// Patch the index from git changes since the last indexed commit
    Update(UpdateArgs),

    /// Ranked lexical search over the index
    Search(SearchArgs),

    /// Show index statistics as JSON
    Stats(StatsArgs),

    /// Compute hashed embeddings for every indexed file
    Embed(EmbedArgs),

    /// List near-duplicate file pairs by fingerprint distance
    Duplicates(DuplicatesArgs),

    /// Start the HTTP query server
    Serve(ServeArgs),
}

// ─── Main entry point ───────────────────────────────────────────────

pub fn run() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Build(args) => cmd_build(args),
        Commands::Update(args) => cmd_update(args),
        Commands::Search(args) => cmd_search(args),
        Commands::Stats(args) => cmd_stats(args),
        Commands::Embed(args) => cmd_embed(args),
        Commands::Duplicates(args) => cmd_duplicates(args),
        Commands::Serve(args) => serve::cmd_serve(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ─── Shared plumbing ────────────────────────────────────────────────

pub(crate) fn parse_level(level: &str) -> tracing::Level {
    match level.trim().to_ascii_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}

/// Install the stderr subscriber. `RUST_LOG` directives refine `level`.
pub(crate) fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(parse_level(level)).into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    let installed = if json { builder.json().try_init() } else { builder.try_init() };
    if let Err(e) = installed {
        eprintln!("[codeindex] logging already initialized: {}", e);
    }
}

/// Flag raised by Ctrl-C. Batch commands check it between files.
fn cancel_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nCancelling; nothing will be written.");
        handler_flag.store(true, Ordering::Relaxed);
    }) {
        tracing::warn!(error = %e, "could not install Ctrl-C handler");
    }
    flag
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / 1_048_576.0
}

// ─── build / update ─────────────────────────────────────────────────

fn cmd_build(args: BuildArgs) -> Result<(), IndexError> {
    init_logging(&args.log_level, false);
    let cancel = cancel_flag();

    let opts = BuildOptions {
        threads: args.threads,
        hidden: args.hidden,
        no_ignore: args.no_ignore,
        size_warn_bytes: args.warn_bytes,
        ..BuildOptions::new(args.location.root())
    };
    let index_path = args.location.index_path();
    eprintln!("Indexing {} ...", opts.root.display());

    let report = build_and_save(&opts, &ExtractorRegistry::default(), &index_path, &cancel)?;
    eprintln!(
        "Index saved to {} ({} files, {} tokens, {:.1} MB) in {} ms",
        index_path.display(),
        report.files,
        report.tokens,
        megabytes(report.bytes),
        report.elapsed_ms
    );
    if report.oversized {
        eprintln!(
            "Warning: index is larger than {:.1} MB; consider excluding generated sources",
            megabytes(args.warn_bytes)
        );
    }
    Ok(())
}

fn cmd_update(args: UpdateArgs) -> Result<(), IndexError> {
    init_logging(&args.log_level, false);
    let cancel = cancel_flag();

    let root = args.location.root();
    let git = GitCli::new(&root);
    if !git.is_work_tree() {
        return Err(IndexError::InvalidArgs(format!(
            "{} is not inside a git work tree; run `codeindex build` instead",
            root.display()
        )));
    }

    let opts = UpdateOptions {
        since: args.since,
        hidden: args.hidden,
        no_ignore: args.no_ignore,
        threads: args.threads,
        size_warn_bytes: args.warn_bytes,
        ..UpdateOptions::new(&root, args.location.index_path())
    };
    let report = update_index(&opts, &ExtractorRegistry::default(), &git, &cancel)?;
    eprintln!(
        "Updated {}: +{} added, ~{} modified, -{} deleted, {} unchanged, {} skipped ({} -> {})",
        opts.index_path.display(),
        report.added,
        report.modified,
        report.deleted,
        report.unchanged,
        report.skipped,
        report.from_commit.as_deref().unwrap_or("?"),
        report.to_commit.as_deref().unwrap_or("?"),
    );
    Ok(())
}

// ─── search / stats ─────────────────────────────────────────────────

fn cmd_search(args: SearchArgs) -> Result<(), IndexError> {
    if args.query.trim().is_empty() {
        return Err(IndexError::InvalidArgs("query must not be empty".to_string()));
    }
    let store = load_index(&args.location.index_path())?;
    let opts = QueryOptions {
        limit: args.limit,
        category: args.category.clone(),
        ..QueryOptions::default()
    };
    let results = search(&store, &args.query, &opts);

    println!("Search results for \"{}\":", args.query.trim());
    println!("{}", serde_json::to_string_pretty(&results.hits)?);
    Ok(())
}

fn cmd_stats(args: StatsArgs) -> Result<(), IndexError> {
    let store = load_index(&args.location.index_path())?;
    println!("{}", serde_json::to_string_pretty(&store.stats())?);
    Ok(())
}

// ─── embed / duplicates ─────────────────────────────────────────────

fn cmd_embed(args: EmbedArgs) -> Result<(), IndexError> {
    if args.dims == 0 {
        return Err(IndexError::InvalidArgs("--dims must be at least 1".to_string()));
    }
    let store = load_index(&args.location.index_path())?;
    let output = args.output.clone().unwrap_or_else(|| args.location.vectors_path());

    let vectors = VectorStore::build_from_files(&args.location.root(), &store, args.dims);
    vectors.save(&output)?;
    eprintln!(
        "Embedded {} files ({} dims) into {}",
        vectors.len(),
        vectors.dims,
        output.display()
    );
    Ok(())
}

fn cmd_duplicates(args: DuplicatesArgs) -> Result<(), IndexError> {
    let store = load_index(&args.location.index_path())?;
    let pairs = near_duplicates(store.fingerprints(), args.max_distance);
    eprintln!("{} near-duplicate pair(s) within distance {}", pairs.len(), args.max_distance);
    println!("{}", serde_json::to_string_pretty(&pairs)?);
    Ok(())
}
