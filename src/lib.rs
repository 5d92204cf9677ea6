//! # codeindex: semantic index and search over a codebase
//!
//! Walks a source tree, extracts tokens, categories, summaries and 64-bit
//! simhash fingerprints per file, and persists everything as one JSON index.
//! The index is kept current from git history, queried lexically with
//! density ranking, and served over HTTP together with a vector search that
//! prefers an external ANN backend and falls back to brute force.
//!
//! ## Library usage
//!
//! The binary is a thin CLI over this library; benches and integration tests
//! use the same entry points.
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use codeindex::{BuildOptions, ExtractorRegistry, QueryOptions};
//!
//! let opts = BuildOptions::new(".");
//! let store = codeindex::build_index(&opts, &ExtractorRegistry::default(), &AtomicBool::new(false))?;
//! let results = codeindex::search(&store, "user store", &QueryOptions::default());
//! for hit in results.hits {
//!     println!("{} {:.2}", hit.file, hit.score);
//! }
//! # Ok::<(), codeindex::IndexError>(())
//! ```

pub mod builder;
pub mod error;
pub mod features;
pub mod fingerprint;
pub mod git;
pub mod incremental;
pub mod index;
pub mod query;
pub mod server;
pub mod store;
pub mod vector;

pub use builder::{BuildOptions, BuildReport, build_and_save, build_index};
pub use error::{IndexError, ValidationError};
pub use features::{ContentExtractor, ExtractorRegistry};
pub use fingerprint::{Fingerprint, NearDuplicate, near_duplicates};
pub use git::{ChangeSource, GitCli};
pub use incremental::{UpdateOptions, UpdateReport, update_index};
pub use index::{default_index_path, load_index, save_index, vectors_path_for};
pub use query::{QueryOptions, SearchHit, SearchResults, search};
pub use store::{FileEntry, IndexStore};
pub use vector::{VectorGateway, VectorStore};
