//! Unified error types for index building, updating and loading.

use thiserror::Error;

/// A structural or referential invariant of the index was violated.
///
/// `field` names the offending part of the structure (e.g. `files.src/a.ts.contentHash`
/// or `tokens.user`) so the failure can be reproduced without a debugger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid index at '{field}': {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

/// All errors that can occur in index operations.
#[derive(Error, Debug)]
pub enum IndexError {
    /// I/O error (file read/write, directory access)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Directory does not exist
    #[error("Directory does not exist: {0}")]
    DirNotFound(String),

    /// No persisted index at the expected location
    #[error("No index found at '{path}'. Build one first:\n  codeindex build")]
    IndexNotFound { path: String },

    /// Failed to load an index from disk
    #[error("Failed to load index from {path}: {message}")]
    IndexLoad { path: String, message: String },

    /// Post-build or post-update validation failed; nothing was persisted
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// `git diff` (or another git query) failed during an incremental update
    #[error("git diff since '{commit}' failed: {message}")]
    DiffFailure { commit: String, message: String },

    /// The index carries no `lastIndexedCommit` to diff against
    #[error("Index has no lastIndexedCommit. Run a full build first:\n  codeindex build")]
    MissingCommit,

    /// A single file could not be read (logged and skipped by batch callers)
    #[error("Failed to process '{path}': {source}")]
    FileProcessing {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The run was interrupted before anything was persisted
    #[error("Cancelled before the index was saved")]
    Cancelled,

    /// Mutually exclusive flags or other argument validation error
    #[error("{0}")]
    InvalidArgs(String),
}
