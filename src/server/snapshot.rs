//! Immutable read snapshots and the handle that publishes them.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::error::IndexError;
use crate::index::load_index;
use crate::store::IndexStore;
use crate::vector::VectorStore;

/// Everything one request reads. Never mutated after construction.
#[derive(Debug)]
pub struct Snapshot {
    pub index: IndexStore,
    pub vectors: VectorStore,
    pub loaded_at: DateTime<Utc>,
}

/// Where a snapshot is loaded from.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    pub index_path: PathBuf,
    pub vectors_path: PathBuf,
}

impl SnapshotSource {
    /// Blocking: reads and validates the index, then loads or derives vectors.
    pub fn load(&self) -> Result<Snapshot, IndexError> {
        load_snapshot(&self.index_path, &self.vectors_path)
    }
}

pub fn load_snapshot(index_path: &Path, vectors_path: &Path) -> Result<Snapshot, IndexError> {
    let index = load_index(index_path)?;
    let vectors = VectorStore::load_or_derive(vectors_path, &index)?;
    Ok(Snapshot { index, vectors, loaded_at: Utc::now() })
}

/// Shared pointer to the current snapshot.
///
/// Readers clone the inner `Arc` under a momentary read lock and keep using it
/// for the whole request; `publish` swaps the reference in one write.
#[derive(Clone, Default)]
pub struct SnapshotHandle {
    inner: Arc<RwLock<Option<Arc<Snapshot>>>>,
}

impl SnapshotHandle {
    pub fn new(initial: Option<Snapshot>) -> Self {
        Self { inner: Arc::new(RwLock::new(initial.map(Arc::new))) }
    }

    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&snapshot));
        snapshot
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}
