//! Index storage: locate, save and load the persisted JSON index.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{info, warn};

use crate::error::IndexError;
use crate::store::IndexStore;

/// Directory (relative to the corpus root) holding the index artifacts.
pub const INDEX_DIR_NAME: &str = "ai-index";
pub const INDEX_FILE_NAME: &str = "codebase-index.json";
pub const VECTORS_FILE_NAME: &str = "semantic-vectors.json";

/// Serialized size above which a save logs a warning.
pub const DEFAULT_SIZE_WARN_BYTES: u64 = 20_000_000;

/// `<root>/ai-index/codebase-index.json`
pub fn default_index_path(root: &Path) -> PathBuf {
    root.join(INDEX_DIR_NAME).join(INDEX_FILE_NAME)
}

/// Vectors live next to the index file.
pub fn vectors_path_for(index_path: &Path) -> PathBuf {
    index_path
        .parent()
        .map(|p| p.join(VECTORS_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(VECTORS_FILE_NAME))
}

/// Write `bytes` to `<path>.tmp`, then rename over `path`.
///
/// Readers see either the old file or the new one, never a partial write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Outcome of a successful save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub bytes: u64,
    pub oversized: bool,
}

/// Validate, serialize as pretty JSON and persist atomically.
///
/// On a validation failure nothing is written and the existing file is untouched.
pub fn save_index(store: &IndexStore, path: &Path, warn_bytes: u64) -> Result<SaveReport, IndexError> {
    let start = Instant::now();
    store.validate()?;

    let json = serde_json::to_vec_pretty(store)?;
    write_atomic(path, &json)?;

    let bytes = json.len() as u64;
    let oversized = bytes > warn_bytes;
    if oversized {
        warn!(
            path = %path.display(),
            bytes,
            threshold = warn_bytes,
            "index exceeds size threshold; prefer `codeindex update` over full rebuilds"
        );
    }
    info!(
        path = %path.display(),
        files = store.len(),
        bytes,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "index saved"
    );
    Ok(SaveReport { bytes, oversized })
}

/// Load and validate a persisted index.
///
/// A missing file is `IndexNotFound`; unparsable JSON is `IndexLoad`; a
/// structurally broken or dangling-reference document is `Validation`.
pub fn load_index(path: &Path) -> Result<IndexStore, IndexError> {
    let path_str = path.display().to_string();
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(IndexError::IndexNotFound { path: path_str });
        }
        Err(e) => {
            return Err(IndexError::IndexLoad {
                path: path_str,
                message: format!("cannot read file: {}", e),
            });
        }
    };

    let value: serde_json::Value = serde_json::from_slice(&raw).map_err(|e| IndexError::IndexLoad {
        path: path_str.clone(),
        message: format!("invalid JSON: {}", e),
    })?;
    IndexStore::validate_raw(&value)?;

    let store: IndexStore = serde_json::from_value(value).map_err(|e| IndexError::IndexLoad {
        path: path_str,
        message: format!("deserialization failed: {}", e),
    })?;
    store.validate()?;
    Ok(store)
}
