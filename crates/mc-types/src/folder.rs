use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration of one storage folder: where it lives and how many bytes
/// of compressed blobs it may hold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageFolderConfig {
    /// Path as provided by the operator. Relative paths are resolved
    /// against the current directory when the folder is added.
    pub path: PathBuf,

    /// Maximum number of bytes blob files may occupy in the folder.
    pub maximum_size: u64,
}

impl StorageFolderConfig {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, maximum_size: u64) -> Self {
        Self {
            path: path.into(),
            maximum_size,
        }
    }
}

/// Point-in-time view of a storage folder.
///
/// ```text
/// ┌───────────────┬──────────────────────────────────────────────────┐
/// │ Field         │ Meaning                                          │
/// ├───────────────┼──────────────────────────────────────────────────┤
/// │ path          │ Path as the operator configured it               │
/// │ current_size  │ Compressed bytes of its blobs, zombies included  │
/// │ zombies_size  │ Bytes of files that failed to delete             │
/// │ maximum_size  │ Configured capacity                              │
/// └───────────────┴──────────────────────────────────────────────────┘
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageFolderStatus {
    pub path: PathBuf,
    pub current_size: u64,
    pub zombies_size: u64,
    pub maximum_size: u64,
}

impl StorageFolderStatus {
    /// Fraction of the capacity in use (`0.0` empty, `1.0` full).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fullness(&self) -> f64 {
        if self.maximum_size == 0 {
            return 1.0;
        }
        self.current_size as f64 / self.maximum_size as f64
    }
}
