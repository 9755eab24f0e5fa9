use std::path::PathBuf;

use mc_codec::CodecError;
use mc_types::{BlobId, Checksum};

pub type Result<T> = std::result::Result<T, BlobStoreError>;

/// Errors returned by [`FileBlobsManager`](crate::FileBlobsManager).
///
/// ```text
///   BlobStoreError
///   ├── StorageFull        ← no folder (or combination of folders) has room
///   ├── ChecksumMismatch   ← declared checksum differs from the content's
///   ├── SizeMismatch       ← stream length differs from the declared length
///   ├── NotFound           ← unknown blob identifier
///   ├── InvalidOperation   ← misuse: decrement below zero, non-empty new folder…
///   ├── DuplicateFolder    ← folder already registered (maybe through a symlink)
///   ├── UnknownFolder      ← no registered folder at that path
///   ├── IndexConflict      ← same blob id found in two folders while loading
///   ├── Cancelled          ← ingestion cancelled by the caller
///   ├── Codec(CodecError)  ← from mc-codec
///   ├── Metadata           ← folder metadata cannot be (de)serialized
///   └── Io                 ← directory handling
/// ```
#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("storage full: {0}")]
    StorageFull(String),

    #[error("checksum mismatch: declared {expected} but content hashes to {actual}")]
    ChecksumMismatch { expected: Checksum, actual: Checksum },

    #[error("declared length of {declared} bytes but the stream provided {actual} bytes")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("cannot find any blob with the identifier {0}")]
    NotFound(BlobId),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("storage folder {} is already registered as {}", path.display(), existing.display())]
    DuplicateFolder { path: PathBuf, existing: PathBuf },

    #[error("no storage folder registered at {}", .0.display())]
    UnknownFolder(PathBuf),

    /// A blob of the folder being loaded is already indexed from another
    /// folder. The folder is refused rather than picking a winner.
    #[error("blob {id} of {} is already present in another storage folder", path.display())]
    IndexConflict { id: BlobId, path: PathBuf },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("storage folder metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
