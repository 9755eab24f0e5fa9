use std::path::PathBuf;

/// Errors raised while writing or reading blob content files.
///
/// ```text
///   CodecError
///   ├── Create   ← blob file (or its parent directories) cannot be created
///   ├── Open     ← existing blob file cannot be opened
///   └── Io       ← zstd stream or file I/O failure mid-stream
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("cannot create blob file {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open blob file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
