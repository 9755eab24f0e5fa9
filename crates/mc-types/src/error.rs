/// Errors raised while parsing the textual forms of the shared types.
///
/// ```text
///   TypeError
///   ├── InvalidChecksum  ← not 32 hex characters
///   └── InvalidBlobId    ← not a UUID
/// ```
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    #[error("invalid checksum {text:?}: expected 32 hexadecimal characters")]
    InvalidChecksum { text: String },

    #[error("invalid blob identifier {text:?}")]
    InvalidBlobId { text: String },
}
