#![warn(clippy::pedantic)]

pub mod checksum;
pub mod error;
pub mod folder;
pub mod id;
pub mod metadata;

pub use checksum::Checksum;
pub use error::TypeError;
pub use folder::{StorageFolderConfig, StorageFolderStatus};
pub use id::BlobId;
pub use metadata::{BlobEntry, FolderMetadata, METADATA_FILE_NAME, blob_path};
