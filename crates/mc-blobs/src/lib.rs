#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod lock;
pub mod manager;
pub mod persist;

mod folder;
mod index;
mod ingest;
mod pin;
mod rebalance;
mod record;
mod recovery;
mod registry;
mod state;

pub use config::{ConfigError, DEFAULT_PERSIST_INTERVAL_SECS, StoreConfig};
pub use error::{BlobStoreError, Result};
pub use ingest::READ_CHUNK_SIZE;
pub use lock::BlobLock;
pub use manager::{BlobInfo, FileBlobsManager};
pub use persist::spawn_periodic_persist;
pub use registry::resolve_storage_path;
pub use tokio_util::sync::CancellationToken;
