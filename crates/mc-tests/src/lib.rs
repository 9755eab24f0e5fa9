//! Shared fixtures for the integration tests and benchmarks.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use mc_blobs::{CancellationToken, FileBlobsManager, Result};
use mc_codec::checksum_of;
use mc_types::{BlobId, METADATA_FILE_NAME, StorageFolderConfig, StorageFolderStatus};
use tempfile::TempDir;

/// A store whose folders live in temporary directories.
pub struct TestStore {
    pub manager: FileBlobsManager,
    pub dirs: Vec<TempDir>,
}

impl TestStore {
    /// One folder per entry of `maximum_sizes`, registered in order.
    pub async fn with_folders(maximum_sizes: &[u64]) -> Self {
        let manager = FileBlobsManager::new();
        let mut dirs = Vec::new();
        for maximum_size in maximum_sizes {
            let dir = tempfile::tempdir().unwrap();
            manager
                .add_storage_folder(&StorageFolderConfig::new(dir.path(), *maximum_size))
                .await
                .unwrap();
            dirs.push(dir);
        }
        Self { manager, dirs }
    }

    pub fn path(&self, folder: usize) -> &Path {
        self.dirs[folder].path()
    }

    /// Add `content` with its correct checksum and length.
    pub async fn add(&self, content: &[u8]) -> Result<BlobId> {
        add(&self.manager, content).await
    }

    /// Status of the folder at `path`.
    pub fn status_of(&self, path: &Path) -> Option<StorageFolderStatus> {
        status_of(&self.manager, path)
    }
}

pub async fn add(manager: &FileBlobsManager, content: &[u8]) -> Result<BlobId> {
    manager
        .add_blob(
            Cursor::new(content.to_vec()),
            content.len() as u64,
            checksum_of(content),
            &CancellationToken::new(),
        )
        .await
}

pub fn status_of(manager: &FileBlobsManager, path: &Path) -> Option<StorageFolderStatus> {
    manager
        .storage_folder_status()
        .into_iter()
        .find(|status| status.path == path)
}

/// Deterministic, barely compressible content.
pub fn content(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state.to_le_bytes()[0]
        })
        .collect()
}

/// Every blob file under `dir`, the metadata file excluded.
pub fn blob_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    collect_files(dir, &mut files);
    files.retain(|path| path.file_name().is_none_or(|name| name != METADATA_FILE_NAME));
    files.sort();
    files
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, files);
        } else {
            files.push(path);
        }
    }
}

/// Every folder respects its maximum size.
pub fn assert_within_capacity(manager: &FileBlobsManager) {
    for status in manager.storage_folder_status() {
        assert!(
            status.current_size <= status.maximum_size,
            "{} holds {} bytes for a maximum of {}",
            status.path.display(),
            status.current_size,
            status.maximum_size
        );
    }
}
