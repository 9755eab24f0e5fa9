use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mc_types::{BlobId, FolderMetadata, StorageFolderStatus, blob_path};

use crate::record::BlobRecord;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct FolderId(u32);

impl FolderId {
    pub(crate) const fn new(raw: u32) -> Self {
        Self(raw)
    }
}

/// One registered storage folder and the records of the files it holds.
///
/// `current_size` always equals the sum of the records' `compressed_size`
/// plus `zombies_size`. Every mutation of the record set bumps
/// `generation` so the persister can tell which folders are dirty.
pub(crate) struct StorageFolder {
    pub id: FolderId,
    /// Path as configured by the user, reported back in status.
    pub user_path: PathBuf,
    /// Canonical path, used for identity and file access.
    pub path: PathBuf,
    pub maximum_size: u64,
    /// Being emptied by a remove or shrink: receives no new content.
    pub draining: bool,
    current_size: u64,
    zombies_size: u64,
    files: BTreeMap<BlobId, BlobRecord>,
    generation: u64,
    saved_generation: u64,
}

impl StorageFolder {
    pub(crate) fn new(id: FolderId, user_path: PathBuf, path: PathBuf, maximum_size: u64) -> Self {
        Self {
            id,
            user_path,
            path,
            maximum_size,
            draining: false,
            current_size: 0,
            zombies_size: 0,
            files: BTreeMap::new(),
            generation: 0,
            saved_generation: 0,
        }
    }

    pub(crate) fn current_size(&self) -> u64 {
        self.current_size
    }

    pub(crate) fn zombies_size(&self) -> u64 {
        self.zombies_size
    }

    pub(crate) fn free_space(&self) -> u64 {
        self.maximum_size.saturating_sub(self.current_size)
    }

    pub(crate) fn blob_path(&self, id: &BlobId) -> PathBuf {
        blob_path(&self.path, id)
    }

    pub(crate) fn file(&self, id: &BlobId) -> Option<&BlobRecord> {
        self.files.get(id)
    }

    pub(crate) fn file_mut(&mut self, id: &BlobId) -> Option<&mut BlobRecord> {
        self.files.get_mut(id)
    }

    pub(crate) fn files(&self) -> impl Iterator<Item = &BlobRecord> {
        self.files.values()
    }

    pub(crate) fn file_count(&self) -> usize {
        self.files.len()
    }

    pub(crate) fn add_file(&mut self, record: BlobRecord) {
        self.current_size += record.compressed_size;
        if let Some(previous) = self.files.insert(record.id, record) {
            self.current_size -= previous.compressed_size;
        }
        self.generation += 1;
    }

    pub(crate) fn remove_file(&mut self, id: &BlobId) -> Option<BlobRecord> {
        let record = self.files.remove(id)?;
        self.current_size -= record.compressed_size;
        self.generation += 1;
        Some(record)
    }

    /// Adjust the accounted size of a record (placeholder → final size).
    pub(crate) fn resize_file(&mut self, id: &BlobId, compressed_size: u64) {
        if let Some(record) = self.files.get_mut(id) {
            self.current_size = self.current_size - record.compressed_size + compressed_size;
            record.compressed_size = compressed_size;
            self.generation += 1;
        }
    }

    /// Account for a file that could not be deleted.
    pub(crate) fn count_zombies(&mut self, bytes: u64) {
        self.zombies_size += bytes;
        self.current_size += bytes;
    }

    pub(crate) fn needs_saving(&self) -> bool {
        self.generation != self.saved_generation
    }

    /// Metadata snapshot and the generation it reflects.
    pub(crate) fn metadata(&self) -> (FolderMetadata, u64) {
        let files = self.files.values().filter_map(BlobRecord::to_entry).collect();
        (FolderMetadata { files }, self.generation)
    }

    /// Mark the folder clean if nothing changed since the snapshot was taken.
    pub(crate) fn mark_saved(&mut self, generation: u64) {
        if self.generation == generation {
            self.saved_generation = generation;
        }
    }

    /// Consider the current records as matching what is on disk.
    pub(crate) fn mark_clean(&mut self) {
        self.saved_generation = self.generation;
    }

    pub(crate) fn status(&self) -> StorageFolderStatus {
        StorageFolderStatus {
            path: self.user_path.clone(),
            current_size: self.current_size,
            zombies_size: self.zombies_size,
            maximum_size: self.maximum_size,
        }
    }

    pub(crate) fn has_path(&self, path: &Path) -> bool {
        self.path == path
    }
}
