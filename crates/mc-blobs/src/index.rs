use std::collections::HashMap;

use mc_types::{BlobId, Checksum};

use crate::folder::FolderId;

/// Global lookups over every registered folder.
///
/// `by_id` maps a blob to the folder holding its live record; move shadows
/// are never indexed. `by_checksum` keeps, per checksum, the blobs sharing
/// it in insertion order, ingestion placeholders included.
#[derive(Default)]
pub(crate) struct BlobIndex {
    by_id: HashMap<BlobId, FolderId>,
    by_checksum: HashMap<Checksum, Vec<BlobId>>,
}

impl BlobIndex {
    pub(crate) fn lookup(&self, id: &BlobId) -> Option<FolderId> {
        self.by_id.get(id).copied()
    }

    /// Insert a new blob. Returns the folder already holding `id` if any.
    pub(crate) fn insert(&mut self, id: BlobId, folder: FolderId) -> Result<(), FolderId> {
        match self.by_id.get(&id) {
            Some(existing) => Err(*existing),
            None => {
                self.by_id.insert(id, folder);
                Ok(())
            }
        }
    }

    /// Point an existing blob at a new folder after a move.
    pub(crate) fn relocate(&mut self, id: BlobId, folder: FolderId) {
        self.by_id.insert(id, folder);
    }

    pub(crate) fn remove(&mut self, id: &BlobId) -> Option<FolderId> {
        self.by_id.remove(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    pub(crate) fn chain(&self, checksum: &Checksum) -> &[BlobId] {
        self.by_checksum.get(checksum).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn link(&mut self, checksum: Checksum, id: BlobId) {
        self.by_checksum.entry(checksum).or_default().push(id);
    }

    pub(crate) fn unlink(&mut self, checksum: &Checksum, id: &BlobId) {
        if let Some(chain) = self.by_checksum.get_mut(checksum) {
            chain.retain(|linked| linked != id);
            if chain.is_empty() {
                self.by_checksum.remove(checksum);
            }
        }
    }
}
