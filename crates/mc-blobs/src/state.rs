use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use mc_types::BlobId;
use tokio::sync::watch;
use tracing::debug;

use crate::folder::{FolderId, StorageFolder};
use crate::index::BlobIndex;
use crate::pin::{PinId, PinSignal};
use crate::record::{BlobRecord, RecordState};

/// A copied blob waiting for its source record to become unpinned.
pub(crate) struct PendingMove {
    pub from: FolderId,
    pub to: FolderId,
    pub signal: PinSignal,
}

/// A file to delete once the state lock is released.
pub(crate) struct DoomedFile {
    pub folder: FolderId,
    pub path: PathBuf,
    pub bytes: u64,
}

/// Everything guarded by the store's state mutex.
///
/// Methods here never block and never touch the filesystem: file deletions
/// are queued in `doomed` and performed by the caller after unlocking.
#[derive(Default)]
pub(crate) struct State {
    pub folders: BTreeMap<FolderId, StorageFolder>,
    pub index: BlobIndex,
    pub pending_moves: HashMap<BlobId, PendingMove>,
    doomed: Vec<DoomedFile>,
    next_folder: u32,
    next_pin: u64,
}

impl State {
    pub(crate) fn new_pin(&mut self) -> PinSignal {
        self.next_pin += 1;
        PinSignal::new(PinId::new(self.next_pin))
    }

    pub(crate) fn next_folder_id(&mut self) -> FolderId {
        self.next_folder += 1;
        FolderId::new(self.next_folder)
    }

    pub(crate) fn folder_by_path(&self, path: &Path) -> Option<&StorageFolder> {
        self.folders.values().find(|folder| folder.has_path(path))
    }

    pub(crate) fn folder_id_by_path(&self, path: &Path) -> Option<FolderId> {
        self.folder_by_path(path).map(|folder| folder.id)
    }

    /// The indexed record of `id`, placeholders included.
    pub(crate) fn live(&self, id: &BlobId) -> Option<(FolderId, &BlobRecord)> {
        let folder = self.index.lookup(id)?;
        let record = self.folders.get(&folder)?.file(id)?;
        Some((folder, record))
    }

    pub(crate) fn live_mut(&mut self, id: &BlobId) -> Option<&mut BlobRecord> {
        let folder = self.index.lookup(id)?;
        self.folders.get_mut(&folder)?.file_mut(id)
    }

    /// The indexed record of `id` if it is visible to callers.
    pub(crate) fn ready(&self, id: &BlobId) -> Option<(FolderId, &BlobRecord)> {
        self.live(id).filter(|(_, record)| record.is_ready())
    }

    pub(crate) fn ready_mut(&mut self, id: &BlobId) -> Option<&mut BlobRecord> {
        self.live_mut(id).filter(|record| record.is_ready())
    }

    /// Folder accepting new content with the most free space, if any has
    /// at least `bytes` free. Folders being drained never receive content.
    pub(crate) fn folder_with_room(&self, bytes: u64) -> Option<FolderId> {
        self.folders
            .values()
            .filter(|folder| !folder.draining && folder.free_space() >= bytes)
            .max_by_key(|folder| folder.free_space())
            .map(|folder| folder.id)
    }

    /// Register a new live record: folder, id index and checksum chain.
    pub(crate) fn insert_live(&mut self, folder: FolderId, record: BlobRecord) -> Result<(), FolderId> {
        self.index.insert(record.id, folder)?;
        self.index.link(record.checksum, record.id);
        if let Some(storage) = self.folders.get_mut(&folder) {
            storage.add_file(record);
        }
        Ok(())
    }

    /// Forget a live record and queue its file for deletion.
    pub(crate) fn remove_live(&mut self, id: &BlobId) -> Option<BlobRecord> {
        let folder = self.index.remove(id)?;
        let storage = self.folders.get_mut(&folder)?;
        let record = storage.remove_file(id)?;
        self.index.unlink(&record.checksum, id);
        let path = storage.blob_path(id);
        self.doom(folder, path, record.compressed_size);
        Some(record)
    }

    pub(crate) fn doom(&mut self, folder: FolderId, path: PathBuf, bytes: u64) {
        self.doomed.push(DoomedFile { folder, path, bytes });
    }

    pub(crate) fn take_doomed(&mut self) -> Vec<DoomedFile> {
        std::mem::take(&mut self.doomed)
    }

    pub(crate) fn count_zombies(&mut self, folder: FolderId, bytes: u64) {
        if let Some(storage) = self.folders.get_mut(&folder) {
            storage.count_zombies(bytes);
        }
    }

    /// Drop pin `pin` from the live record of `id`.
    pub(crate) fn unpin(&mut self, id: &BlobId, pin: PinId) {
        if let Some(record) = self.live_mut(id) {
            record.pins.remove(pin);
        }
    }

    /// Conclude the pending move of `id`, if any, once its source is idle.
    pub(crate) fn check_pending_move(&mut self, id: &BlobId) {
        let Some(pending) = self.pending_moves.get(id) else {
            return;
        };
        let idle = self
            .folders
            .get(&pending.from)
            .and_then(|folder| folder.file(id))
            .is_none_or(|record| record.pins.is_empty());
        if idle {
            if let Some(pending) = self.pending_moves.remove(id) {
                self.conclude_move(*id, pending.from, pending.to, pending.signal);
            }
        }
    }

    /// Switch `id` over to the copy in `to`, or defer if the source is
    /// still pinned.
    pub(crate) fn conclude_move(&mut self, id: BlobId, from: FolderId, to: FolderId, signal: PinSignal) {
        let source = self.folders.get(&from).and_then(|folder| folder.file(&id));
        match source {
            None => {
                // Deleted while we were copying.
                self.discard_shadow(&id, to);
                signal.release();
            }
            Some(record) if !record.pins.is_empty() => {
                debug!(blob = %id, pins = record.pins.len(), "blob still in use, move deferred");
                self.pending_moves.insert(id, PendingMove { from, to, signal });
            }
            Some(_) => {
                let Some(storage) = self.folders.get_mut(&from) else {
                    return;
                };
                let Some(source) = storage.remove_file(&id) else {
                    return;
                };
                let path = storage.blob_path(&id);
                self.doom(from, path, source.compressed_size);
                if let Some(shadow) = self.folders.get_mut(&to).and_then(|folder| folder.file_mut(&id)) {
                    shadow.state = RecordState::Ready;
                    shadow.reference_count = source.reference_count;
                    shadow.pins.clear();
                }
                self.index.relocate(id, to);
                debug!(blob = %id, "blob moved");
                signal.release();
            }
        }
    }

    /// Remove the move shadow of `id` in `folder` and queue its file.
    pub(crate) fn discard_shadow(&mut self, id: &BlobId, folder: FolderId) {
        let Some(storage) = self.folders.get_mut(&folder) else {
            return;
        };
        if storage.file(id).is_some_and(|record| record.state == RecordState::Moving) {
            if let Some(shadow) = storage.remove_file(id) {
                let path = storage.blob_path(id);
                self.doom(folder, path, shadow.compressed_size);
            }
        }
    }

    pub(crate) fn pending_move_waiters(&self) -> Vec<watch::Receiver<bool>> {
        self.pending_moves.values().map(|pending| pending.signal.waiter()).collect()
    }

    /// Give up on every deferred move and stop draining folders.
    pub(crate) fn finish_evacuation(&mut self) {
        let pending: Vec<(BlobId, PendingMove)> = self.pending_moves.drain().collect();
        for (id, pending) in pending {
            self.discard_shadow(&id, pending.to);
            pending.signal.release();
        }
        for folder in self.folders.values_mut() {
            folder.draining = false;
        }
    }
}
