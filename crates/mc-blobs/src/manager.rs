use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use mc_types::{BlobId, Checksum};
use tokio::task::JoinError;
use tracing::{debug, error};

use crate::error::{BlobStoreError, Result};
use crate::pin::{PinSignal, wait_released};
use crate::state::{DoomedFile, State};

/// State shared by every clone of a [`FileBlobsManager`].
pub(crate) struct Shared {
    state: Mutex<State>,
    /// Serializes folder administration (add, remove, resize).
    pub(crate) admin: tokio::sync::Mutex<()>,
    /// Serializes metadata writers.
    pub(crate) persist: Mutex<()>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("blob store state lock poisoned")
    }

    /// Run `f` under the state lock, then delete the files it doomed.
    pub(crate) fn update<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let (value, doomed) = {
            let mut state = self.lock();
            let value = f(&mut state);
            (value, state.take_doomed())
        };
        if !doomed.is_empty() {
            self.delete_files(doomed);
        }
        value
    }

    /// Drop an operation's pin from `id`, wake its waiters and let a
    /// deferred move of `id` go through.
    pub(crate) fn release_pin(&self, id: BlobId, signal: PinSignal) {
        self.update(|state| {
            state.unpin(&id, signal.id());
            signal.release();
            state.check_pending_move(&id);
        });
    }

    fn delete_files(&self, doomed: Vec<DoomedFile>) {
        for file in doomed {
            match std::fs::remove_file(&file.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    error!(path = %file.path.display(), error = %e, "failed to delete blob file, counting it as a zombie");
                    self.lock().count_zombies(file.folder, file.bytes);
                }
            }
        }
    }
}

/// Snapshot of one ready blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobInfo {
    pub id: BlobId,
    pub checksum: Checksum,
    pub size: u64,
    pub compressed_size: u64,
    pub reference_count: u64,
    /// Compressed file currently holding the content.
    pub path: PathBuf,
}

/// Content-addressed, deduplicating, compressed blob store spread over a
/// set of storage folders.
///
/// Cloning is cheap and every clone drives the same store.
///
/// ```text
///   add_blob ──► placeholder ──► stream ─┬─► duplicate found → ref +1 on it
///                (reserved)              └─► new blob, ref = 1
///
///   lock_blob ──► (wait until ready) ──► pin ──► read ──► drop → unpin
///   decrease_reference ──► ref 1 and unpinned → file deleted
/// ```
#[derive(Clone)]
pub struct FileBlobsManager {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for FileBlobsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBlobsManager").finish_non_exhaustive()
    }
}

impl Default for FileBlobsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FileBlobsManager {
    /// An empty store. Add storage folders before adding blobs.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                admin: tokio::sync::Mutex::new(()),
                persist: Mutex::new(()),
            }),
        }
    }

    /// Add one reference to an existing blob.
    ///
    /// # Errors
    ///
    /// [`BlobStoreError::NotFound`] if `id` is not a ready blob.
    pub fn increase_reference(&self, id: &BlobId) -> Result<()> {
        self.shared.update(|state| -> Result<()> {
            let record = state.ready_mut(id).ok_or(BlobStoreError::NotFound(*id))?;
            record.reference_count += 1;
            Ok(())
        })
    }

    /// Drop one reference. The last reference deletes the blob, after
    /// waiting for every lock and comparison using it to finish.
    ///
    /// # Errors
    ///
    /// [`BlobStoreError::NotFound`] for an unknown blob and
    /// [`BlobStoreError::InvalidOperation`] if it has no reference left.
    pub async fn decrease_reference(&self, id: &BlobId) -> Result<()> {
        loop {
            let waiters = self.shared.update(|state| -> Result<Option<_>> {
                let record = state.ready_mut(id).ok_or(BlobStoreError::NotFound(*id))?;
                match record.reference_count {
                    0 => Err(BlobStoreError::InvalidOperation(format!(
                        "blob {id} has no reference left to remove"
                    ))),
                    1 if !record.pins.is_empty() => Ok(Some(record.pins.waiters())),
                    1 => {
                        state.remove_live(id);
                        debug!(blob = %id, "last reference removed, blob deleted");
                        Ok(None)
                    }
                    _ => {
                        record.reference_count -= 1;
                        Ok(None)
                    }
                }
            })?;
            match waiters {
                Some(waiters) => wait_released(waiters).await,
                None => return Ok(()),
            }
        }
    }

    /// Information about a ready blob.
    ///
    /// # Errors
    ///
    /// [`BlobStoreError::NotFound`] if `id` is not a ready blob.
    pub fn blob_info(&self, id: &BlobId) -> Result<BlobInfo> {
        let state = self.shared.lock();
        let (folder, record) = state.ready(id).ok_or(BlobStoreError::NotFound(*id))?;
        let path = state.folders[&folder].blob_path(id);
        Ok(BlobInfo {
            id: record.id,
            checksum: record.checksum,
            size: record.size,
            compressed_size: record.compressed_size,
            reference_count: record.reference_count,
            path,
        })
    }

    /// Ids of every ready blob, in no particular order.
    pub fn blob_ids(&self) -> Vec<BlobId> {
        let state = self.shared.lock();
        state
            .folders
            .values()
            .flat_map(|folder| folder.files())
            .filter(|record| record.is_ready())
            .map(|record| record.id)
            .collect()
    }

    /// Number of indexed blobs, ingestions in progress included.
    pub fn blob_count(&self) -> usize {
        self.shared.lock().index.len()
    }
}

pub(crate) fn join_error(e: JoinError) -> BlobStoreError {
    BlobStoreError::Io(io::Error::other(e))
}
