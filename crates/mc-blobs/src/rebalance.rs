//! Folder evacuation: move blobs out of a folder being removed or shrunk.
//!
//! Each pass plans under the state lock, copies outside of it, and then
//! waits for what it could not finish (ingestions into the folder, moves
//! deferred by readers). Passes repeat until the folder fits its new
//! maximum size or holds nothing anymore.
//!
//! ```text
//!   source record ──pin──► copy to destination (shadow, not indexed)
//!                          │
//!                          ├─ source unpinned → swap: index → destination,
//!                          │                    source file deleted
//!                          └─ source in use   → pending move, concluded by
//!                                               the last unpin
//! ```

use std::path::{Path, PathBuf};

use mc_types::{BlobId, FolderMetadata, StorageFolderConfig};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{BlobStoreError, Result};
use crate::folder::FolderId;
use crate::manager::{FileBlobsManager, join_error};
use crate::pin::{PinSignal, wait_released};
use crate::record::BlobRecord;
use crate::registry::{lookup_path, write_metadata};
use crate::state::State;

#[derive(Clone, Copy, Debug)]
enum Evacuation {
    Remove,
    Shrink { maximum_size: u64 },
}

enum Plan {
    /// Folder emptied and unregistered.
    Removed { path: PathBuf },
    /// Folder fits its new maximum size, which is now applied.
    Resized,
    Move {
        source: FolderId,
        victims: Vec<BlobId>,
        waiters: Vec<watch::Receiver<bool>>,
    },
}

struct MoveJob {
    to: FolderId,
    from_path: PathBuf,
    to_path: PathBuf,
    copy_pin: PinSignal,
    move_pin: PinSignal,
}

impl FileBlobsManager {
    /// Move every blob of the folder at `path` to the other folders, then
    /// unregister it.
    ///
    /// The folder stops receiving new blobs immediately. Blobs locked by
    /// readers are moved once their locks are released, so this waits for
    /// them.
    ///
    /// # Errors
    ///
    /// - [`BlobStoreError::UnknownFolder`] if no folder is registered at `path`.
    /// - [`BlobStoreError::StorageFull`] if the other folders cannot hold
    ///   the content. Blobs already moved stay where they are.
    pub async fn remove_storage_folder(&self, path: &Path) -> Result<()> {
        let path = lookup_path(path);
        let _admin = self.shared.admin.lock().await;
        let result = self.evacuate(&path, Evacuation::Remove).await;
        self.shared.update(State::finish_evacuation);

        if let Some(removed) = result? {
            // Leave an empty index behind so a later re-add starts clean.
            let written = tokio::task::spawn_blocking(move || {
                write_metadata(&removed, &FolderMetadata::default())
            })
            .await
            .map_err(join_error)?;
            if let Err(e) = written {
                warn!(path = %path.display(), error = %e, "cannot clear metadata of removed storage folder");
            }
            info!(path = %path.display(), "storage folder removed");
        }
        Ok(())
    }

    /// Change the maximum size of a registered folder, moving blobs out of
    /// it first if it currently holds more than the new maximum.
    ///
    /// # Errors
    ///
    /// - [`BlobStoreError::UnknownFolder`] if no folder is registered at
    ///   the configured path.
    /// - [`BlobStoreError::StorageFull`] if the excess does not fit in the
    ///   other folders.
    /// - [`BlobStoreError::InvalidOperation`] for a zero maximum size, or if
    ///   the folder cannot shrink enough (space held by zombie files).
    pub async fn update_storage_folder(&self, config: &StorageFolderConfig) -> Result<()> {
        if config.maximum_size == 0 {
            return Err(BlobStoreError::InvalidOperation(format!(
                "maximum size of {} must be greater than zero",
                config.path.display()
            )));
        }
        let path = lookup_path(&config.path);
        let _admin = self.shared.admin.lock().await;
        let evacuation = Evacuation::Shrink {
            maximum_size: config.maximum_size,
        };
        let result = self.evacuate(&path, evacuation).await;
        self.shared.update(State::finish_evacuation);
        result?;
        info!(path = %config.path.display(), maximum_size = config.maximum_size, "storage folder updated");
        Ok(())
    }

    /// Run passes until done. Returns the canonical path of the folder if
    /// it was unregistered.
    async fn evacuate(&self, path: &Path, evacuation: Evacuation) -> Result<Option<PathBuf>> {
        loop {
            match self.shared.update(|state| state.plan_evacuation(path, evacuation))? {
                Plan::Removed { path } => return Ok(Some(path)),
                Plan::Resized => return Ok(None),
                Plan::Move {
                    source,
                    victims,
                    mut waiters,
                } => {
                    self.move_blobs(source, victims).await?;
                    waiters.extend(self.shared.lock().pending_move_waiters());
                    wait_released(waiters).await;
                }
            }
        }
    }

    async fn move_blobs(&self, source: FolderId, victims: Vec<BlobId>) -> Result<()> {
        for id in victims {
            let Some(job) = self.shared.update(|state| state.prepare_move(source, &id))? else {
                continue;
            };

            let copied = copy_blob(&job.from_path, &job.to_path).await;

            let MoveJob {
                to,
                copy_pin,
                move_pin,
                ..
            } = job;
            self.shared.update(|state| {
                state.unpin(&id, copy_pin.id());
                copy_pin.release();
                match copied {
                    Ok(()) => {
                        state.conclude_move(id, source, to, move_pin);
                        Ok(())
                    }
                    Err(e) => {
                        warn!(blob = %id, error = %e, "cannot copy blob to its new storage folder");
                        state.discard_shadow(&id, to);
                        move_pin.release();
                        state.check_pending_move(&id);
                        Err(e)
                    }
                }
            })?;
        }
        Ok(())
    }
}

async fn copy_blob(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(from, to).await?;
    Ok(())
}

impl State {
    fn plan_evacuation(&mut self, path: &Path, evacuation: Evacuation) -> Result<Plan> {
        let source = self
            .folder_id_by_path(path)
            .ok_or_else(|| BlobStoreError::UnknownFolder(path.to_path_buf()))?;
        let available: u64 = self
            .folders
            .values()
            .filter(|folder| folder.id != source && !folder.draining)
            .map(|folder| folder.free_space())
            .sum();
        let pending = !self.pending_moves.is_empty();

        let folder = self
            .folders
            .get_mut(&source)
            .ok_or_else(|| BlobStoreError::UnknownFolder(path.to_path_buf()))?;
        folder.draining = true;
        debug!(path = %path.display(), blobs = folder.file_count(), "evacuation pass");

        let needed = match evacuation {
            Evacuation::Remove => folder.current_size().saturating_sub(folder.zombies_size()),
            Evacuation::Shrink { maximum_size } => folder.current_size().saturating_sub(maximum_size),
        };
        if needed > available {
            return Err(BlobStoreError::StorageFull(format!(
                "other storage folders have {available} bytes free but {} needs {needed} bytes moved out",
                path.display()
            )));
        }

        let mut victims = Vec::new();
        let mut waiters = Vec::new();
        let mut covered = 0;
        for record in folder.files() {
            if covered >= needed {
                break;
            }
            if record.is_ready() {
                victims.push(record.id);
            } else {
                waiters.extend(record.pins.waiters());
            }
            covered += record.compressed_size;
        }

        if victims.is_empty() && waiters.is_empty() && !pending {
            return match evacuation {
                Evacuation::Remove => {
                    let removed = self.folders.remove(&source).map(|folder| folder.path);
                    Ok(Plan::Removed {
                        path: removed.unwrap_or_else(|| path.to_path_buf()),
                    })
                }
                Evacuation::Shrink { maximum_size } => {
                    if folder.current_size() > maximum_size {
                        return Err(BlobStoreError::InvalidOperation(format!(
                            "{} holds {} bytes that cannot be moved out, cannot shrink it to {maximum_size} bytes",
                            path.display(),
                            folder.current_size()
                        )));
                    }
                    folder.maximum_size = maximum_size;
                    Ok(Plan::Resized)
                }
            };
        }

        Ok(Plan::Move {
            source,
            victims,
            waiters,
        })
    }

    /// Pin the source of `id` and create its shadow in a destination
    /// folder. `None` when the blob no longer needs moving.
    fn prepare_move(&mut self, source: FolderId, id: &BlobId) -> Result<Option<MoveJob>> {
        if self.pending_moves.contains_key(id) || self.index.lookup(id) != Some(source) {
            return Ok(None);
        }
        let Some(record) = self.folders.get(&source).and_then(|folder| folder.file(id)) else {
            return Ok(None);
        };
        if !record.is_ready() {
            return Ok(None);
        }
        let record = record.clone();

        let to = self.folder_with_room(record.compressed_size).ok_or_else(|| {
            BlobStoreError::StorageFull(format!(
                "no storage folder has {} bytes free to receive blob {id}",
                record.compressed_size
            ))
        })?;

        let copy_pin = self.new_pin();
        let move_pin = self.new_pin();
        if let Some(live) = self.live_mut(id) {
            live.pins.add(copy_pin.handle());
        }
        let from_path = self.folders[&source].blob_path(id);
        let destination = self
            .folders
            .get_mut(&to)
            .ok_or_else(|| BlobStoreError::UnknownFolder(PathBuf::new()))?;
        destination.add_file(BlobRecord::shadow(&record, move_pin.handle()));
        let to_path = destination.blob_path(id);

        Ok(Some(MoveJob {
            to,
            from_path,
            to_path,
            copy_pin,
            move_pin,
        }))
    }
}
