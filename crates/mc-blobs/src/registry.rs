use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use mc_types::{BlobId, FolderMetadata, METADATA_FILE_NAME, StorageFolderConfig, StorageFolderStatus};
use tracing::{error, info, warn};

use crate::error::{BlobStoreError, Result};
use crate::folder::{FolderId, StorageFolder};
use crate::manager::{FileBlobsManager, join_error};
use crate::record::BlobRecord;
use crate::recovery::{LoadedFolder, load_folder, sweep_zombies};
use crate::state::State;

/// Absolute, canonical form of a storage folder path, creating the
/// directory if it does not exist yet. Relative paths are taken from the
/// current directory.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or resolved.
pub fn resolve_storage_path(path: &Path) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    fs::create_dir_all(&absolute)?;
    fs::canonicalize(&absolute)
}

/// Best-effort canonical form of a path that should already be registered.
pub(crate) fn lookup_path(path: &Path) -> PathBuf {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Atomically replace the metadata file of `folder`.
pub(crate) fn write_metadata(folder: &Path, metadata: &FolderMetadata) -> Result<()> {
    let path = folder.join(METADATA_FILE_NAME);
    let temporary = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(metadata)?;
    let mut file = File::create(&temporary)?;
    file.write_all(&json)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&temporary, &path)?;
    Ok(())
}

impl FileBlobsManager {
    /// Register a storage folder, loading whatever a previous run left in it.
    ///
    /// The directory is created if missing. Blobs found through the
    /// folder's metadata are registered with a reference count of zero;
    /// files the metadata does not know about are deleted.
    ///
    /// # Errors
    ///
    /// - [`BlobStoreError::DuplicateFolder`] if the directory (possibly
    ///   through another path) is already registered.
    /// - [`BlobStoreError::InvalidOperation`] for a zero maximum size, or a
    ///   directory without metadata that already holds files.
    /// - [`BlobStoreError::IndexConflict`] if one of its blobs is already
    ///   held by another folder.
    /// - [`BlobStoreError::Metadata`] if the metadata file is corrupt.
    pub async fn add_storage_folder(&self, config: &StorageFolderConfig) -> Result<()> {
        if config.maximum_size == 0 {
            return Err(BlobStoreError::InvalidOperation(format!(
                "maximum size of {} must be greater than zero",
                config.path.display()
            )));
        }
        let _admin = self.shared.admin.lock().await;

        let requested = config.path.clone();
        let path = tokio::task::spawn_blocking(move || resolve_storage_path(&requested))
            .await
            .map_err(join_error)??;
        let existing = self
            .shared
            .lock()
            .folder_by_path(&path)
            .map(|folder| folder.user_path.clone());
        if let Some(existing) = existing {
            return Err(BlobStoreError::DuplicateFolder {
                path: config.path.clone(),
                existing,
            });
        }

        let load_path = path.clone();
        let loaded = tokio::task::spawn_blocking(move || load_folder(&load_path))
            .await
            .map_err(join_error)??;
        let conflict = self.shared.lock().find_conflict(&loaded);
        if let Some(id) = conflict {
            error!(path = %path.display(), blob = %id, "blob already present in another storage folder");
            return Err(BlobStoreError::IndexConflict { id, path });
        }

        let known: HashSet<BlobId> = loaded.entries.iter().map(|entry| entry.id).collect();
        let sweep_path = path.clone();
        let zombies = tokio::task::spawn_blocking(move || sweep_zombies(&sweep_path, &known))
            .await
            .map_err(join_error)??;

        let blobs = loaded.entries.len();
        self.shared.update(|state| {
            state.register_folder(config.path.clone(), path.clone(), config.maximum_size, &loaded, zombies)
        })?;
        info!(path = %config.path.display(), blobs, maximum_size = config.maximum_size, "storage folder added");
        Ok(())
    }

    /// Usage of every registered folder, in registration order.
    pub fn storage_folder_status(&self) -> Vec<StorageFolderStatus> {
        self.shared
            .lock()
            .folders
            .values()
            .map(StorageFolder::status)
            .collect()
    }

    /// Write the metadata of every folder changed since its last save and
    /// return how many were written. Failures are logged and retried on
    /// the next call.
    ///
    /// This does blocking I/O.
    pub fn persist_storage_folder_states(&self) -> usize {
        let _writer = self
            .shared
            .persist
            .lock()
            .expect("metadata writer lock poisoned");
        let snapshots: Vec<(FolderId, PathBuf, FolderMetadata, u64)> = self
            .shared
            .lock()
            .folders
            .values()
            .filter(|folder| folder.needs_saving())
            .map(|folder| {
                let (metadata, generation) = folder.metadata();
                (folder.id, folder.path.clone(), metadata, generation)
            })
            .collect();

        let mut saved = 0;
        for (id, path, metadata, generation) in snapshots {
            match write_metadata(&path, &metadata) {
                Ok(()) => {
                    if let Some(folder) = self.shared.lock().folders.get_mut(&id) {
                        folder.mark_saved(generation);
                    }
                    saved += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "cannot save storage folder metadata"),
            }
        }
        saved
    }

    /// Make the registered folders match `folders`: add the new ones,
    /// resize the ones whose maximum changed, then evacuate and remove
    /// the ones no longer listed.
    ///
    /// # Errors
    ///
    /// [`BlobStoreError::InvalidOperation`] for an empty list, or the
    /// first error of the underlying folder operations.
    pub async fn apply_config(&self, folders: &[StorageFolderConfig]) -> Result<()> {
        if folders.is_empty() {
            return Err(BlobStoreError::InvalidOperation(
                "at least one storage folder is required".into(),
            ));
        }

        let registered: Vec<(PathBuf, u64)> = self
            .shared
            .lock()
            .folders
            .values()
            .map(|folder| (folder.path.clone(), folder.maximum_size))
            .collect();
        let wanted: Vec<(PathBuf, &StorageFolderConfig)> = folders
            .iter()
            .map(|config| (lookup_path(&config.path), config))
            .collect();

        for (path, config) in &wanted {
            if !registered.iter().any(|(registered, _)| registered == path) {
                self.add_storage_folder(config).await?;
            }
        }
        for (path, maximum_size) in &registered {
            match wanted.iter().find(|(wanted, _)| wanted == path) {
                Some((_, config)) if config.maximum_size != *maximum_size => {
                    self.update_storage_folder(config).await?;
                }
                Some(_) => {}
                None => self.remove_storage_folder(path).await?,
            }
        }
        Ok(())
    }
}

impl State {
    /// First blob of `loaded` that is already indexed or listed twice.
    fn find_conflict(&self, loaded: &LoadedFolder) -> Option<BlobId> {
        let mut seen = HashSet::new();
        loaded
            .entries
            .iter()
            .find(|entry| self.index.lookup(&entry.id).is_some() || !seen.insert(entry.id))
            .map(|entry| entry.id)
    }

    fn register_folder(
        &mut self,
        user_path: PathBuf,
        path: PathBuf,
        maximum_size: u64,
        loaded: &LoadedFolder,
        zombies: u64,
    ) -> Result<()> {
        if let Some(id) = self.find_conflict(loaded) {
            return Err(BlobStoreError::IndexConflict { id, path });
        }
        let id = self.next_folder_id();
        let mut folder = StorageFolder::new(id, user_path, path, maximum_size);
        folder.count_zombies(zombies);
        self.folders.insert(id, folder);
        for entry in &loaded.entries {
            // Conflicts were ruled out above.
            let _ = self.insert_live(id, BlobRecord::from_entry(entry));
        }
        if !loaded.changed {
            if let Some(folder) = self.folders.get_mut(&id) {
                folder.mark_clean();
            }
        }
        Ok(())
    }
}
