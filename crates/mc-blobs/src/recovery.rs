//! Start-up loading of a storage folder.
//!
//! All of this is blocking filesystem work and runs on the blocking pool.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use mc_codec::decompressed_len;
use mc_types::{BlobEntry, BlobId, FolderMetadata, METADATA_FILE_NAME, blob_path};
use tracing::{error, warn};

use crate::error::{BlobStoreError, Result};

/// Outcome of reading a folder's metadata.
#[derive(Debug, Default)]
pub(crate) struct LoadedFolder {
    /// Entries to register, all ready.
    pub entries: Vec<BlobEntry>,
    /// Whether the entries differ from what the metadata file says (or
    /// there is no metadata file yet).
    pub changed: bool,
}

/// Read and validate the metadata of `path`.
///
/// Entries saved while still ingesting are kept if their file decompresses
/// to the recorded size and dropped otherwise. A folder without metadata
/// must not contain any file.
pub(crate) fn load_folder(path: &Path) -> Result<LoadedFolder> {
    let metadata_path = path.join(METADATA_FILE_NAME);
    let raw = match fs::read(&metadata_path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if contains_files(path)? {
                return Err(BlobStoreError::InvalidOperation(format!(
                    "{} is a new storage folder but already contains files",
                    path.display()
                )));
            }
            return Ok(LoadedFolder {
                entries: Vec::new(),
                changed: true,
            });
        }
        Err(e) => return Err(e.into()),
    };
    let metadata: FolderMetadata = serde_json::from_slice(&raw)?;

    let mut loaded = LoadedFolder::default();
    for mut entry in metadata.files {
        if !entry.is_ready {
            loaded.changed = true;
            if let Some(compressed_size) = complete_file_size(path, &entry) {
                warn!(blob = %entry.id, "blob was saved as not ready but looks complete, keeping it");
                entry.is_ready = true;
                entry.compressed_size = compressed_size;
            } else {
                error!(blob = %entry.id, "blob was saved as not ready and is incomplete, deleting it");
                continue;
            }
        }
        loaded.entries.push(entry);
    }
    Ok(loaded)
}

/// On-disk length of the file of `entry` if it decompresses to the
/// recorded size. Placeholders are saved with their reservation, not
/// their final compressed size.
fn complete_file_size(folder: &Path, entry: &BlobEntry) -> Option<u64> {
    let path = blob_path(folder, &entry.id);
    if !decompressed_len(&path).is_ok_and(|len| len == entry.size) {
        return None;
    }
    fs::metadata(&path).ok().map(|metadata| metadata.len())
}

fn contains_files(path: &Path) -> Result<bool> {
    for entry in fs::read_dir(path)? {
        if entry?.file_type()?.is_file() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Delete every file under `path` that is neither a known blob nor the
/// metadata file, then prune empty directories. Returns the bytes of the
/// files that could not be deleted.
pub(crate) fn sweep_zombies(path: &Path, known: &HashSet<BlobId>) -> Result<u64> {
    let mut zombies = 0;
    sweep_directory(path, path, known, &mut zombies)?;
    clean_subdirectories(path);
    Ok(zombies)
}

fn sweep_directory(root: &Path, dir: &Path, known: &HashSet<BlobId>, zombies: &mut u64) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let entry_path = entry.path();
        if file_type.is_dir() {
            sweep_directory(root, &entry_path, known, zombies)?;
            continue;
        }
        let keep = if dir == root && entry.file_name() == METADATA_FILE_NAME {
            true
        } else {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<BlobId>().ok())
                .is_some_and(|id| known.contains(&id))
        };
        if keep {
            continue;
        }
        if let Err(e) = fs::remove_file(&entry_path) {
            error!(path = %entry_path.display(), error = %e, "failed to delete unknown file");
            match entry.metadata() {
                Ok(metadata) => *zombies += metadata.len(),
                Err(e) => {
                    error!(path = %entry_path.display(), error = %e, "cannot size unknown file, folder size might be wrong");
                }
            }
        }
    }
    Ok(())
}

fn clean_subdirectories(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            let sub = entry.path();
            clean_subdirectories(&sub);
            // Fails on non-empty directories, which is what we want.
            let _ = fs::remove_dir(&sub);
        }
    }
}

#[cfg(test)]
mod tests {
    use mc_codec::{BlobWriter, checksum_of};

    use super::*;

    fn write_blob(folder: &Path, content: &[u8]) -> BlobEntry {
        let id = BlobId::new();
        let mut writer = BlobWriter::create(&blob_path(folder, &id)).unwrap();
        writer.write_chunk(content).unwrap();
        let finished = writer.finish().unwrap();
        BlobEntry {
            id,
            checksum: checksum_of(content),
            size: content.len() as u64,
            compressed_size: finished.compressed_size,
            is_ready: true,
        }
    }

    fn save(folder: &Path, files: Vec<BlobEntry>) {
        let json = serde_json::to_vec(&FolderMetadata { files }).unwrap();
        fs::write(folder.join(METADATA_FILE_NAME), json).unwrap();
    }

    #[test]
    fn new_folder_must_be_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_folder(dir.path()).unwrap();
        assert!(loaded.entries.is_empty());
        assert!(loaded.changed);

        fs::write(dir.path().join("stray.txt"), b"hello").unwrap();
        let err = load_folder(dir.path()).unwrap_err();
        assert!(matches!(err, BlobStoreError::InvalidOperation(_)));
    }

    #[test]
    fn not_ready_entries_are_verified() {
        let dir = tempfile::tempdir().unwrap();
        let ready = write_blob(dir.path(), b"ready blob");
        let mut complete = write_blob(dir.path(), b"complete but unsaved");
        complete.is_ready = false;
        let mut truncated = write_blob(dir.path(), b"this one lost its tail");
        truncated.is_ready = false;
        truncated.size += 10;
        save(dir.path(), vec![ready.clone(), complete.clone(), truncated]);

        let loaded = load_folder(dir.path()).unwrap();
        assert!(loaded.changed);
        let ids: Vec<BlobId> = loaded.entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![ready.id, complete.id]);
        assert!(loaded.entries.iter().all(|e| e.is_ready));
    }

    #[test]
    fn promoted_entry_takes_its_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut placeholder = write_blob(dir.path(), &b"saved mid-ingestion ".repeat(200));
        let on_disk = placeholder.compressed_size;
        placeholder.is_ready = false;
        placeholder.compressed_size = placeholder.size;
        save(dir.path(), vec![placeholder]);

        let loaded = load_folder(dir.path()).unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].compressed_size, on_disk);
        assert!(on_disk < loaded.entries[0].size);
    }

    #[test]
    fn corrupt_metadata_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(METADATA_FILE_NAME), b"{ not json").unwrap();
        assert!(matches!(load_folder(dir.path()), Err(BlobStoreError::Metadata(_))));
    }

    #[test]
    fn sweep_keeps_known_blobs_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let kept = write_blob(dir.path(), b"kept");
        let zombie = write_blob(dir.path(), b"zombie");
        save(dir.path(), vec![kept.clone()]);
        let stray = dir.path().join("zz").join("stray");
        fs::create_dir_all(stray.parent().unwrap()).unwrap();
        fs::write(&stray, b"x").unwrap();
        fs::create_dir_all(dir.path().join("yy").join("xx")).unwrap();

        let known = HashSet::from([kept.id]);
        assert_eq!(sweep_zombies(dir.path(), &known).unwrap(), 0);

        assert!(blob_path(dir.path(), &kept.id).exists());
        assert!(!blob_path(dir.path(), &zombie.id).exists());
        assert!(!stray.exists());
        assert!(!dir.path().join("zz").exists());
        assert!(!dir.path().join("yy").exists());
        assert!(dir.path().join(METADATA_FILE_NAME).exists());
    }
}
