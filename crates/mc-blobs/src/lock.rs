use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mc_codec::{BlobReader, decompress_file};
use mc_types::{BlobId, Checksum};
use tokio::sync::watch;

use crate::error::{BlobStoreError, Result};
use crate::manager::{FileBlobsManager, Shared, join_error};
use crate::pin::{PinSignal, wait_released};
use crate::record::RecordState;

/// Read access to one blob.
///
/// While a lock is alive the blob file stays where it is: the last
/// reference cannot delete it and folder evacuation defers its move.
/// Dropping the lock releases it.
pub struct BlobLock {
    shared: Arc<Shared>,
    id: BlobId,
    checksum: Checksum,
    size: u64,
    compressed_size: u64,
    path: PathBuf,
    pin: Option<PinSignal>,
}

impl BlobLock {
    pub fn id(&self) -> BlobId {
        self.id
    }

    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    /// Uncompressed size.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    /// Compressed file holding the blob.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocking decompressing reader over the content.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn reader(&self) -> Result<BlobReader> {
        Ok(BlobReader::open(&self.path)?)
    }

    /// Decompress the whole content into memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is corrupt.
    pub async fn read_to_vec(&self) -> Result<Vec<u8>> {
        let path = self.path.clone();
        let content = tokio::task::spawn_blocking(move || decompress_file(&path))
            .await
            .map_err(join_error)??;
        Ok(content)
    }

    /// Decompress the content into a new file at `destination`, returning
    /// the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob cannot be read or `destination`
    /// cannot be written.
    pub async fn copy_to(&self, destination: &Path) -> Result<u64> {
        let source = self.path.clone();
        let destination = destination.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<u64> {
            let mut reader = BlobReader::open(&source)?;
            let mut writer = BufWriter::new(File::create(&destination)?);
            let copied = io::copy(&mut reader, &mut writer)?;
            writer.flush()?;
            Ok(copied)
        })
        .await
        .map_err(join_error)?
    }
}

impl std::fmt::Debug for BlobLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobLock")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Drop for BlobLock {
    fn drop(&mut self) {
        if let Some(pin) = self.pin.take() {
            self.shared.release_pin(self.id, pin);
        }
    }
}

impl FileBlobsManager {
    /// Lock a blob for reading.
    ///
    /// A blob still being produced is waited for: the lock is granted once
    /// it becomes ready.
    ///
    /// # Errors
    ///
    /// [`BlobStoreError::NotFound`] if `id` is unknown, or if the blob
    /// being produced is discarded instead of becoming ready.
    pub async fn lock_blob(&self, id: &BlobId) -> Result<BlobLock> {
        loop {
            let attempt = self.shared.update(|state| -> Result<Attempt> {
                let (folder, record) = state.live(id).ok_or(BlobStoreError::NotFound(*id))?;
                match record.state {
                    RecordState::Ready => {}
                    RecordState::Ingesting => return Ok(Attempt::Wait(record.pins.waiters())),
                    RecordState::Moving => return Err(BlobStoreError::NotFound(*id)),
                }
                let path = state.folders[&folder].blob_path(id);
                let (checksum, size, compressed_size) = (record.checksum, record.size, record.compressed_size);
                let pin = state.new_pin();
                if let Some(record) = state.ready_mut(id) {
                    record.pins.add(pin.handle());
                }
                Ok(Attempt::Locked(BlobLock {
                    shared: Arc::clone(&self.shared),
                    id: *id,
                    checksum,
                    size,
                    compressed_size,
                    path,
                    pin: Some(pin),
                }))
            })?;
            match attempt {
                Attempt::Locked(lock) => return Ok(lock),
                Attempt::Wait(waiters) => wait_released(waiters).await,
            }
        }
    }
}

enum Attempt {
    Locked(BlobLock),
    Wait(Vec<watch::Receiver<bool>>),
}
