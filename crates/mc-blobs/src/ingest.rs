//! Blob ingestion: stream, compress, checksum and deduplicate.
//!
//! ```text
//!   caller stream ──► 2 MiB chunk ──┬──► blob writer: zstd (placeholder
//!                                   │    file) + MD5 accumulator
//!                                   └──► every duplicate candidate:
//!                                        decompress the same range and
//!                                        compare, eliminating mismatches
//! ```
//!
//! The declared checksum selects candidates: ready blobs sharing it with
//! the same uncompressed length. A candidate still matching at the end of
//! the stream, with nothing left on its side, is a duplicate and receives
//! the reference instead of the new file.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mc_codec::{BlobReader, BlobWriter};
use mc_types::{BlobId, Checksum};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BlobStoreError, Result};
use crate::folder::FolderId;
use crate::manager::{FileBlobsManager, Shared, join_error};
use crate::pin::{PinSignal, wait_released};
use crate::record::{BlobRecord, RecordState};
use crate::state::State;

/// Bytes read from the caller's stream per processing step.
pub const READ_CHUNK_SIZE: usize = 2 * 1024 * 1024;

impl FileBlobsManager {
    /// Store the `length` bytes of `content`, declared to hash to
    /// `checksum`, and return the id holding them.
    ///
    /// If an identical blob already exists its reference count is
    /// incremented and its id returned; otherwise a new blob is created
    /// with a reference count of one. Ingestions of the same checksum are
    /// serialized so concurrent identical uploads end up as one blob.
    ///
    /// # Errors
    ///
    /// - [`BlobStoreError::StorageFull`] if no folder has `length` bytes
    ///   free, or if the compressed content turns out larger than the
    ///   room left in its folder.
    /// - [`BlobStoreError::SizeMismatch`] if the stream is not exactly
    ///   `length` bytes long.
    /// - [`BlobStoreError::ChecksumMismatch`] if the content does not hash
    ///   to `checksum`.
    /// - [`BlobStoreError::Cancelled`] if `cancel` fires first.
    ///
    /// On any error nothing is left behind: the reservation is released
    /// and the partial file deleted.
    pub async fn add_blob<R>(
        &self,
        content: R,
        length: u64,
        checksum: Checksum,
        cancel: &CancellationToken,
    ) -> Result<BlobId>
    where
        R: AsyncRead + Unpin,
    {
        let (ingestion, candidates) = loop {
            if cancel.is_cancelled() {
                return Err(BlobStoreError::Cancelled);
            }
            match self.shared.update(|state| state.begin_ingestion(checksum, length))? {
                Begin::Wait(waiters) => {
                    tokio::select! {
                        () = cancel.cancelled() => return Err(BlobStoreError::Cancelled),
                        () = wait_released(waiters) => {}
                    }
                }
                Begin::Started(started) => {
                    let candidates = started.candidate_paths.clone();
                    break (Ingestion::new(Arc::clone(&self.shared), started), candidates);
                }
            }
        };

        let streamed = stream_content(&ingestion.path, candidates, content, length, cancel).await;
        let outcome = match streamed {
            Ok(streamed) if streamed.checksum != checksum => Err(BlobStoreError::ChecksumMismatch {
                expected: checksum,
                actual: streamed.checksum,
            }),
            Ok(Streamed {
                duplicate: Some(existing),
                ..
            }) => Ok(Outcome::Duplicate(existing)),
            Ok(streamed) => Ok(Outcome::New {
                compressed_size: streamed.compressed_size,
            }),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(outcome) => ingestion.conclude(outcome).await,
            Err(e) => {
                ingestion.conclude(Outcome::Discard).await?;
                Err(e)
            }
        }
    }
}

/// What the stream turned out to be.
struct Streamed {
    compressed_size: u64,
    checksum: Checksum,
    duplicate: Option<BlobId>,
}

/// Compress `content` into `path` while comparing it with `candidates`.
async fn stream_content<R>(
    path: &Path,
    candidates: Vec<(BlobId, PathBuf)>,
    mut content: R,
    length: u64,
    cancel: &CancellationToken,
) -> Result<Streamed>
where
    R: AsyncRead + Unpin,
{
    let path = path.to_path_buf();
    let mut comparison = tokio::task::spawn_blocking(move || Comparison::open(&path, candidates))
        .await
        .map_err(join_error)??;

    let mut buffer = vec![0u8; READ_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let filled = tokio::select! {
            () = cancel.cancelled() => return Err(BlobStoreError::Cancelled),
            filled = fill_buffer(&mut content, &mut buffer) => filled?,
        };
        if filled == 0 {
            break;
        }
        total += filled as u64;
        if total > length {
            return Err(BlobStoreError::SizeMismatch {
                declared: length,
                actual: total,
            });
        }

        let chunk = std::mem::take(&mut buffer);
        let (returned, chunk, processed) = tokio::task::spawn_blocking(move || {
            let processed = comparison.process(&chunk[..filled]);
            (comparison, chunk, processed)
        })
        .await
        .map_err(join_error)?;
        comparison = returned;
        buffer = chunk;
        processed?;

        if filled < buffer.len() {
            break;
        }
    }

    if total != length {
        return Err(BlobStoreError::SizeMismatch {
            declared: length,
            actual: total,
        });
    }

    tokio::task::spawn_blocking(move || comparison.finish())
        .await
        .map_err(join_error)?
}

async fn fill_buffer<R>(content: &mut R, buffer: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buffer.len() {
        let read = content.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

// ── State transitions ────────────────────────────────────────────────────

pub(crate) enum Begin {
    /// Another ingestion of the same checksum is running.
    Wait(Vec<watch::Receiver<bool>>),
    Started(Started),
}

pub(crate) struct Started {
    id: BlobId,
    folder: FolderId,
    path: PathBuf,
    checksum: Checksum,
    pin: PinSignal,
    candidate_paths: Vec<(BlobId, PathBuf)>,
}

enum Outcome {
    Discard,
    New { compressed_size: u64 },
    Duplicate(BlobId),
}

impl State {
    /// Reserve a placeholder for a new blob and pin its duplicate
    /// candidates, unless an ingestion of `checksum` is already running.
    pub(crate) fn begin_ingestion(&mut self, checksum: Checksum, length: u64) -> Result<Begin> {
        let mut waiters = Vec::new();
        let mut candidates = Vec::new();
        for id in self.index.chain(&checksum) {
            let Some((_, record)) = self.live(id) else {
                continue;
            };
            if record.is_ready() {
                if record.size == length {
                    candidates.push(*id);
                }
            } else {
                waiters.extend(record.pins.waiters());
            }
        }
        if !waiters.is_empty() {
            return Ok(Begin::Wait(waiters));
        }

        // The uncompressed length stands in for the compressed size until
        // the stream ends.
        let reserved = length;
        let folder = self.folder_with_room(reserved).ok_or_else(|| {
            BlobStoreError::StorageFull(format!("no storage folder has {length} bytes free"))
        })?;

        let pin = self.new_pin();
        let id = BlobId::new();
        let placeholder = BlobRecord::placeholder(id, checksum, length, reserved, pin.handle());
        self.insert_live(folder, placeholder).map_err(|_| {
            BlobStoreError::InvalidOperation(format!("generated blob id {id} is already in use"))
        })?;

        let mut candidate_paths = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let Some(folder) = self.index.lookup(&candidate) else {
                continue;
            };
            if let Some(storage) = self.folders.get_mut(&folder) {
                if let Some(record) = storage.file_mut(&candidate) {
                    record.pins.add(pin.handle());
                    candidate_paths.push((candidate, storage.blob_path(&candidate)));
                }
            }
        }

        let path = self.folders[&folder].blob_path(&id);
        Ok(Begin::Started(Started {
            id,
            folder,
            path,
            checksum,
            pin,
            candidate_paths,
        }))
    }

    /// Settle an ingestion. A new blob whose compressed form does not fit
    /// its folder after all is discarded with [`BlobStoreError::StorageFull`].
    fn conclude_ingestion(&mut self, started: Started, outcome: Outcome) -> Result<BlobId> {
        let Started {
            id,
            folder,
            checksum,
            pin,
            candidate_paths,
            ..
        } = started;

        for (candidate, _) in &candidate_paths {
            self.unpin(candidate, pin.id());
        }

        let outcome = match outcome {
            Outcome::New { compressed_size } if !self.fits(folder, &id, compressed_size) => {
                self.remove_live(&id);
                Err(BlobStoreError::StorageFull(format!(
                    "blob of {compressed_size} compressed bytes overflows its storage folder"
                )))
            }
            Outcome::Discard => {
                self.remove_live(&id);
                Ok(id)
            }
            Outcome::Duplicate(existing) => {
                self.remove_live(&id);
                if let Some(record) = self.ready_mut(&existing) {
                    record.reference_count += 1;
                }
                debug!(blob = %existing, %checksum, "content deduplicated");
                Ok(existing)
            }
            Outcome::New { compressed_size } => {
                if let Some(storage) = self.folders.get_mut(&folder) {
                    storage.resize_file(&id, compressed_size);
                    if let Some(record) = storage.file_mut(&id) {
                        record.state = RecordState::Ready;
                        record.reference_count = 1;
                        record.pins.clear();
                    }
                }
                debug!(blob = %id, %checksum, compressed_size, "blob added");
                Ok(id)
            }
        };

        pin.release();
        for (candidate, _) in &candidate_paths {
            self.check_pending_move(candidate);
        }
        outcome
    }

    /// Whether the placeholder `id` of `folder` can grow or shrink to
    /// `compressed_size` without exceeding the folder's maximum size.
    fn fits(&self, folder: FolderId, id: &BlobId, compressed_size: u64) -> bool {
        let Some(storage) = self.folders.get(&folder) else {
            return false;
        };
        let reserved = storage.file(id).map_or(0, |record| record.compressed_size);
        storage.current_size() - reserved + compressed_size <= storage.maximum_size
    }
}

/// An ingestion between reservation and conclusion.
///
/// [`conclude`](Self::conclude) settles it on the blocking pool, since it
/// may delete files. Dropping it unconcluded discards the placeholder and
/// its file right away.
struct Ingestion {
    shared: Arc<Shared>,
    path: PathBuf,
    started: Option<Started>,
}

impl Ingestion {
    fn new(shared: Arc<Shared>, started: Started) -> Self {
        Self {
            shared,
            path: started.path.clone(),
            started: Some(started),
        }
    }

    async fn conclude(mut self, outcome: Outcome) -> Result<BlobId> {
        let Some(started) = self.started.take() else {
            unreachable!("ingestion concluded twice");
        };
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || {
            shared.update(|state| state.conclude_ingestion(started, outcome))
        })
        .await
        .map_err(join_error)?
    }
}

impl Drop for Ingestion {
    fn drop(&mut self) {
        if let Some(started) = self.started.take() {
            let _ = self
                .shared
                .update(|state| state.conclude_ingestion(started, Outcome::Discard));
        }
    }
}

// ── Blocking side ────────────────────────────────────────────────────────

struct Candidate {
    id: BlobId,
    reader: BlobReader,
}

/// Compression and comparison state, moved in and out of the blocking
/// pool for each chunk.
struct Comparison {
    writer: BlobWriter,
    candidates: Vec<Candidate>,
    scratch: Vec<u8>,
}

impl Comparison {
    fn open(path: &Path, candidates: Vec<(BlobId, PathBuf)>) -> Result<Self> {
        let writer = BlobWriter::create(path)?;
        let candidates = candidates
            .into_iter()
            .filter_map(|(id, path)| match BlobReader::open(&path) {
                Ok(reader) => Some(Candidate { id, reader }),
                Err(e) => {
                    warn!(blob = %id, error = %e, "cannot open duplicate candidate, ignoring it");
                    None
                }
            })
            .collect();
        Ok(Self {
            writer,
            candidates,
            scratch: Vec::new(),
        })
    }

    fn process(&mut self, chunk: &[u8]) -> Result<()> {
        self.writer.write_chunk(chunk)?;

        if self.candidates.is_empty() {
            return Ok(());
        }
        self.scratch.resize(chunk.len(), 0);
        let scratch = &mut self.scratch;
        self.candidates
            .retain_mut(|candidate| match candidate.reader.read_full(scratch) {
                Ok(read) if read < chunk.len() => {
                    warn!(blob = %candidate.id, "duplicate candidate is shorter than its recorded size");
                    false
                }
                Ok(_) if scratch[..] != *chunk => {
                    warn!(blob = %candidate.id, "duplicate candidate shares the checksum but not the content");
                    false
                }
                Ok(_) => true,
                Err(e) => {
                    warn!(blob = %candidate.id, error = %e, "cannot read duplicate candidate");
                    false
                }
            });
        Ok(())
    }

    /// Close the new file and pick the surviving duplicate, if any.
    fn finish(mut self) -> Result<Streamed> {
        let duplicate = self
            .candidates
            .iter_mut()
            .find_map(|candidate| match candidate.reader.at_end() {
                Ok(true) => Some(candidate.id),
                Ok(false) => {
                    warn!(blob = %candidate.id, "duplicate candidate is longer than its recorded size");
                    None
                }
                Err(e) => {
                    warn!(blob = %candidate.id, error = %e, "cannot read duplicate candidate");
                    None
                }
            });
        let finished = self.writer.finish()?;
        Ok(Streamed {
            compressed_size: finished.compressed_size,
            checksum: finished.checksum,
            duplicate,
        })
    }
}

#[cfg(test)]
mod tests {
    use mc_codec::checksum_of;

    use super::*;

    fn write_candidate(dir: &Path, content: &[u8]) -> (BlobId, PathBuf) {
        let id = BlobId::new();
        let path = dir.join(id.to_string());
        let mut writer = BlobWriter::create(&path).unwrap();
        writer.write_chunk(content).unwrap();
        writer.finish().unwrap();
        (id, path)
    }

    #[test]
    fn comparison_checksums_what_it_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new");
        let content = b"first half, second half".repeat(50);

        let mut comparison = Comparison::open(&path, Vec::new()).unwrap();
        let (head, tail) = content.split_at(300);
        comparison.process(head).unwrap();
        comparison.process(tail).unwrap();
        let streamed = comparison.finish().unwrap();

        assert_eq!(streamed.checksum, checksum_of(&content));
        assert_eq!(streamed.compressed_size, std::fs::metadata(&path).unwrap().len());
        assert_eq!(streamed.duplicate, None);
    }

    #[test]
    fn comparison_keeps_only_identical_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let content = b"candidate content".repeat(20);
        let same = write_candidate(dir.path(), &content);
        let mut altered = content.clone();
        altered[100] ^= 1;
        let different = write_candidate(dir.path(), &altered);

        let mut comparison =
            Comparison::open(&dir.path().join("new"), vec![different, same.clone()]).unwrap();
        comparison.process(&content).unwrap();
        assert_eq!(comparison.candidates.len(), 1);
        assert_eq!(comparison.finish().unwrap().duplicate, Some(same.0));
    }
}
