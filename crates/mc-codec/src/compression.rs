use std::fs::{self, File};
use std::io::{BufWriter, IntoInnerError, Write};
use std::path::{Path, PathBuf};

use mc_types::Checksum;

use crate::checksum::ChecksumAccumulator;
use crate::error::CodecError;

/// Default zstd compression level (1–22 scale).
///
/// Level 3 keeps ingestion throughput close to disk speed while still
/// shrinking typical build artifacts substantially.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Outcome of a successfully finished [`BlobWriter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FinishedBlob {
    /// Uncompressed bytes written.
    pub size: u64,
    /// Bytes of the compressed file on disk.
    pub compressed_size: u64,
    /// Checksum of the uncompressed content.
    pub checksum: Checksum,
}

/// Streaming writer of a blob content file.
///
/// Each chunk handed to [`write_chunk`](Self::write_chunk) is fed both
/// to a zstd encoder writing the file and to a running checksum, so the
/// incoming content is read exactly once.
///
/// ```text
///   chunk ──┬──▶ zstd encoder ──▶ BufWriter ──▶ <folder>/ab/cd/<id>
///           └──▶ MD5 accumulator
/// ```
///
/// Dropping the writer without calling [`finish`](Self::finish) leaves a
/// truncated file behind; the caller owns its deletion.
pub struct BlobWriter {
    path: PathBuf,
    encoder: zstd::stream::write::Encoder<'static, BufWriter<File>>,
    checksum: ChecksumAccumulator,
    size: u64,
}

impl BlobWriter {
    /// Create (or truncate) the file at `path`, creating its parent
    /// directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Create`] if the file or its directories
    /// cannot be created.
    pub fn create(path: &Path) -> Result<Self, CodecError> {
        let create_error = |source| CodecError::Create {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(create_error)?;
        }
        let file = File::create(path).map_err(create_error)?;
        let encoder = zstd::stream::write::Encoder::new(
            BufWriter::new(file),
            DEFAULT_COMPRESSION_LEVEL,
        )
        .map_err(create_error)?;
        Ok(Self {
            path: path.to_path_buf(),
            encoder,
            checksum: ChecksumAccumulator::new(),
            size: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of uncompressed bytes written so far.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Compress and checksum the next slice of content.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Io`] if the encoder or the file fails.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), CodecError> {
        self.encoder.write_all(chunk)?;
        self.checksum.update(chunk);
        self.size += chunk.len() as u64;
        Ok(())
    }

    /// Close the zstd frame, flush and sync the file.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Io`] if finishing the frame or syncing the
    /// file fails.
    pub fn finish(self) -> Result<FinishedBlob, CodecError> {
        let file = self
            .encoder
            .finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?;
        file.sync_all()?;
        let compressed_size = file.metadata()?.len();
        Ok(FinishedBlob {
            size: self.size,
            compressed_size,
            checksum: self.checksum.finalize(),
        })
    }
}
