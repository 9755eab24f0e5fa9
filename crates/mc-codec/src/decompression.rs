use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::error::CodecError;

/// Streaming reader of a blob content file, yielding the uncompressed
/// content.
pub struct BlobReader {
    decoder: zstd::stream::read::Decoder<'static, BufReader<File>>,
    total_read: u64,
}

impl BlobReader {
    /// Open the compressed file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Open`] if the file cannot be opened or does
    /// not start a zstd stream.
    pub fn open(path: &Path) -> Result<Self, CodecError> {
        let open_error = |source| CodecError::Open {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(open_error)?;
        let decoder = zstd::stream::read::Decoder::new(file).map_err(open_error)?;
        Ok(Self {
            decoder,
            total_read: 0,
        })
    }

    /// Uncompressed bytes produced so far.
    #[must_use]
    pub fn total_read(&self) -> u64 {
        self.total_read
    }

    /// Fill `buf` as far as the content allows.
    ///
    /// Returns fewer than `buf.len()` bytes only once the end of the
    /// content has been reached.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Io`] on a corrupt frame or a read failure.
    pub fn read_full(&mut self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    /// `true` when no uncompressed byte is left.
    ///
    /// Consumes one byte when content remains.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Io`] on a corrupt frame or a read failure.
    pub fn at_end(&mut self) -> Result<bool, CodecError> {
        let mut probe = [0u8; 1];
        Ok(self.read_full(&mut probe)? == 0)
    }
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.decoder.read(buf)?;
        self.total_read += read as u64;
        Ok(read)
    }
}

/// Decompress a whole blob file and count its uncompressed bytes.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or is not a complete,
/// valid zstd stream.
pub fn decompressed_len(path: &Path) -> Result<u64, CodecError> {
    let mut reader = BlobReader::open(path)?;
    Ok(io::copy(&mut reader, &mut io::sink())?)
}

/// Decompress a whole blob file into memory.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or is not a complete,
/// valid zstd stream.
pub fn decompress_file(path: &Path) -> Result<Vec<u8>, CodecError> {
    let mut reader = BlobReader::open(path)?;
    let mut content = Vec::new();
    reader.read_to_end(&mut content)?;
    Ok(content)
}
