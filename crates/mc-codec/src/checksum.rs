use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md5::{Digest, Md5};
use mc_types::Checksum;
use mc_types::checksum::CHECKSUM_SIZE;

use crate::error::CodecError;

/// Running MD5 over content fed in arbitrary slices.
#[derive(Clone, Default)]
pub struct ChecksumAccumulator {
    hasher: Md5,
}

impl ChecksumAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    #[must_use]
    pub fn finalize(self) -> Checksum {
        let digest = self.hasher.finalize();
        let mut bytes = [0u8; CHECKSUM_SIZE];
        bytes.copy_from_slice(&digest);
        Checksum::from_bytes(bytes)
    }
}

/// Checksum of an in-memory buffer.
#[must_use]
pub fn checksum_of(bytes: &[u8]) -> Checksum {
    let mut accumulator = ChecksumAccumulator::new();
    accumulator.update(bytes);
    accumulator.finalize()
}

/// Checksum and length of a plain (uncompressed) file.
///
/// # Errors
///
/// Returns [`CodecError::Open`] if the file cannot be opened and
/// [`CodecError::Io`] if reading it fails.
pub fn checksum_file(path: &Path) -> Result<(Checksum, u64), CodecError> {
    let mut file = File::open(path).map_err(|source| CodecError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut accumulator = ChecksumAccumulator::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut length = 0u64;
    loop {
        let read = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        accumulator.update(&buf[..read]);
        length += read as u64;
    }
    Ok((accumulator.finalize(), length))
}
