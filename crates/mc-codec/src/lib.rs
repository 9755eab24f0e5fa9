#![warn(clippy::pedantic)]

pub mod checksum;
pub mod compression;
pub mod decompression;
pub mod error;

pub use checksum::{ChecksumAccumulator, checksum_file, checksum_of};
pub use compression::{BlobWriter, FinishedBlob};
pub use decompression::{BlobReader, decompress_file, decompressed_len};
pub use error::CodecError;
