/// Implementation of `mcblobs check`.
///
/// Decompresses every blob, recomputes its MD5 and compares both the
/// checksum and the length with the recorded ones. Fails if any blob is
/// damaged.
use std::io::Read;

use anyhow::{Result, bail};
use mc_blobs::{BlobLock, FileBlobsManager, READ_CHUNK_SIZE};
use mc_codec::ChecksumAccumulator;
use mc_types::Checksum;
use tracing::warn;

pub async fn run(store: &FileBlobsManager) -> Result<()> {
    let ids = store.blob_ids();
    let mut damaged = 0usize;
    for id in &ids {
        let lock = match store.lock_blob(id).await {
            Ok(lock) => lock,
            // Deleted since listed.
            Err(mc_blobs::BlobStoreError::NotFound(_)) => continue,
            Err(e) => return Err(e.into()),
        };
        let (checksum, size) = (lock.checksum(), lock.size());
        let verified = tokio::task::spawn_blocking(move || verify(&lock)).await?;
        match verified {
            Ok((actual, length)) if actual == checksum && length == size => {}
            Ok((actual, length)) => {
                damaged += 1;
                println!("{id}  DAMAGED  expected {checksum} ({size} B), found {actual} ({length} B)");
            }
            Err(e) => {
                damaged += 1;
                warn!(blob = %id, error = %e, "cannot read blob");
                println!("{id}  UNREADABLE  {e}");
            }
        }
    }
    println!("{} blob(s) checked, {damaged} damaged", ids.len());
    if damaged > 0 {
        bail!("{damaged} damaged blob(s)");
    }
    Ok(())
}

fn verify(lock: &BlobLock) -> Result<(Checksum, u64)> {
    let mut reader = lock.reader()?;
    let mut hasher = ChecksumAccumulator::new();
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];
    let mut length = 0u64;
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        length += read as u64;
    }
    Ok((hasher.finalize(), length))
}
