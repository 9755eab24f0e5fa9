/// Implementation of `mcblobs extract`.
use anyhow::{Context, Result};
use mc_blobs::FileBlobsManager;
use mc_types::BlobId;

use crate::{ExtractArgs, format_bytes};

pub async fn run(store: &FileBlobsManager, args: &ExtractArgs) -> Result<()> {
    let id: BlobId = args
        .id
        .parse()
        .with_context(|| format!("invalid blob id {:?}", args.id))?;
    let lock = store.lock_blob(&id).await?;
    let written = lock
        .copy_to(&args.output)
        .await
        .with_context(|| format!("cannot extract to {}", args.output.display()))?;
    println!("{id} → {} ({})", args.output.display(), format_bytes(written));
    Ok(())
}
