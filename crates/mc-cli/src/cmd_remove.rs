/// Implementation of `mcblobs remove`.
use anyhow::{Context, Result};
use mc_blobs::FileBlobsManager;

use crate::RemoveArgs;

pub async fn run(store: &FileBlobsManager, args: &RemoveArgs) -> Result<()> {
    store
        .remove_storage_folder(&args.path)
        .await
        .with_context(|| format!("cannot remove {}", args.path.display()))?;
    println!("{} emptied and removed", args.path.display());
    Ok(())
}
