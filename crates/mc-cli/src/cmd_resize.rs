/// Implementation of `mcblobs resize`.
use anyhow::{Context, Result};
use mc_blobs::FileBlobsManager;
use mc_types::StorageFolderConfig;

use crate::{ResizeArgs, format_bytes};

pub async fn run(store: &FileBlobsManager, args: &ResizeArgs) -> Result<()> {
    let config = StorageFolderConfig::new(&args.path, args.maximum_size);
    store
        .update_storage_folder(&config)
        .await
        .with_context(|| format!("cannot resize {}", args.path.display()))?;
    println!(
        "{} now holds at most {}",
        args.path.display(),
        format_bytes(args.maximum_size)
    );
    Ok(())
}
