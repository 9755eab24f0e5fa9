/// Implementation of `mcblobs ingest`.
///
/// Prints one `<blob id>  <file>` line per ingested file.
use anyhow::{Context, Result};
use mc_blobs::{CancellationToken, FileBlobsManager};
use mc_codec::checksum_file;

use crate::IngestArgs;

pub async fn run(store: &FileBlobsManager, args: &IngestArgs) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    for file in &args.files {
        let path = file.clone();
        let (checksum, length) = tokio::task::spawn_blocking(move || checksum_file(&path))
            .await?
            .with_context(|| format!("cannot hash {}", file.display()))?;

        let content = tokio::fs::File::open(file)
            .await
            .with_context(|| format!("cannot open {}", file.display()))?;
        let id = store
            .add_blob(content, length, checksum, &cancel)
            .await
            .with_context(|| format!("cannot ingest {}", file.display()))?;
        println!("{id}  {}", file.display());
    }
    Ok(())
}
