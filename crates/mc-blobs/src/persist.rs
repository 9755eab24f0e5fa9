use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::manager::FileBlobsManager;

/// Save dirty folder metadata every `interval` until `shutdown` fires,
/// then once more before returning.
pub fn spawn_periodic_persist(
    manager: FileBlobsManager,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => persist(&manager).await,
            }
        }
        persist(&manager).await;
    })
}

async fn persist(manager: &FileBlobsManager) {
    let manager = manager.clone();
    match tokio::task::spawn_blocking(move || manager.persist_storage_folder_states()).await {
        Ok(0) => {}
        Ok(saved) => debug!(saved, "storage folder metadata saved"),
        Err(e) => warn!(error = %e, "metadata persister task failed"),
    }
}
