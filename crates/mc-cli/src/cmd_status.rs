/// Implementation of `mcblobs status`.
///
/// # Example output
///
/// ```text
/// Folder                         Used         Zombies      Maximum      Full
/// ──────────────────────────────────────────────────────────────────────────
/// /var/lib/mcblobs/disk0         1.2 GiB      0 B          4.0 GiB       30%
/// /mnt/disk1/mcblobs             812.0 MiB    12.0 KiB     1.0 GiB       79%
/// ```
use anyhow::Result;
use mc_blobs::FileBlobsManager;

use crate::format_bytes;

pub fn run(store: &FileBlobsManager) -> Result<()> {
    let folders = store.storage_folder_status();
    println!(
        "{:<30} {:<12} {:<12} {:<12} {:>5}",
        "Folder", "Used", "Zombies", "Maximum", "Full"
    );
    println!("{}", "─".repeat(74));
    for folder in &folders {
        println!(
            "{:<30} {:<12} {:<12} {:<12} {:>4.0}%",
            folder.path.display(),
            format_bytes(folder.current_size),
            format_bytes(folder.zombies_size),
            format_bytes(folder.maximum_size),
            folder.fullness() * 100.0,
        );
    }
    println!("\n{} blob(s) stored", store.blob_count());
    Ok(())
}
