/// `mcblobs`: operate a file blob store from the command line.
///
/// # Command overview
///
/// ```text
/// mcblobs [OPTIONS] <COMMAND>
///
/// Commands:
///   status    Print usage of every storage folder
///   ingest    Add files to the store and print their blob ids
///   extract   Decompress a blob into a file
///   resize    Change the maximum size of a storage folder
///   remove    Move every blob out of a storage folder and drop it
///   check     Verify the checksum of every blob
///   help      Print help information
///
/// Global options:
///   -c, --config <FILE>   Store configuration (default: mcblobs.toml)
///   -v, --verbose...      More logging (-v info, -vv debug, -vvv trace)
///   -h, --help            Print help
///   -V, --version         Print version
/// ```
///
/// Every command loads the folders listed in the configuration (running
/// start-up recovery on them) and saves their metadata before exiting.
///
/// # Exit codes
///
/// | Code | Meaning                                       |
/// |------|-----------------------------------------------|
/// | 0    | Success                                       |
/// | 1    | Error (bad configuration, I/O failure, etc.)  |
///
/// `RUST_LOG` overrides the verbosity flags when set.
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mc_blobs::{FileBlobsManager, StoreConfig};
use tracing_subscriber::EnvFilter;

mod cmd_check;
mod cmd_extract;
mod cmd_ingest;
mod cmd_remove;
mod cmd_resize;
mod cmd_status;

// ── CLI root ──────────────────────────────────────────────────────────────────

/// Deduplicating, compressed file blob store.
#[derive(Parser)]
#[command(name = "mcblobs", version, about = "File blob store CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Store configuration file.
    #[arg(short, long, global = true, default_value = "mcblobs.toml")]
    config: PathBuf,

    /// Increase logging verbosity (repeatable).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

// ── Sub-commands ──────────────────────────────────────────────────────────────

#[derive(Subcommand)]
enum Commands {
    /// Print usage of every storage folder.
    Status,
    /// Add files to the store and print their blob ids.
    Ingest(IngestArgs),
    /// Decompress a blob into a file.
    Extract(ExtractArgs),
    /// Change the maximum size of a storage folder.
    Resize(ResizeArgs),
    /// Move every blob out of a storage folder and drop it.
    Remove(RemoveArgs),
    /// Verify the checksum of every blob.
    Check,
}

// ── Argument structs ──────────────────────────────────────────────────────────

/// Arguments for `mcblobs ingest`.
///
/// Each file is hashed first, then streamed into the store. Identical
/// content, within the batch or already stored, maps to the same blob id.
/// Ctrl-C cancels the file being ingested and stops the batch.
#[derive(clap::Args)]
pub struct IngestArgs {
    /// Files to add.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

/// Arguments for `mcblobs extract`.
#[derive(clap::Args)]
pub struct ExtractArgs {
    /// Blob id, as printed by `ingest`.
    pub id: String,

    /// Destination file.
    #[arg(short, long)]
    pub output: PathBuf,
}

/// Arguments for `mcblobs resize`.
///
/// Shrinking moves blobs to the other folders until the new maximum is
/// respected. The configuration file is not rewritten: update it too or
/// the old size comes back on the next run.
#[derive(clap::Args)]
pub struct ResizeArgs {
    /// Storage folder, as listed in the configuration.
    pub path: PathBuf,

    /// New maximum size in bytes.
    pub maximum_size: u64,
}

/// Arguments for `mcblobs remove`.
///
/// ```text
/// ┌──────────────┬─────────────────────────────────────────────────────┐
/// │ Step         │ Effect                                              │
/// ├──────────────┼─────────────────────────────────────────────────────┤
/// │ evacuate     │ copy each blob to the folder with most free space   │
/// │ switch       │ delete the original once the copy is in place       │
/// │ unregister   │ leave an empty metadata file behind                 │
/// └──────────────┴─────────────────────────────────────────────────────┘
/// ```
///
/// As with `resize`, remember to drop the folder from the configuration.
#[derive(clap::Args)]
pub struct RemoveArgs {
    /// Storage folder, as listed in the configuration.
    pub path: PathBuf,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("cannot start the async runtime")?;
    runtime.block_on(async {
        let config = StoreConfig::load(&cli.config)
            .with_context(|| format!("cannot load configuration {}", cli.config.display()))?;
        let store = open_store(&config).await?;

        let result = match cli.command {
            Commands::Status => cmd_status::run(&store),
            Commands::Ingest(args) => cmd_ingest::run(&store, &args).await,
            Commands::Extract(args) => cmd_extract::run(&store, &args).await,
            Commands::Resize(args) => cmd_resize::run(&store, &args).await,
            Commands::Remove(args) => cmd_remove::run(&store, &args).await,
            Commands::Check => cmd_check::run(&store).await,
        };

        let persisted = store.clone();
        tokio::task::spawn_blocking(move || persisted.persist_storage_folder_states())
            .await
            .context("metadata persister task failed")?;
        result
    })
}

/// Register every configured folder, in order.
async fn open_store(config: &StoreConfig) -> Result<FileBlobsManager> {
    let store = FileBlobsManager::new();
    for folder in &config.storage_folders {
        store
            .add_storage_folder(folder)
            .await
            .with_context(|| format!("cannot add storage folder {}", folder.path.display()))?;
    }
    Ok(store)
}

/// Human-readable byte count, e.g. `1.5 MiB`.
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    #[allow(clippy::cast_precision_loss)]
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
