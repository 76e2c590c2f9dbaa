//! MediaVault agent entry point.

mod app;
mod config;
mod janitor;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mediavault-agent", version, about = "Chunked media ingest and storage")]
struct Cli {
    /// Configuration file (defaults to the platform config directory).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files through the chunked path and print their artifacts.
    Ingest {
        /// Files to upload.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Chunk size in bytes (configured default when omitted).
        #[arg(long)]
        chunk_size: Option<u64>,

        /// Chunks in flight at once.
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
    /// Copy an assembled artifact out of storage.
    Fetch {
        /// Session id printed by `ingest`.
        session: String,

        /// Destination file.
        out: PathBuf,

        /// Fetch the thumbnail with this tag instead of the artifact.
        #[arg(long)]
        thumbnail: Option<String>,
    },
    /// Delete chunk files left behind by interrupted uploads.
    Sweep,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Configuration first so its log level can seed the filter.
    let config = config::Config::load(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        storage = %config.storage_root.display(),
        "starting MediaVault agent"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match cli.command {
            Commands::Ingest {
                files,
                chunk_size,
                concurrency,
            } => app::ingest(config, files, chunk_size, concurrency).await,
            Commands::Fetch {
                session,
                out,
                thumbnail,
            } => app::fetch(config, &session, &out, thumbnail.as_deref()).await,
            Commands::Sweep => app::sweep(config).await,
        }
    })
}
