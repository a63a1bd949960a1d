use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lineage_editor::lineage::LineageGrouper;
use lineage_editor::media::{import_folder, LocalBlobStore};
use lineage_editor::state::{Library, Workspace};
use lineage_editor::{Config, Result};

/// Catalog tool for the lineage editor
#[derive(Debug, Parser)]
#[command(name = "lineage-editor", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Import every png/jpg/webp below a folder as new root images
    Import { dir: PathBuf },
    /// Reload the catalog, prune abandoned jobs and print version rows
    Rows {
        /// Load at most this many completed images
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let library = Library::open(&config.catalog_path)?;
    let image_count = library.image_count()?;
    info!("🎨 Lineage editor catalog has {} images", image_count);

    match cli.command {
        Command::Import { dir } => {
            // Import runs off the async runtime; SQLite and decoding block
            let result = tokio::task::spawn_blocking(move || -> Result<_> {
                let blobs = LocalBlobStore::open(&config.blob_dir)?;
                import_folder(&dir, &library, &blobs, &config)
            })
            .await??;

            println!(
                "Added {} images, skipped {} duplicates, {} failed.",
                result.imported_count, result.skipped_count, result.failed_count
            );
        }
        Command::Rows { limit } => {
            let grouper = LineageGrouper::from_config(&config);
            let mut workspace = Workspace::default();
            let outcome = workspace.reload_page(&library, &grouper, limit, Utc::now())?;

            for row in &outcome.rows {
                println!("{}  [{}]  {}", row.created_at.format("%Y-%m-%d %H:%M"), row.key, row.title);
                for image in &row.images {
                    let state = if image.is_generating { "generating" } else { "ready" };
                    println!(
                        "    {:<36}  {:<24}  {}x{}  {}",
                        image.id,
                        image.display_title(),
                        image.display_width,
                        image.display_height,
                        state
                    );
                }
            }
            if !outcome.abandoned_jobs.is_empty() {
                println!("Pruned {} abandoned jobs.", outcome.abandoned_jobs.len());
            }
        }
    }

    Ok(())
}
