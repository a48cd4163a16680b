use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mnemo::facade::SearchRequest;
use mnemo::store::Filter;
use mnemo::{MemoryEngine, MnemoConfig};

#[derive(Parser)]
#[command(name = "mnemo", version, about = "Local-first hybrid memory and retrieval engine")]
struct Cli {
    /// Path to a config file (defaults to ~/.mnemo/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a project directory into the store
    Index {
        path: PathBuf,
        /// Only process files changed since the last sync
        #[arg(long)]
        incremental: bool,
    },
    /// Search the store with hybrid vector + keyword ranking
    Search {
        query: String,
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
        /// Restrict results to one project path
        #[arg(long)]
        project: Option<String>,
    },
    /// Watch a project directory and index changes as they happen
    Watch { path: PathBuf },
    /// Print store statistics
    Stats,
    /// Remove memories whose confidence has decayed below the cleanup threshold
    Cleanup,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MnemoConfig::load_from(path)?,
        None => MnemoConfig::load()?,
    };

    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let engine = MemoryEngine::new(config)?;

    match cli.command {
        Command::Index { path, incremental } => {
            let path = path.canonicalize()?;
            let report = if incremental {
                engine.sync(&path).await?
            } else {
                engine.index(&path).await?
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Search {
            query,
            top_k,
            project,
        } => {
            let response = engine
                .search(&SearchRequest {
                    query,
                    top_k,
                    filter: Filter {
                        project_path: project,
                        ..Filter::default()
                    },
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Watch { path } => {
            let path = path.canonicalize()?;
            let report = engine.sync(&path).await?;
            tracing::info!(
                indexed = report.indexed,
                deleted = report.deleted,
                "initial sync complete, watching for changes"
            );
            let handle = engine.watch(&path)?;
            tokio::signal::ctrl_c().await?;
            handle.stop().await;
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&engine.stats()?)?);
        }
        Command::Cleanup => {
            println!("{}", serde_json::to_string_pretty(&engine.cleanup()?)?);
        }
    }

    Ok(())
}
