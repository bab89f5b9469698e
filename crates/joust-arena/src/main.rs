use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use joust::config::JoustConfig;
use joust::store::{MemoryStore, SharedStore};
use joust::JoustEngine;
use joust_arena::Fixture;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Seed a fixture and drive its contest to completion, printing the results
    Run {
        /// Arena fixture (TOML)
        #[arg(long)]
        fixture: PathBuf,

        /// Engine config (TOML); replaces the fixture's [config] table
        #[arg(long)]
        config: Option<PathBuf>,

        /// Persist to a RocksDB directory instead of memory
        #[cfg(feature = "rocksdb-store")]
        #[arg(long)]
        state_path: Option<PathBuf>,
    },
    /// Print the effective engine configuration
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>, fallback: JoustConfig) -> Result<JoustConfig> {
    match path {
        Some(path) => JoustConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(fallback),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Config { config } => {
            let mut config = load_config(config.as_ref(), JoustConfig::default())?;
            if config.analyst.api_key.is_some() {
                config.analyst.api_key = Some("<redacted>".into());
            }
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Command::Run {
            fixture,
            config,
            #[cfg(feature = "rocksdb-store")]
            state_path,
        } => {
            let fixture = Fixture::load(&fixture)?;
            let config = load_config(config.as_ref(), fixture.config.clone())?;

            #[cfg(feature = "rocksdb-store")]
            let store: SharedStore = match state_path {
                Some(path) => joust::store::RocksStore::open(&path)
                    .with_context(|| format!("failed to open store {}", path.display()))?
                    .shared(),
                None => MemoryStore::new().shared(),
            };
            #[cfg(not(feature = "rocksdb-store"))]
            let store: SharedStore = MemoryStore::new().shared();

            fixture.seed(store.as_ref())?;

            info!(
                decision_mode = %config.decision_mode,
                callback_timeout_ms = config.callback_timeout_ms,
                "Joust arena starting"
            );
            let engine = JoustEngine::from_config(store, config)?;
            let contest = engine.create_contest(fixture.contest()?)?;
            let results = engine.run_to_completion(&contest.id).await?;

            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }

    Ok(())
}
