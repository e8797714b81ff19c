//! # Docflow ingestion worker (`docflow`)
//!
//! ## Usage
//!
//! ```bash
//! docflow --config ./config/docflow.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docflow init` | Create the pgvector extension and tables |
//! | `docflow run` | Consume upload events until Ctrl-C / SIGTERM |
//! | `docflow reap` | Reset documents stuck in `processing` and re-publish them |
//! | `docflow check-config` | Load and validate configuration, then print it |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docflow_ingest::{config, logging, migrate};

/// Docflow ingestion worker: turns uploaded documents into embedded chunks.
#[derive(Parser)]
#[command(name = "docflow", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Values for `DATABASE_URL`, `KAFKA_BROKERS`, `EMBEDDING_BASE_URL`,
    /// `AWS_REGION` and `AWS_BUCKET` in the environment override the file.
    #[arg(long, global = true, default_value = "./config/docflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Start the consumer workers (and the reaper, when enabled).
    Run,

    /// Run one reaper pass and print the documents that were reset.
    Reap {
        /// Override the configured lease, in seconds.
        #[arg(long)]
        lease_secs: Option<u64>,
    },

    /// Validate the configuration and print the effective values.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Run => run(&cfg).await?,
        Commands::Reap { lease_secs } => reap(&cfg, lease_secs).await?,
        Commands::CheckConfig => {
            println!("{}", toml::to_string_pretty(&cfg.redacted())?);
        }
    }

    Ok(())
}

#[cfg(feature = "kafka")]
async fn run(cfg: &config::Config) -> anyhow::Result<()> {
    docflow_ingest::service::run(cfg).await
}

#[cfg(feature = "kafka")]
async fn reap(cfg: &config::Config, lease_secs: Option<u64>) -> anyhow::Result<()> {
    docflow_ingest::service::reap(cfg, lease_secs).await
}

#[cfg(not(feature = "kafka"))]
async fn run(_cfg: &config::Config) -> anyhow::Result<()> {
    anyhow::bail!("docflow was built without the `kafka` feature")
}

#[cfg(not(feature = "kafka"))]
async fn reap(_cfg: &config::Config, _lease_secs: Option<u64>) -> anyhow::Result<()> {
    anyhow::bail!("docflow was built without the `kafka` feature")
}
