//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod fetch;
mod run;
mod status;
mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{Config, ScraperConfig};

#[derive(Parser)]
#[command(name = "jobfair")]
#[command(about = "Hong Kong job fair listing acquisition")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output directory for scraped events (overrides config file)
    #[arg(long, global = true, env = "JOBFAIR_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Show last output and schedule state for each configured source
    Status,

    /// Run the scrape pipeline for API sources
    Run {
        /// Source IDs to run (all API sources if omitted)
        source_ids: Vec<String>,
        /// Ignore update frequency and run anyway
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a JSON array of raw records and print the normalized events
    Validate {
        /// File containing a JSON array of raw records
        file: PathBuf,
        /// Source ID whose metadata is applied
        #[arg(short, long)]
        source: String,
    },

    /// Fetch one URL using a source's fetch strategy and print the body
    Fetch {
        /// Source ID providing strategy, retries and browser settings
        source_id: String,
        /// URL to fetch
        url: String,
        /// CSS selector to wait for (rendered sources only)
        #[arg(long)]
        selector: Option<String>,
    },
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };
    let data_dir = cli.data_dir.clone().unwrap_or_else(|| config.data_dir());

    match cli.command {
        Commands::Status => status::cmd_status(&config, &data_dir),
        Commands::Run { source_ids, force } => {
            run::cmd_run(&config, &data_dir, &source_ids, force).await
        }
        Commands::Validate { file, source } => {
            validate::cmd_validate(&config, &file, &source).await
        }
        Commands::Fetch {
            source_id,
            url,
            selector,
        } => fetch::cmd_fetch(&config, &source_id, &url, selector.as_deref()).await,
    }
}

/// Look up a configured source or fail with the list of known ids.
fn require_source<'a>(config: &'a Config, source_id: &str) -> anyhow::Result<&'a ScraperConfig> {
    config.source(source_id).ok_or_else(|| {
        let known: Vec<&str> = config.sources.keys().map(|k| k.as_str()).collect();
        anyhow::anyhow!(
            "Unknown source '{}'. Configured sources: {}",
            source_id,
            if known.is_empty() {
                "(none)".to_string()
            } else {
                known.join(", ")
            }
        )
    })
}
