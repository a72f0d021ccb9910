//! Wikisnap CLI - command-line interface for the wiki snapshot crawler.

mod commands;
mod config;
mod progress;
mod shutdown;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use console::{Term, style};
use tracing_subscriber::EnvFilter;
use wikisnap::sync::{SyncMode, SyncStatus};

#[derive(Parser)]
#[command(name = "wikisnap")]
#[command(version)]
#[command(about = "Incremental snapshots of a wiki's pages and votes")]
#[command(
    long_about = "Wikisnap crawls a wiki's page listing and per-page vote history from a \
GraphQL index under a rolling point budget, checkpoints its progress, and writes \
one consolidated snapshot per completed run."
)]
#[command(after_long_help = r#"EXAMPLES
    Crawl everything from scratch:
        $ wikisnap full

    Continue after an interruption:
        $ wikisnap resume

    Refresh votes over the last known page list:
        $ wikisnap votes --no-incremental

CONFIGURATION
    Wikisnap reads configuration from:
      1. ~/.config/wikisnap/config.toml (or $XDG_CONFIG_HOME/wikisnap/config.toml)
      2. ./wikisnap.toml
      3. Environment variables (WIKISNAP_ prefix, `__` between section and key)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    WIKISNAP_CRAWL__BASE_URL          Wiki URL prefix to crawl
    WIKISNAP_API__ENDPOINT            GraphQL endpoint
    WIKISNAP_OUTPUT__DATA_DIR         Checkpoint and snapshot directory
    WIKISNAP_RATE_LIMIT__POINT_BUDGET Points per rate-limit window
"#)]
struct Cli {
    /// What to run
    #[arg(value_enum)]
    mode: ModeArg,

    /// Wiki URL prefix to crawl (overrides config)
    #[arg(short = 'u', long)]
    base_url: Option<String>,

    /// Directory for checkpoints, snapshots and vote history (overrides config)
    #[arg(short = 'd', long)]
    data_dir: Option<PathBuf>,

    /// Pages per listing request
    #[arg(long)]
    page_batch_size: Option<u32>,

    /// Votes per vote-history request
    #[arg(long)]
    vote_batch_size: Option<u32>,

    /// Target requests per second
    #[arg(long)]
    rps: Option<f64>,

    /// Re-fetch every page's votes instead of skipping unchanged pages
    #[arg(long)]
    no_incremental: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// List pages from scratch, then collect votes
    Full,
    /// Continue from the latest checkpoints
    Resume,
    /// Collect votes over the last known page list
    Votes,
}

impl From<ModeArg> for SyncMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Full => SyncMode::Full,
            ModeArg::Resume => SyncMode::Resume,
            ModeArg::Votes => SyncMode::VotesOnly,
        }
    }
}

impl Cli {
    /// Apply flag overrides on top of the loaded configuration.
    fn apply(&self, config: &mut config::Config) {
        if let Some(ref base_url) = self.base_url {
            config.crawl.base_url = base_url.clone();
        }
        if let Some(ref dir) = self.data_dir {
            config.output.data_dir = Some(dir.clone());
        }
        if let Some(size) = self.page_batch_size {
            config.crawl.page_batch_size = size;
        }
        if let Some(size) = self.vote_batch_size {
            config.crawl.vote_batch_size = size;
        }
        if let Some(rps) = self.rps {
            config.rate_limit.requests_per_second = rps;
        }
        if self.no_incremental {
            config.crawl.incremental = false;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Initialize tracing for non-TTY mode (structured logging)
    if !Term::stdout().is_term() {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new("wikisnap=info,wikisnap_cli=info"),
        };

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    // Load configuration (config file -> env vars -> defaults), then flags
    let mut config = config::Config::load();
    cli.apply(&mut config);

    let shutdown = shutdown::setup_shutdown_handler();

    match commands::sync::handle_sync(cli.mode.into(), &config, shutdown).await {
        Ok(report) => {
            if report.status == SyncStatus::Interrupted {
                tracing::info!("Exiting after interruption; checkpoints saved");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            if Term::stderr().is_term() {
                eprintln!("{} {e}", style("Error:").red().bold());
            } else {
                tracing::error!(error = %e, "Sync failed");
            }
            ExitCode::FAILURE
        }
    }
}
