//! FolioFox CLI application
//!
//! Command-line interface for searching eBook indexers and running the
//! download queue.

use std::process;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use foliofox::cli::{handle_indexer, handle_queue, handle_search, Cli, Commands};
use foliofox::config::AppConfig;
use foliofox::errors::Result;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(&cli);

    info!("FolioFox v{} starting", env!("CARGO_PKG_VERSION"));

    let config_path = match &cli.global.config {
        Some(path) => path.clone(),
        None => AppConfig::default_path()?,
    };
    let config = AppConfig::load_or_create(&config_path)?;

    match cli.command {
        Commands::Search(args) => handle_search(args, &config).await,
        Commands::Queue(args) => handle_queue(args, &config).await,
        Commands::Indexer(args) => handle_indexer(args, &config).await,
    }
}

/// Initialize logging based on CLI verbosity settings
fn init_logging(cli: &Cli) {
    // The directive string is built from a fixed set of level names
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("foliofox={}", cli.log_level()).parse().unwrap());

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
