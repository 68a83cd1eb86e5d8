//! Command-line argument parsing for FolioFox
//!
//! Defines the CLI structure with clap derive macros: searching across
//! indexers, managing the download queue, and inspecting indexer health.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// FolioFox - eBook acquisition manager
#[derive(Parser, Debug)]
#[command(
    name = "foliofox",
    version,
    about = "Search eBook indexers and manage a prioritized download queue",
    long_about = "FolioFox fans searches out across your configured indexers (Prowlarr, \
Jackett, Open Library), merges and ranks the results, and runs downloads through a \
bounded-concurrency queue with automatic retry."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Tracing level derived from the verbosity flags
    pub fn log_level(&self) -> &'static str {
        if self.global.quiet {
            "warn"
        } else if self.global.very_verbose {
            "trace"
        } else if self.global.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (trace level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search all configured indexers
    Search(SearchArgs),

    /// Manage the download queue
    Queue(QueueArgs),

    /// Inspect and manage indexers
    Indexer(IndexerArgs),
}

/// Arguments for the search command
#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Search query (title, author, ISBN, ...)
    #[arg(value_name = "QUERY")]
    pub query: String,

    /// Restrict results to these formats (epub, mobi, azw3, pdf, djvu)
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Vec<String>,

    /// Restrict results to a language code (e.g. "en")
    #[arg(short, long)]
    pub language: Option<String>,

    /// Minimum quality score (0-100)
    #[arg(long, value_name = "SCORE")]
    pub min_quality: Option<f32>,

    /// Maximum file size in MiB
    #[arg(long, value_name = "MIB")]
    pub max_size: Option<u64>,

    /// Search only these indexer ids
    #[arg(short, long, value_name = "ID")]
    pub indexer: Vec<u32>,

    /// Maximum results to display
    #[arg(long, default_value = "25")]
    pub limit: usize,
}

/// Arguments for queue management
#[derive(Args, Debug)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub action: QueueAction,
}

/// Queue management actions
#[derive(Subcommand, Debug)]
pub enum QueueAction {
    /// Add a download to the queue
    Add {
        /// Book title
        #[arg(value_name = "TITLE")]
        title: String,

        /// Download URL
        #[arg(value_name = "URL")]
        url: String,

        /// Author name
        #[arg(short, long)]
        author: Option<String>,

        /// File format (epub, mobi, azw3, pdf, djvu)
        #[arg(short, long, default_value = "epub")]
        format: String,

        /// Priority 1 (most urgent) to 10
        #[arg(short, long)]
        priority: Option<u8>,
    },

    /// List queue items
    List {
        /// Filter by status (pending, downloading, paused, completed, failed, cancelled)
        #[arg(short, long)]
        status: Option<String>,

        /// Skip this many items
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Maximum items to show
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Pause a pending item
    Pause {
        #[arg(value_name = "ID")]
        id: u64,
    },

    /// Resume a paused item
    Resume {
        #[arg(value_name = "ID")]
        id: u64,
    },

    /// Cancel an item, aborting any in-flight transfer
    Cancel {
        #[arg(value_name = "ID")]
        id: u64,
    },

    /// Retry a failed item immediately
    Retry {
        #[arg(value_name = "ID")]
        id: u64,
    },

    /// Change an item's priority
    Priority {
        #[arg(value_name = "ID")]
        id: u64,

        /// New priority, 1 (most urgent) to 10
        #[arg(value_name = "PRIORITY")]
        priority: u8,
    },

    /// Run download workers until the queue drains or Ctrl-C
    Run {
        /// Override the configured worker count
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Show queue counters
    Stats,

    /// Show download history
    History,
}

/// Arguments for indexer management
#[derive(Args, Debug)]
pub struct IndexerArgs {
    #[command(subcommand)]
    pub action: IndexerAction,
}

/// Indexer management actions
#[derive(Subcommand, Debug)]
pub enum IndexerAction {
    /// List configured indexers and their health
    List,

    /// Probe an indexer's API
    Test {
        #[arg(value_name = "ID")]
        id: u32,
    },

    /// Put an indexer into or out of maintenance
    Maintenance {
        #[arg(value_name = "ID")]
        id: u32,

        /// Leave maintenance instead of entering it
        #[arg(long)]
        off: bool,
    },
}
