//! Command-line interface components
//!
//! Argument parsing and command handlers for the FolioFox binary.

pub mod args;
pub mod commands;

pub use args::{
    Cli, Commands, GlobalArgs, IndexerAction, IndexerArgs, QueueAction, QueueArgs, SearchArgs,
};
pub use commands::{handle_indexer, handle_queue, handle_search};
