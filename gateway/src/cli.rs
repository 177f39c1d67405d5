//! CLI interface for Parley
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for controlling the gateway.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parley Gateway
///
/// Voice-enabled document assistant gateway: authenticates callers,
/// maintains conversational state, and orchestrates the transcription,
/// retrieval, generation and synthesis backends for each turn.
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the gateway server in the foreground
    Serve,

    /// Query a running gateway's health endpoint
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the resolved configuration
    Show,

    /// Print the configuration file path
    Path,
}
