//! CLI argument definitions using clap.

use std::path::PathBuf;

use carelink_types::ReadingSource;
use clap::{Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

#[derive(Parser)]
#[command(name = "carelink")]
#[command(author, version, about = "CLI for the iHealth KN-550BT blood pressure monitor", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Database path (overrides config)
    #[arg(long, global = true, env = "CARELINK_DATABASE")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for the cuff and connect to it
    Scan {
        /// Scan timeout in seconds (default from config, else 10)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Connect and take a measurement
    Measure {
        /// Measurement timeout in seconds before the fallback reading
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Print the reading as JSON
        #[arg(long)]
        json: bool,
    },

    /// Connect and wait for a measurement started on the cuff
    Listen {
        /// Print the reading as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show stored readings
    History {
        /// Number of readings to show (0 for all)
        #[arg(short = 'n', long, default_value = "0")]
        limit: u32,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Only readings from this source (bluetooth, simulated, manual)
        #[arg(short, long)]
        source: Option<ReadingSource>,

        /// Readings taken at or after this date/time (RFC3339 or YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,

        /// Readings taken at or before this date/time (RFC3339 or YYYY-MM-DD)
        #[arg(long)]
        until: Option<String>,

        /// Skip this many readings
        #[arg(long, default_value = "0")]
        offset: u32,

        /// List oldest readings first
        #[arg(long)]
        oldest_first: bool,
    },

    /// Delete all stored readings
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Upload every stored reading to the cloud endpoint
    Sync,

    /// Show adapter, configuration and database status
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Configuration subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Store the cloud API key
    SetApiKey {
        /// API key (empty to remove)
        key: String,
    },

    /// Set the cloud endpoint URL
    SetEndpoint {
        /// Base URL, e.g. https://example.com/api
        url: String,
    },
}
