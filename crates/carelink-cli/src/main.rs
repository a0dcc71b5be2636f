//! `carelink`: command-line front end for the KN-550BT blood pressure cuff.
//!
//! Owns the application wiring: it opens the SQLite history, builds the
//! cloud client from the config file, and hands both to the cuff service
//! together with the btleplug transport.

mod cli;
mod commands;
mod config;
mod format;
mod store;
mod style;
mod util;

use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use commands::{HistoryArgs, MeasureArgs, MeasureMode};
use config::Config;
use format::FormatOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "carelink", &mut io::stdout());
        return Ok(());
    }

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::load();
    let database = config.database_path(cli.database.clone());
    let output = cli.output.as_ref();
    let opts = FormatOptions::new(cli.no_color || output.is_some());
    let quiet = cli.quiet;

    match cli.command {
        Commands::Scan { timeout } => {
            commands::cmd_scan(timeout, &config, database, output, quiet).await
        }
        Commands::Measure { timeout, json } => {
            let args = MeasureArgs {
                mode: MeasureMode::Start,
                timeout,
                json,
                database,
                output,
                quiet,
                opts: &opts,
            };
            commands::cmd_measure(args, &config).await
        }
        Commands::Listen { json } => {
            let args = MeasureArgs {
                mode: MeasureMode::Listen,
                timeout: None,
                json,
                database,
                output,
                quiet,
                opts: &opts,
            };
            commands::cmd_measure(args, &config).await
        }
        Commands::History {
            limit,
            format,
            source,
            since,
            until,
            offset,
            oldest_first,
        } => commands::cmd_history(HistoryArgs {
            limit,
            source,
            since,
            until,
            offset,
            oldest_first,
            format,
            database: &database,
            output,
            opts: &opts,
        }),
        Commands::Clear { yes } => commands::cmd_clear(&database, yes, quiet),
        Commands::Sync => commands::cmd_sync(&config, &database, quiet).await,
        Commands::Status => commands::cmd_status(&config, &database, output, &opts).await,
        Commands::Config { action } => commands::cmd_config(action, quiet),
        Commands::Completions { .. } => Ok(()),
    }
}
