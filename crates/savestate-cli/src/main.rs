//! savestate CLI - inspect and maintain local profile sync state
//!
//! Reads the same durable store the sync engine writes: the reconciled
//! profile, the pending mutation queue and dropped operations.

mod cli;
mod commands;
mod config_file;
mod error;


use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::resolve_db_path;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::dead_letters::run_dead_letters;
use crate::commands::profile::run_profile;
use crate::commands::queue::run_queue;
use crate::config_file::resolve_config_path;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "savestate=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let config_path = resolve_config_path(cli.config);

    match cli.command {
        Commands::Profile { command } => run_profile(command, &db_path).await?,
        Commands::Queue { command } => run_queue(command, &db_path).await?,
        Commands::DeadLetters { limit, json } => {
            run_dead_letters(limit, json, &db_path).await?;
        }
        Commands::Config { command } => run_config(command, &config_path)?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
