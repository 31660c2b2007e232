use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "savestate")]
#[command(about = "Inspect and maintain local profile sync state")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the sync config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect the locally persisted profile snapshot
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Inspect or edit the pending mutation queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// List operations dropped after failing permanently or too often
    DeadLetters {
        /// Number of records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or create the sync config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum ProfileCommands {
    /// Print the reconciled profile
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List pending operations in execution order
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a pending operation and record it as a dead letter
    Drop {
        /// Operation ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective sync config
    Show,
    /// Write a config file with default values
    Init {
        /// Profile document id to sync
        #[arg(long, value_name = "ID")]
        profile_doc_id: Option<String>,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}
