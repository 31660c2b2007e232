use std::path::Path;

use savestate_core::storage::DurableStore;

use crate::cli::ProfileCommands;
use crate::commands::common::{format_profile_lines, open_store};
use crate::error::CliError;

pub async fn run_profile(command: ProfileCommands, db_path: &Path) -> Result<(), CliError> {
    match command {
        ProfileCommands::Show { json } => run_profile_show(json, db_path).await,
    }
}

pub async fn run_profile_show(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let Some(profile) = store.load_snapshot().await? else {
        println!("No profile snapshot stored yet.");
        return Ok(());
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    } else {
        for line in format_profile_lines(&profile) {
            println!("{line}");
        }
    }
    Ok(())
}
