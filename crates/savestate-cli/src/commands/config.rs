use std::path::Path;

use savestate_core::util::normalize_text_option;
use savestate_core::SyncConfig;

use crate::cli::ConfigCommands;
use crate::config_file::{load_config, save_config};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, config_path: &Path) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => run_config_show(config_path),
        ConfigCommands::Init {
            profile_doc_id,
            force,
        } => run_config_init(profile_doc_id, force, config_path),
    }
}

pub fn run_config_show(config_path: &Path) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    if !config_path.exists() {
        eprintln!(
            "No config file at {}; showing defaults",
            config_path.display()
        );
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

pub fn run_config_init(
    profile_doc_id: Option<String>,
    force: bool,
    config_path: &Path,
) -> Result<(), CliError> {
    let config = init_config(profile_doc_id, force, config_path)?;
    tracing::debug!(?config, "Wrote sync config");
    println!("{}", config_path.display());
    Ok(())
}

/// Write a default config to `config_path`, keeping an existing file unless `force`.
pub fn init_config(
    profile_doc_id: Option<String>,
    force: bool,
    config_path: &Path,
) -> Result<SyncConfig, CliError> {
    if config_path.exists() && !force {
        return Err(CliError::Config(format!(
            "{} already exists; pass --force to overwrite it",
            config_path.display()
        )));
    }

    let config = SyncConfig {
        profile_doc_id: normalize_text_option(profile_doc_id),
        ..SyncConfig::default()
    };
    save_config(&config, config_path)?;
    Ok(config)
}
