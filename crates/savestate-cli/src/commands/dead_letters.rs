use std::path::Path;

use savestate_core::storage::DurableStore;

use crate::commands::common::{
    dead_letter_to_item, format_dead_letter_lines, open_store, DeadLetterItem,
};
use crate::error::CliError;

pub async fn run_dead_letters(
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let dead_letters = store.list_dead_letters(limit).await?;

    if as_json {
        let json_items = dead_letters
            .iter()
            .map(dead_letter_to_item)
            .collect::<Vec<DeadLetterItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if dead_letters.is_empty() {
        println!("No dropped operations recorded.");
        return Ok(());
    }

    for line in format_dead_letter_lines(&dead_letters) {
        println!("{line}");
    }
    Ok(())
}
