use std::path::Path;
use std::sync::Arc;

use savestate_core::storage::DurableStore;
use savestate_core::sync::{EventBus, MutationQueue};
use savestate_core::{DeadLetter, Operation};

use crate::cli::QueueCommands;
use crate::commands::common::{
    format_operation_lines, normalize_operation_identifier, open_store, operation_to_item,
    resolve_operation, OperationListItem,
};
use crate::error::CliError;

const MANUAL_DROP_REASON: &str = "Dropped manually from the command line";

pub async fn run_queue(command: QueueCommands, db_path: &Path) -> Result<(), CliError> {
    match command {
        QueueCommands::List { json } => run_queue_list(json, db_path).await,
        QueueCommands::Drop { id } => run_queue_drop(&id, db_path).await,
    }
}

pub async fn run_queue_list(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let operations = store.load_queue().await?;

    if as_json {
        let json_items = operations
            .iter()
            .map(operation_to_item)
            .collect::<Vec<OperationListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("No pending operations.");
        return Ok(());
    }

    for line in format_operation_lines(&operations) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_queue_drop(id: &str, db_path: &Path) -> Result<(), CliError> {
    let store: Arc<dyn DurableStore> = Arc::new(open_store(db_path).await?);
    let dropped = drop_operation(id, store).await?;
    println!("{}", dropped.id);
    Ok(())
}

/// Remove the pending operation matching `id` and keep a dead-letter record of it.
pub async fn drop_operation(
    id: &str,
    store: Arc<dyn DurableStore>,
) -> Result<Operation, CliError> {
    let query = normalize_operation_identifier(id)?;
    let mut queue = MutationQueue::load(Arc::clone(&store), EventBus::new(1)).await?;
    let target = resolve_operation(&query, queue.pending())?.id;

    let Some(operation) = queue.remove(target).await? else {
        return Err(CliError::OperationNotFound(query));
    };
    store
        .record_dead_letter(&DeadLetter::new(
            operation.clone(),
            MANUAL_DROP_REASON,
            true,
        ))
        .await?;

    tracing::info!(op_id = %operation.id, "Dropped pending operation");
    Ok(operation)
}
