use std::env;
use std::path::{Path, PathBuf};

use chrono::Utc;
use savestate_core::db::LibSqlDurableStore;
use savestate_core::{DeadLetter, Operation, ProfileSnapshot};
use serde::Serialize;

use crate::error::CliError;

const SHORT_ID_LEN: usize = 13;

#[derive(Debug, Serialize)]
pub struct OperationListItem {
    pub id: String,
    pub kind: String,
    pub collection: String,
    pub doc_id: Option<String>,
    pub merge: bool,
    pub retries: u32,
    pub enqueued_at: i64,
    pub relative_time: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeadLetterItem {
    pub operation_id: String,
    pub collection: String,
    pub doc_id: Option<String>,
    pub retries: u32,
    pub permanent: bool,
    pub error: String,
    pub dropped_at: i64,
    pub dropped_at_iso: String,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("SAVESTATE_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("savestate")
        .join("savestate.db")
}

pub async fn open_store(path: &Path) -> Result<LibSqlDurableStore, CliError> {
    Ok(LibSqlDurableStore::open_path(path.to_path_buf()).await?)
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

pub fn normalize_operation_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyOperationId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Find the pending operation whose id equals or starts with `query`.
pub fn resolve_operation<'a>(
    query: &str,
    operations: &'a [Operation],
) -> Result<&'a Operation, CliError> {
    if let Some(exact) = operations.iter().find(|op| op.id.as_str() == query) {
        return Ok(exact);
    }

    let matches = operations
        .iter()
        .filter(|op| op.id.as_str().starts_with(query))
        .collect::<Vec<_>>();

    match matches.as_slice() {
        [] => Err(CliError::OperationNotFound(query.to_string())),
        [single] => Ok(single),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|op| short_id(&op.id.as_str()))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousOperationId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

fn kind_label(op: &Operation) -> String {
    format!("{:?}", op.kind).to_ascii_lowercase()
}

pub fn operation_to_item(op: &Operation) -> OperationListItem {
    let now_ms = Utc::now().timestamp_millis();
    let mut fields = op.payload.keys().cloned().collect::<Vec<_>>();
    fields.sort();
    OperationListItem {
        id: op.id.to_string(),
        kind: kind_label(op),
        collection: op.collection.clone(),
        doc_id: op.doc_id.clone(),
        merge: op.merge.is_merge(),
        retries: op.retries,
        enqueued_at: op.enqueued_at,
        relative_time: format_relative_time(op.enqueued_at, now_ms),
        fields,
    }
}

pub fn format_operation_lines(operations: &[Operation]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    operations
        .iter()
        .map(|op| {
            let target = format!(
                "{}/{}",
                op.collection,
                op.doc_id.as_deref().unwrap_or("<auto>")
            );
            format!(
                "{:<13}  {:<6}  {:<32}  retries={}  {}",
                short_id(&op.id.as_str()),
                kind_label(op),
                target,
                op.retries,
                format_relative_time(op.enqueued_at, now_ms)
            )
        })
        .collect()
}

pub fn dead_letter_to_item(dead_letter: &DeadLetter) -> DeadLetterItem {
    DeadLetterItem {
        operation_id: dead_letter.operation.id.to_string(),
        collection: dead_letter.operation.collection.clone(),
        doc_id: dead_letter.operation.doc_id.clone(),
        retries: dead_letter.operation.retries,
        permanent: dead_letter.permanent,
        error: dead_letter.error.clone(),
        dropped_at: dead_letter.dropped_at,
        dropped_at_iso: format_timestamp(dead_letter.dropped_at),
    }
}

pub fn format_dead_letter_lines(dead_letters: &[DeadLetter]) -> Vec<String> {
    dead_letters
        .iter()
        .map(|dead_letter| {
            let reason = if dead_letter.permanent {
                "rejected"
            } else {
                "exhausted"
            };
            format!(
                "{}  {:<9}  op={}  target={}/{}  {}",
                format_timestamp(dead_letter.dropped_at),
                reason,
                short_id(&dead_letter.operation.id.as_str()),
                dead_letter.operation.collection,
                dead_letter.operation.doc_id.as_deref().unwrap_or("<auto>"),
                dead_letter.error
            )
        })
        .collect()
}

pub fn format_profile_lines(profile: &ProfileSnapshot) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    let mut lines = Vec::new();

    let scalars = &profile.scalars;
    lines.push(format!(
        "name:        {}",
        scalars.display_name.as_deref().unwrap_or("-")
    ));
    if let Some(title) = scalars.title.as_deref() {
        lines.push(format!("title:       {title}"));
    }
    if let Some(avatar) = scalars.avatar.as_deref() {
        lines.push(format!("avatar:      {avatar}"));
    }

    let progress = &profile.progress;
    lines.push(format!("level:       {}", progress.level));
    lines.push(format!("xp:          {}", progress.xp));
    lines.push(format!("coins:       {}", progress.total_coins));
    lines.push(format!("best streak: {}", progress.longest_streak));
    for (game, score) in &progress.high_scores {
        lines.push(format!("high score:  {game} = {score}"));
    }

    let unlocks = &profile.unlocks;
    if !unlocks.achievements.is_empty() {
        lines.push(format!("achievements: {}", join_set(&unlocks.achievements)));
    }
    if !unlocks.unlocked_skills.is_empty() {
        lines.push(format!("skills:       {}", join_set(&unlocks.unlocked_skills)));
    }

    lines.push(format!(
        "modified:    {} ({})",
        format_timestamp(profile.last_modified),
        format_relative_time(profile.last_modified, now_ms)
    ));
    lines
}

fn join_set(values: &std::collections::BTreeSet<String>) -> String {
    values.iter().cloned().collect::<Vec<_>>().join(", ")
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}
