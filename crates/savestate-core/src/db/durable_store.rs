//! libSQL implementation of the durable store boundary

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::Value;
use tokio::sync::Mutex;

use super::Database;
use crate::error::{Error, Result};
use crate::models::{DeadLetter, Operation, ProfileSnapshot};
use crate::storage::DurableStore;

const QUEUE_KEY: &str = "pending_queue";
const SNAPSHOT_KEY: &str = "profile_snapshot";

/// Persists the queue and snapshot as JSON blobs in `kv_store`.
#[derive(Clone)]
pub struct LibSqlDurableStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl LibSqlDurableStore {
    /// Open (or create) a store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = Database::open(&db_path).await?;
        tracing::debug!("Opened durable store at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Filesystem path backing this store, if any.
    pub fn db_path(&self) -> Option<&std::path::Path> {
        self.db_path.as_deref()
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query("SELECT value FROM kv_store WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row.get::<String>(0)?))
        } else {
            Ok(None)
        }
    }

    async fn set_value(&self, key: &str, value: String) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
                vec![
                    Value::Text(key.to_string()),
                    Value::Text(value),
                    Value::Integer(chrono::Utc::now().timestamp_millis()),
                ],
            )
            .await
            .map_err(|error| Error::Persistence(format!("failed to write {key}: {error}")))?;
        Ok(())
    }
}

#[async_trait]
impl DurableStore for LibSqlDurableStore {
    async fn load_queue(&self) -> Result<Vec<Operation>> {
        match self.get_value(QUEUE_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save_queue(&self, operations: &[Operation]) -> Result<()> {
        let raw = serde_json::to_string(operations)?;
        self.set_value(QUEUE_KEY, raw).await
    }

    async fn load_snapshot(&self) -> Result<Option<ProfileSnapshot>> {
        self.get_value(SNAPSHOT_KEY)
            .await?
            .map(|raw| serde_json::from_str(&raw).map_err(Error::from))
            .transpose()
    }

    async fn save_snapshot(&self, snapshot: &ProfileSnapshot) -> Result<()> {
        let raw = serde_json::to_string(snapshot)?;
        self.set_value(SNAPSHOT_KEY, raw).await
    }

    async fn record_dead_letter(&self, dead_letter: &DeadLetter) -> Result<()> {
        let operation = serde_json::to_string(&dead_letter.operation)?;
        let doc_id = dead_letter
            .operation
            .doc_id
            .clone()
            .map_or(Value::Null, Value::Text);

        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT INTO dead_letters (
                    operation_id, collection, doc_id, operation, error, permanent, dropped_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)",
                vec![
                    Value::Text(dead_letter.operation.id.as_str()),
                    Value::Text(dead_letter.operation.collection.clone()),
                    doc_id,
                    Value::Text(operation),
                    Value::Text(dead_letter.error.clone()),
                    Value::Integer(i64::from(dead_letter.permanent)),
                    Value::Integer(dead_letter.dropped_at),
                ],
            )
            .await
            .map_err(|error| Error::Persistence(format!("failed to record dead letter: {error}")))?;
        Ok(())
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT operation, error, permanent, dropped_at FROM dead_letters
                 ORDER BY dropped_at DESC, id DESC
                 LIMIT ?",
                [limit],
            )
            .await?;

        let mut dead_letters = Vec::new();
        while let Some(row) = rows.next().await? {
            let operation: String = row.get(0)?;
            dead_letters.push(DeadLetter {
                operation: serde_json::from_str(&operation)?,
                error: row.get(1)?,
                permanent: row.get::<i64>(2)? != 0,
                dropped_at: row.get(3)?,
            });
        }
        Ok(dead_letters)
    }
}
