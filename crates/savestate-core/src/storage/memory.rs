//! In-memory durable store for tests and ephemeral sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::DurableStore;
use crate::models::{DeadLetter, Operation, ProfileSnapshot};
use crate::{Error, Result};

#[derive(Default)]
struct Contents {
    queue: Vec<Operation>,
    snapshot: Option<ProfileSnapshot>,
    dead_letters: Vec<DeadLetter>,
}

/// Process-local [`DurableStore`]. Clones are not shared; wrap it in an `Arc`.
#[derive(Default)]
pub struct MemoryDurableStore {
    contents: Mutex<Contents>,
    fail_writes: AtomicBool,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Persistence("storage is read-only".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Contents>> {
        self.contents
            .lock()
            .map_err(|_| Error::Persistence("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn load_queue(&self) -> Result<Vec<Operation>> {
        Ok(self.lock()?.queue.clone())
    }

    async fn save_queue(&self, operations: &[Operation]) -> Result<()> {
        self.check_writable()?;
        self.lock()?.queue = operations.to_vec();
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<ProfileSnapshot>> {
        Ok(self.lock()?.snapshot.clone())
    }

    async fn save_snapshot(&self, snapshot: &ProfileSnapshot) -> Result<()> {
        self.check_writable()?;
        self.lock()?.snapshot = Some(snapshot.clone());
        Ok(())
    }

    async fn record_dead_letter(&self, dead_letter: &DeadLetter) -> Result<()> {
        self.check_writable()?;
        self.lock()?.dead_letters.push(dead_letter.clone());
        Ok(())
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        Ok(self
            .lock()?
            .dead_letters
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldMap;

    #[tokio::test]
    async fn failing_writes_leave_contents_untouched() {
        let store = MemoryDurableStore::new();
        let op = Operation::update("profiles", "p1", FieldMap::new());
        store.save_queue(std::slice::from_ref(&op)).await.unwrap();

        store.set_fail_writes(true);
        assert!(store.save_queue(&[]).await.is_err());
        assert_eq!(store.load_queue().await.unwrap(), vec![op]);
    }

    #[tokio::test]
    async fn dead_letters_are_listed_newest_first() {
        let store = MemoryDurableStore::new();
        for error in ["first", "second", "third"] {
            let op = Operation::delete("profiles", error);
            store
                .record_dead_letter(&DeadLetter::new(op, error, false))
                .await
                .unwrap();
        }

        let listed = store.list_dead_letters(2).await.unwrap();
        let errors: Vec<&str> = listed.iter().map(|letter| letter.error.as_str()).collect();
        assert_eq!(errors, vec!["third", "second"]);
    }
}
