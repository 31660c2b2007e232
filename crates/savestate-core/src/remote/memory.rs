//! Loopback remote store for tests and offline demos.
//!
//! Watches fire synchronously on every `set`, including writes made by the
//! watching client itself, which mirrors how hosted document stores echo a
//! client's own writes back to it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{RemoteDocument, RemoteStore, RemoteWatch, WatchCallback};
use crate::error::RemoteError;
use crate::models::FieldMap;

type DocKey = (String, String);
type Watchers = HashMap<DocKey, Vec<(u64, WatchCallback)>>;

/// A recorded write, for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteWrite {
    Set {
        collection: String,
        doc_id: String,
        fields: FieldMap,
        merge: bool,
    },
    Delete {
        collection: String,
        doc_id: String,
    },
}

#[derive(Default)]
struct Failures {
    scripted: VecDeque<RemoteError>,
    always: Option<RemoteError>,
}

/// In-process [`RemoteStore`] with failure injection.
#[derive(Default)]
pub struct MemoryRemoteStore {
    documents: Mutex<HashMap<DocKey, FieldMap>>,
    watchers: Arc<Mutex<Watchers>>,
    next_watch_id: AtomicU64,
    failures: Mutex<Failures>,
    writes: Mutex<Vec<RemoteWrite>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn key(collection: &str, id: &str) -> DocKey {
    (collection.to_string(), id.to_string())
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next write with `error` (queued in call order).
    pub fn fail_next(&self, error: RemoteError) {
        lock(&self.failures).scripted.push_back(error);
    }

    /// Fail every write with `error` until cleared with `None`.
    pub fn fail_always(&self, error: Option<RemoteError>) {
        lock(&self.failures).always = error;
    }

    /// Current document contents without going through the async API.
    pub fn document(&self, collection: &str, id: &str) -> Option<FieldMap> {
        lock(&self.documents).get(&key(collection, id)).cloned()
    }

    /// All writes attempted so far, including failed ones.
    pub fn writes(&self) -> Vec<RemoteWrite> {
        lock(&self.writes).clone()
    }

    /// Number of live watches on a document.
    pub fn watcher_count(&self, collection: &str, id: &str) -> usize {
        lock(&self.watchers)
            .get(&key(collection, id))
            .map_or(0, Vec::len)
    }

    fn take_failure(&self) -> Option<RemoteError> {
        let mut failures = lock(&self.failures);
        failures
            .scripted
            .pop_front()
            .or_else(|| failures.always.clone())
    }

    fn notify(&self, collection: &str, id: &str, fields: FieldMap) {
        let callbacks: Vec<WatchCallback> = lock(&self.watchers)
            .get(&key(collection, id))
            .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();

        for callback in callbacks {
            callback(RemoteDocument {
                collection: collection.to_string(),
                doc_id: id.to_string(),
                fields: fields.clone(),
            });
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<FieldMap>, RemoteError> {
        Ok(self.document(collection, id))
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        fields: FieldMap,
        merge: bool,
    ) -> Result<(), RemoteError> {
        lock(&self.writes).push(RemoteWrite::Set {
            collection: collection.to_string(),
            doc_id: id.to_string(),
            fields: fields.clone(),
            merge,
        });
        if let Some(error) = self.take_failure() {
            return Err(error);
        }

        let stored = {
            let mut documents = lock(&self.documents);
            let entry = documents.entry(key(collection, id)).or_default();
            if merge {
                entry.extend(fields);
            } else {
                *entry = fields;
            }
            entry.clone()
        };
        self.notify(collection, id, stored);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        lock(&self.writes).push(RemoteWrite::Delete {
            collection: collection.to_string(),
            doc_id: id.to_string(),
        });
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        lock(&self.documents).remove(&key(collection, id));
        Ok(())
    }

    fn watch(&self, collection: &str, id: &str, callback: WatchCallback) -> RemoteWatch {
        let watch_id = self.next_watch_id.fetch_add(1, Ordering::SeqCst);
        let doc_key = key(collection, id);
        lock(&self.watchers)
            .entry(doc_key.clone())
            .or_default()
            .push((watch_id, Arc::clone(&callback)));

        // Latest-value semantics: a new watcher sees the current document
        if let Some(fields) = self.document(collection, id) {
            callback(RemoteDocument {
                collection: collection.to_string(),
                doc_id: id.to_string(),
                fields,
            });
        }

        let watchers = Arc::clone(&self.watchers);
        RemoteWatch::new(move || {
            let mut watchers = lock(&watchers);
            if let Some(entries) = watchers.get_mut(&doc_key) {
                entries.retain(|(existing, _)| *existing != watch_id);
                if entries.is_empty() {
                    watchers.remove(&doc_key);
                }
            }
        })
    }
}
