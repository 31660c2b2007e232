//! Remote watch channel.
//!
//! Wraps [`RemoteStore::watch`] with one active subscription per document and
//! immediate cancellation: once [`WatchSubscription::unsubscribe`] returns, no
//! callback for that subscription is running and none will start.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use crate::models::ProfileSnapshot;
use crate::remote::{RemoteDocument, RemoteStore, RemoteWatch, WatchCallback};

/// A decoded remote profile change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    pub doc_id: String,
    pub snapshot: ProfileSnapshot,
}

impl RemoteChange {
    pub fn new(doc_id: impl Into<String>, snapshot: ProfileSnapshot) -> Self {
        Self {
            doc_id: doc_id.into(),
            snapshot,
        }
    }

    /// Session that wrote this version, when the writer tagged it.
    pub fn origin(&self) -> Option<&str> {
        self.snapshot.last_writer.as_deref()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Debug)]
struct ActiveWatch {
    id: u64,
    /// Read-held while a callback runs; cleared under the write lock
    live: RwLock<bool>,
    remote_watch: Mutex<Option<RemoteWatch>>,
}

impl ActiveWatch {
    fn is_live(&self) -> bool {
        *self
            .live
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Blocks until in-flight callbacks finish, then cancels the remote watch.
    fn deactivate(&self) {
        *self
            .live
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = false;
        if let Some(remote_watch) = lock(&self.remote_watch).take() {
            remote_watch.cancel();
        }
    }
}

type ActiveWatches = Arc<Mutex<HashMap<String, Arc<ActiveWatch>>>>;

/// Profile document subscriptions on one remote collection.
pub struct RemoteWatchChannel {
    remote: Arc<dyn RemoteStore>,
    collection: String,
    active: ActiveWatches,
    next_id: AtomicU64,
}

impl std::fmt::Debug for RemoteWatchChannel {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteWatchChannel")
            .field("collection", &self.collection)
            .field("active", &lock(&self.active).len())
            .finish_non_exhaustive()
    }
}

impl RemoteWatchChannel {
    pub fn new(remote: Arc<dyn RemoteStore>, collection: impl Into<String>) -> Self {
        Self {
            remote,
            collection: collection.into(),
            active: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Deliver every authoritative change of `doc_id` to `on_change`.
    ///
    /// Replaces any existing subscription for the same document. Documents
    /// that do not decode as a profile are logged and skipped. `on_change`
    /// must not unsubscribe from inside the callback.
    pub fn subscribe<F>(&self, doc_id: impl Into<String>, on_change: F) -> WatchSubscription
    where
        F: Fn(RemoteChange) + Send + Sync + 'static,
    {
        let doc_id = doc_id.into();
        let watch = Arc::new(ActiveWatch {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            live: RwLock::new(true),
            remote_watch: Mutex::new(None),
        });

        let replaced = lock(&self.active).insert(doc_id.clone(), Arc::clone(&watch));
        if let Some(previous) = replaced {
            tracing::debug!(doc_id = %doc_id, "Replacing existing watch subscription");
            previous.deactivate();
        }

        let callback = delivery_callback(Arc::downgrade(&watch), on_change);
        let remote_watch = self.remote.watch(&self.collection, &doc_id, callback);
        *lock(&watch.remote_watch) = Some(remote_watch);
        // Replaced while the remote watch was being set up
        if !watch.is_live() {
            watch.deactivate();
        }

        tracing::debug!(collection = %self.collection, doc_id = %doc_id, "Subscribed to remote document");
        WatchSubscription {
            doc_id,
            watch,
            active: Arc::downgrade(&self.active),
        }
    }

    pub fn is_subscribed(&self, doc_id: &str) -> bool {
        lock(&self.active).contains_key(doc_id)
    }

    /// Cancel every subscription created through this channel.
    pub fn unsubscribe_all(&self) {
        let watches: Vec<_> = lock(&self.active).drain().map(|(_, watch)| watch).collect();
        for watch in watches {
            watch.deactivate();
        }
    }
}

fn delivery_callback<F>(watch: Weak<ActiveWatch>, on_change: F) -> WatchCallback
where
    F: Fn(RemoteChange) + Send + Sync + 'static,
{
    Arc::new(move |document: RemoteDocument| {
        let Some(watch) = watch.upgrade() else {
            return;
        };
        let live = watch
            .live
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !*live {
            return;
        }

        match ProfileSnapshot::from_fields(document.fields) {
            Ok(snapshot) => on_change(RemoteChange::new(document.doc_id, snapshot)),
            Err(error) => tracing::warn!(
                collection = %document.collection,
                doc_id = %document.doc_id,
                "Ignoring undecodable remote profile: {error}"
            ),
        }
    })
}

/// Handle for one document subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct WatchSubscription {
    doc_id: String,
    watch: Arc<ActiveWatch>,
    active: Weak<Mutex<HashMap<String, Arc<ActiveWatch>>>>,
}

impl WatchSubscription {
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Stop delivery. Returns once no callback is running.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        self.watch.deactivate();
        if let Some(active) = self.active.upgrade() {
            let mut active = lock(&active);
            if active
                .get(&self.doc_id)
                .is_some_and(|current| current.id == self.watch.id)
            {
                active.remove(&self.doc_id);
            }
        }
        tracing::debug!(doc_id = %self.doc_id, "Unsubscribed from remote document");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldMap;
    use crate::remote::MemoryRemoteStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn fields(value: serde_json::Value) -> FieldMap {
        value.as_object().cloned().unwrap()
    }

    fn recorder() -> (impl Fn(RemoteChange) + Send + Sync + 'static, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let on_change = move |change: RemoteChange| {
            sink.lock().unwrap().push(change.snapshot.progress.xp);
        };
        (on_change, seen)
    }

    fn channel() -> (RemoteWatchChannel, Arc<MemoryRemoteStore>) {
        let remote = Arc::new(MemoryRemoteStore::new());
        (RemoteWatchChannel::new(remote.clone(), "profiles"), remote)
    }

    #[tokio::test]
    async fn delivers_current_value_then_changes() {
        let (channel, remote) = channel();
        remote
            .set("profiles", "p1", fields(json!({ "xp": 10 })), false)
            .await
            .unwrap();

        let (on_change, seen) = recorder();
        let _subscription = channel.subscribe("p1", on_change);
        remote
            .set("profiles", "p1", fields(json!({ "xp": 20 })), true)
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![10, 20]);
    }

    #[tokio::test]
    async fn resubscribe_replaces_previous_subscription() {
        let (channel, remote) = channel();
        let (first, first_seen) = recorder();
        let (second, second_seen) = recorder();

        let old = channel.subscribe("p1", first);
        let _new = channel.subscribe("p1", second);
        assert_eq!(remote.watcher_count("profiles", "p1"), 1);

        remote
            .set("profiles", "p1", fields(json!({ "xp": 5 })), false)
            .await
            .unwrap();
        assert!(first_seen.lock().unwrap().is_empty());
        assert_eq!(*second_seen.lock().unwrap(), vec![5]);

        // Dropping the replaced handle must not remove the live one
        drop(old);
        assert!(channel.is_subscribed("p1"));
        assert_eq!(remote.watcher_count("profiles", "p1"), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let (channel, remote) = channel();
        let (on_change, seen) = recorder();
        let subscription = channel.subscribe("p1", on_change);
        assert_eq!(subscription.doc_id(), "p1");

        subscription.unsubscribe();
        assert!(!channel.is_subscribed("p1"));
        assert_eq!(remote.watcher_count("profiles", "p1"), 0);

        remote
            .set("profiles", "p1", fields(json!({ "xp": 1 })), false)
            .await
            .unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_documents_are_skipped() {
        let (channel, remote) = channel();
        let (on_change, seen) = recorder();
        let _subscription = channel.subscribe("p1", on_change);

        remote
            .set("profiles", "p1", fields(json!({ "xp": "lots" })), false)
            .await
            .unwrap();
        remote
            .set("profiles", "p1", fields(json!({ "xp": 3 })), false)
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn unsubscribe_all_cancels_every_document() {
        let (channel, remote) = channel();
        let (a, _) = recorder();
        let (b, _) = recorder();
        let _first = channel.subscribe("p1", a);
        let _second = channel.subscribe("p2", b);

        channel.unsubscribe_all();
        assert_eq!(remote.watcher_count("profiles", "p1"), 0);
        assert_eq!(remote.watcher_count("profiles", "p2"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unsubscribe_waits_for_running_callback() {
        let (channel, remote) = channel();
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let finished = Arc::new(AtomicBool::new(false));
        let done = Arc::clone(&finished);

        let subscription = channel.subscribe("p1", move |_change| {
            let _ = started_tx.send(());
            std::thread::sleep(Duration::from_millis(100));
            done.store(true, Ordering::SeqCst);
        });

        let writer = tokio::spawn(async move {
            remote
                .set("profiles", "p1", fields(json!({ "xp": 1 })), false)
                .await
                .unwrap();
        });

        started_rx.recv().unwrap();
        subscription.unsubscribe();
        assert!(finished.load(Ordering::SeqCst));
        writer.await.unwrap();
    }
}
