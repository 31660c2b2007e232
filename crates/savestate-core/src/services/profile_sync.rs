//! Profile sync session.
//!
//! One [`ProfileSyncService`] per signed-in profile wires the queue, processor,
//! watch channel, echo suppressor and merge resolver together. There is no
//! global state: two services over the same remote store behave like two
//! devices.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::models::{FieldMap, Operation, ProfileSnapshot};
use crate::remote::RemoteStore;
use crate::state::SyncStatus;
use crate::storage::DurableStore;
use crate::sync::{
    system_clock, Clock, EchoSuppressor, EchoVerdict, EventBus, MergeResolver, MutationQueue,
    NetworkMonitor, OperationExecutor, PassReport, ProcessorParts, QueueProcessor, RemoteChange,
    RemoteWatchChannel, SyncEvent, SyncStatusMachine, WatchSubscription,
};

/// What [`ProfileSyncService::handle_remote_change`] did with a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApply {
    Ignored(EchoVerdict),
    Merged {
        /// The local snapshot changed
        changed: bool,
        /// A corrective write was queued for the remote document
        pushed_back: bool,
    },
}

#[derive(Debug, Default)]
struct DebouncedSave {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct Background {
    started: bool,
    tasks: Vec<JoinHandle<()>>,
    subscription: Option<WatchSubscription>,
}

struct Inner {
    config: SyncConfig,
    doc_id: String,
    session_id: String,
    clock: Clock,
    store: Arc<dyn DurableStore>,
    network: NetworkMonitor,
    events: EventBus,
    status: Arc<SyncStatusMachine>,
    queue: Arc<tokio::sync::Mutex<MutationQueue>>,
    resolver: MergeResolver,
    echo: Arc<EchoSuppressor>,
    processor: QueueProcessor,
    watch: RemoteWatchChannel,
    save_pending: AtomicBool,
    save: Mutex<DebouncedSave>,
    background: Mutex<Background>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Thread-safe handle to one profile sync session.
#[derive(Clone)]
pub struct ProfileSyncService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ProfileSyncService {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ProfileSyncService")
            .field("doc_id", &self.inner.doc_id)
            .field("session_id", &self.inner.session_id)
            .field("status", &self.inner.status.current())
            .finish_non_exhaustive()
    }
}

impl ProfileSyncService {
    /// Open a session, restoring the queue and snapshot from `store`.
    pub async fn open(
        config: SyncConfig,
        remote: Arc<dyn RemoteStore>,
        store: Arc<dyn DurableStore>,
        network: NetworkMonitor,
    ) -> Result<Self> {
        Self::open_with_clock(config, remote, store, network, system_clock()).await
    }

    /// Open a session that reads time from `clock`.
    pub async fn open_with_clock(
        config: SyncConfig,
        remote: Arc<dyn RemoteStore>,
        store: Arc<dyn DurableStore>,
        network: NetworkMonitor,
        clock: Clock,
    ) -> Result<Self> {
        config.validate()?;
        let doc_id = config.require_profile_doc_id()?;
        let session_id = uuid::Uuid::now_v7().simple().to_string();

        let events = EventBus::new(config.event_capacity);
        let status = Arc::new(SyncStatusMachine::new(events.clone()));
        let queue = MutationQueue::load(Arc::clone(&store), events.clone()).await?;
        let queue = Arc::new(tokio::sync::Mutex::new(queue));

        let snapshot = match store.load_snapshot().await? {
            Some(snapshot) => snapshot,
            None => ProfileSnapshot::new(clock()),
        };
        let echo = Arc::new(EchoSuppressor::new(
            session_id.clone(),
            config.echo_grace_window(),
            config.skew_margin(),
        ));
        let resolver = MergeResolver::new(snapshot, Arc::clone(&echo));
        let executor = Arc::new(OperationExecutor::new(
            Arc::clone(&remote),
            Arc::clone(&echo),
            Arc::clone(&clock),
        ));
        let processor = QueueProcessor::new(
            ProcessorParts {
                queue: Arc::clone(&queue),
                executor,
                network: network.clone(),
                status: Arc::clone(&status),
                events: events.clone(),
                store: Arc::clone(&store),
                clock: Arc::clone(&clock),
            },
            config.max_retries,
            config.retry_backoff(),
        );
        let watch = RemoteWatchChannel::new(remote, config.profile_collection.clone());

        tracing::info!(
            collection = %config.profile_collection,
            doc_id = %doc_id,
            session_id = %session_id,
            "Opened profile sync session"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                doc_id,
                session_id,
                clock,
                store,
                network,
                events,
                status,
                queue,
                resolver,
                echo,
                processor,
                watch,
                save_pending: AtomicBool::new(false),
                save: Mutex::new(DebouncedSave::default()),
                background: Mutex::new(Background::default()),
            }),
        })
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// Start background work: queue driver, remote watch and the first pass.
    ///
    /// Calling it again is a no-op.
    pub fn start(&self) {
        let mut background = lock(&self.inner.background);
        if background.started {
            return;
        }
        background.started = true;

        background.tasks.push(self.inner.processor.spawn());

        let (sender, mut receiver) = mpsc::unbounded_channel::<RemoteChange>();
        let service = self.downgrade();
        background.tasks.push(tokio::spawn(async move {
            while let Some(mut change) = receiver.recv().await {
                // Latest-value watch: only the newest pending change matters
                while let Ok(newer) = receiver.try_recv() {
                    change = newer;
                }
                let Some(service) = Self::upgrade(&service) else {
                    break;
                };
                if let Err(error) = service.handle_remote_change(change).await {
                    tracing::error!("Failed to apply remote profile change: {error}");
                }
            }
        }));

        background.subscription = Some(self.inner.watch.subscribe(
            self.inner.doc_id.clone(),
            move |change| {
                // Receiver only closes on shutdown
                let _ = sender.send(change);
            },
        ));

        let online = self.inner.network.is_online();
        self.inner.status.network_changed(online);
        if online {
            self.inner.processor.trigger();
        }
        tracing::debug!(online, "Profile sync session started");
    }

    /// Apply a local edit.
    ///
    /// The edit is persisted before this returns; the cloud save follows after
    /// the debounce window. On persistence failure nothing changes.
    pub async fn mutate<F>(&self, mutate: F) -> Result<ProfileSnapshot>
    where
        F: FnOnce(&mut ProfileSnapshot) + Send,
    {
        let session_id = self.inner.session_id.clone();
        let snapshot = self
            .inner
            .resolver
            .apply_local(self.inner.store.as_ref(), (self.inner.clock)(), move |profile| {
                mutate(profile);
                profile.last_writer = Some(session_id);
            })
            .await?;

        self.inner.save_pending.store(true, Ordering::SeqCst);
        self.schedule_save();
        Ok(snapshot)
    }

    fn schedule_save(&self) {
        let mut save = lock(&self.inner.save);
        save.generation += 1;
        let generation = save.generation;
        let debounce = self.inner.config.save_debounce();
        let service = self.downgrade();

        // Superseded timers wake up and see a newer generation
        save.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let Some(service) = Self::upgrade(&service) else {
                return;
            };
            let current = lock(&service.inner.save).generation;
            if current != generation {
                return;
            }
            if let Err(error) = service.flush().await {
                tracing::error!("Debounced profile save failed: {error}");
            }
        }));
    }

    /// Queue the pending cloud save now. Returns `false` when nothing was pending.
    pub async fn flush(&self) -> Result<bool> {
        if !self.inner.save_pending.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        if let Err(error) = self.enqueue_snapshot().await {
            self.inner.save_pending.store(true, Ordering::SeqCst);
            return Err(error);
        }
        Ok(true)
    }

    async fn enqueue_snapshot(&self) -> Result<()> {
        let snapshot = self.inner.resolver.current().await;
        let fields = self.outgoing_fields(snapshot)?;
        let op = Operation::update(
            self.inner.config.profile_collection.clone(),
            self.inner.doc_id.clone(),
            fields,
        );
        self.enqueue(op).await
    }

    /// Remote representation of `snapshot`, tagged with this session.
    fn outgoing_fields(&self, mut snapshot: ProfileSnapshot) -> Result<FieldMap> {
        snapshot.last_writer = Some(self.inner.session_id.clone());
        Ok(snapshot.to_fields()?)
    }

    /// Queue an arbitrary remote write and wake the processor.
    pub async fn enqueue(&self, op: Operation) -> Result<()> {
        self.inner.queue.lock().await.enqueue(op).await?;
        self.inner.processor.trigger();
        Ok(())
    }

    /// Filter, reconcile and persist one remote change.
    pub async fn handle_remote_change(&self, change: RemoteChange) -> Result<RemoteApply> {
        let now = (self.inner.clock)();
        let verdict = self.inner.echo.classify(&change, now);
        if verdict != EchoVerdict::External {
            tracing::debug!(doc_id = %change.doc_id, ?verdict, "Ignoring echoed remote change");
            return Ok(RemoteApply::Ignored(verdict));
        }

        let outcome = self
            .inner
            .resolver
            .merge_remote(self.inner.store.as_ref(), &change.snapshot)
            .await?;
        if outcome.changed {
            self.inner
                .events
                .emit(SyncEvent::ProfileMerged(outcome.snapshot.clone()));
        }

        if outcome.needs_push {
            let fields = self.outgoing_fields(outcome.snapshot)?;
            let op = Operation::update(
                self.inner.config.profile_collection.clone(),
                self.inner.doc_id.clone(),
                fields,
            );
            self.enqueue(op).await?;
            // The corrective write carries every local edit made so far
            self.inner.save_pending.store(false, Ordering::SeqCst);
        }

        tracing::debug!(
            doc_id = %change.doc_id,
            changed = outcome.changed,
            pushed_back = outcome.needs_push,
            "Merged remote profile change"
        );
        Ok(RemoteApply::Merged {
            changed: outcome.changed,
            pushed_back: outcome.needs_push,
        })
    }

    /// Run a queue pass now (coalesces with a running one).
    pub async fn process_queue(&self) -> Result<PassReport> {
        self.inner.processor.process_queue().await
    }

    pub async fn snapshot(&self) -> ProfileSnapshot {
        self.inner.resolver.current().await
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.current()
    }

    pub fn last_sync_at(&self) -> Option<i64> {
        self.inner.processor.last_sync_at()
    }

    pub async fn pending_operations(&self) -> Vec<Operation> {
        self.inner.queue.lock().await.pending().to_vec()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Writer tag this session stamps on remote documents.
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn doc_id(&self) -> &str {
        &self.inner.doc_id
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.network
    }

    /// Stop background work and queue any pending save so it survives restart.
    pub async fn shutdown(&self) -> Result<()> {
        let (tasks, subscription) = {
            let mut background = lock(&self.inner.background);
            background.started = false;
            (
                std::mem::take(&mut background.tasks),
                background.subscription.take(),
            )
        };
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        self.inner.watch.unsubscribe_all();
        for task in tasks {
            task.abort();
        }
        self.inner.processor.shutdown();

        {
            let mut save = lock(&self.inner.save);
            save.generation += 1;
            if let Some(handle) = save.handle.take() {
                handle.abort();
            }
        }
        self.flush().await?;

        tracing::info!(doc_id = %self.inner.doc_id, "Profile sync session stopped");
        Ok(())
    }
}
