//! Queue processor.
//!
//! Drains the mutation queue through the executor while the network is up.
//! Only one pass runs at a time; a trigger that arrives during a pass makes
//! that pass take another look at the queue instead of starting a second one.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::events::{EventBus, SyncEvent};
use super::executor::OperationExecutor;
use super::network::NetworkMonitor;
use super::queue::MutationQueue;
use super::status::SyncStatusMachine;
use super::Clock;
use crate::error::{Error, RemoteError, Result};
use crate::models::{DeadLetter, Operation, OperationId};
use crate::state::SyncStatus;
use crate::storage::DurableStore;

/// Outcome of one `process_queue` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Another pass was already running and will pick up the work
    pub coalesced: bool,
    pub succeeded: usize,
    /// Failed transiently and left queued for the retry pass
    pub retained: usize,
    /// Dead-lettered during this pass
    pub dropped: usize,
    /// Stopped early because the network went down
    pub interrupted: bool,
}

impl PassReport {
    const fn attempted(&self) -> usize {
        self.succeeded + self.retained + self.dropped
    }
}

/// Components the processor drives.
pub struct ProcessorParts {
    pub queue: Arc<tokio::sync::Mutex<MutationQueue>>,
    pub executor: Arc<OperationExecutor>,
    pub network: NetworkMonitor,
    pub status: Arc<SyncStatusMachine>,
    pub events: EventBus,
    pub store: Arc<dyn DurableStore>,
    pub clock: Clock,
}

#[derive(Debug, Default)]
struct RetryTask {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    parts: ProcessorParts,
    max_retries: u32,
    retry_backoff: Duration,
    sync_in_progress: AtomicBool,
    rerun_requested: AtomicBool,
    last_sync_at: Mutex<Option<i64>>,
    retry: Mutex<RetryTask>,
    kick: Notify,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Clears the in-progress flag even if the pass future is dropped.
struct InProgress<'a>(&'a AtomicBool);

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct QueueProcessor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for QueueProcessor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("QueueProcessor")
            .field("max_retries", &self.inner.max_retries)
            .field("retry_backoff", &self.inner.retry_backoff)
            .field(
                "sync_in_progress",
                &self.inner.sync_in_progress.load(Ordering::SeqCst),
            )
            .finish_non_exhaustive()
    }
}

impl QueueProcessor {
    pub fn new(parts: ProcessorParts, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                parts,
                max_retries: max_retries.max(1),
                retry_backoff,
                sync_in_progress: AtomicBool::new(false),
                rerun_requested: AtomicBool::new(false),
                last_sync_at: Mutex::new(None),
                retry: Mutex::new(RetryTask::default()),
                kick: Notify::new(),
            }),
        }
    }

    /// Completion time of the last fully successful pass.
    pub fn last_sync_at(&self) -> Option<i64> {
        *lock(&self.inner.last_sync_at)
    }

    pub fn retry_scheduled(&self) -> bool {
        lock(&self.inner.retry)
            .handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Ask the background driver for a pass without waiting for it.
    pub fn trigger(&self) {
        self.inner.kick.notify_one();
    }

    /// Run a pass now, or fold into the one already running.
    pub async fn process_queue(&self) -> Result<PassReport> {
        let inner = &self.inner;
        inner.rerun_requested.store(true, Ordering::SeqCst);
        if inner.sync_in_progress.swap(true, Ordering::SeqCst) {
            tracing::debug!("Queue pass already running, coalescing trigger");
            return Ok(PassReport {
                coalesced: true,
                ..PassReport::default()
            });
        }

        let mut report = PassReport::default();
        let mut attempted = HashSet::new();
        loop {
            let result = {
                let _guard = InProgress(&inner.sync_in_progress);
                self.drain_requested(&mut attempted, &mut report).await
            };
            if let Err(error) = result {
                self.abandon(&report, &error);
                return Err(error);
            }

            // A trigger may have landed between the last check and the guard
            // release; take it over unless another caller already did.
            if report.interrupted
                || !inner.rerun_requested.load(Ordering::SeqCst)
                || inner.sync_in_progress.swap(true, Ordering::SeqCst)
            {
                break;
            }
        }

        self.conclude(&report);
        Ok(report)
    }

    async fn drain_requested(
        &self,
        attempted: &mut HashSet<OperationId>,
        report: &mut PassReport,
    ) -> Result<()> {
        while self.inner.rerun_requested.swap(false, Ordering::SeqCst) {
            self.run_pass(attempted, report).await?;
            if report.interrupted {
                break;
            }
        }
        Ok(())
    }

    async fn run_pass(
        &self,
        attempted: &mut HashSet<OperationId>,
        report: &mut PassReport,
    ) -> Result<()> {
        let parts = &self.inner.parts;
        let mut began = false;

        loop {
            if !parts.network.is_online() {
                if parts.queue.lock().await.next_pending(attempted).is_some() {
                    report.interrupted = true;
                }
                break;
            }

            let next = parts.queue.lock().await.next_pending(attempted);
            let Some(op) = next else {
                break;
            };
            if !began {
                parts.status.begin_pass();
                began = true;
            }
            attempted.insert(op.id);

            let attempt = op.retries + 1;
            tracing::debug!(
                op_id = %op.id,
                collection = %op.collection,
                doc_id = ?op.doc_id,
                attempt,
                "Executing operation"
            );

            match parts.executor.execute(&op).await {
                Ok(_) => {
                    parts.queue.lock().await.acknowledge(op.id).await?;
                    report.succeeded += 1;
                }
                Err(error) if error.is_transient() => {
                    let retries = parts.queue.lock().await.record_failure(op.id).await?;
                    match retries {
                        Some(retries) if retries >= self.inner.max_retries => {
                            let op = Operation { retries, ..op };
                            self.dead_letter(op, &error).await?;
                            report.dropped += 1;
                        }
                        Some(retries) => {
                            tracing::warn!(
                                op_id = %op.id,
                                attempt = retries,
                                max_retries = self.inner.max_retries,
                                "Operation failed, will retry: {error}"
                            );
                            report.retained += 1;
                        }
                        // Replaced by a newer operation while in flight
                        None => {}
                    }
                }
                Err(error) => {
                    self.dead_letter(op, &error).await?;
                    report.dropped += 1;
                }
            }
        }
        Ok(())
    }

    async fn dead_letter(&self, op: Operation, error: &RemoteError) -> Result<()> {
        let parts = &self.inner.parts;
        let permanent = !error.is_transient();
        tracing::warn!(
            op_id = %op.id,
            collection = %op.collection,
            doc_id = ?op.doc_id,
            retries = op.retries,
            permanent,
            "Dropping operation: {error}"
        );

        parts.queue.lock().await.remove(op.id).await?;

        let mut record = DeadLetter::new(op.clone(), error.to_string(), permanent);
        record.dropped_at = (parts.clock)();
        if let Err(store_error) = parts.store.record_dead_letter(&record).await {
            tracing::error!(op_id = %op.id, "Failed to record dead letter: {store_error}");
        }

        parts.events.emit(SyncEvent::OperationDropped {
            operation: op,
            error: error.to_string(),
        });
        Ok(())
    }

    fn conclude(&self, report: &PassReport) {
        let status = &self.inner.parts.status;
        if report.interrupted {
            tracing::info!(
                succeeded = report.succeeded,
                "Queue pass interrupted by network loss"
            );
            status.network_changed(false);
            return;
        }

        if report.retained > 0 {
            status.pass_retrying();
            self.schedule_retry();
        } else if report.dropped > 0 {
            status.pass_failed();
        } else if report.succeeded > 0 || status.current() == SyncStatus::Retrying {
            *lock(&self.inner.last_sync_at) = Some((self.inner.parts.clock)());
            status.pass_succeeded();
        }

        if report.attempted() > 0 {
            tracing::info!(
                succeeded = report.succeeded,
                retained = report.retained,
                dropped = report.dropped,
                "Queue pass finished"
            );
        }
    }

    /// The queue could not be persisted mid-pass. Whatever was not
    /// acknowledged is still queued, so hand it to the retry pass.
    fn abandon(&self, report: &PassReport, error: &Error) {
        tracing::error!(
            succeeded = report.succeeded,
            retained = report.retained,
            dropped = report.dropped,
            "Queue pass stopped by local persistence failure: {error}"
        );
        self.inner.parts.status.pass_retrying();
        self.schedule_retry();
    }

    fn schedule_retry(&self) {
        let mut retry = lock(&self.inner.retry);
        if retry.handle.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        retry.generation += 1;
        let generation = retry.generation;
        let backoff = self.inner.retry_backoff;
        let processor = self.clone();
        tracing::debug!(backoff_ms = backoff.as_millis(), "Scheduling retry pass");

        retry.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            processor.release_retry(generation);
            if let Err(error) = processor.process_queue().await {
                tracing::error!("Retry pass failed: {error}");
            }
        }));
    }

    /// Detach the running retry task so the pass it starts can schedule the next one.
    fn release_retry(&self, generation: u64) {
        let mut retry = lock(&self.inner.retry);
        if retry.generation == generation {
            retry.handle = None;
        }
    }

    /// Spawn the driver that runs passes on reconnect and on [`Self::trigger`].
    pub fn spawn(&self) -> JoinHandle<()> {
        let processor = self.clone();
        let mut online = self.inner.parts.network.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = online.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let is_online = *online.borrow_and_update();
                        processor.inner.parts.status.network_changed(is_online);
                        if is_online {
                            processor.run_logged().await;
                        }
                    }
                    () = processor.inner.kick.notified() => processor.run_logged().await,
                }
            }
        })
    }

    async fn run_logged(&self) {
        if let Err(error) = self.process_queue().await {
            tracing::error!("Queue pass failed: {error}");
        }
    }

    /// Cancel the pending retry pass.
    pub fn shutdown(&self) {
        let mut retry = lock(&self.inner.retry);
        retry.generation += 1;
        if let Some(handle) = retry.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldMap;
    use crate::remote::{MemoryRemoteStore, RemoteWrite};
    use crate::storage::MemoryDurableStore;
    use crate::sync::echo::EchoSuppressor;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const BACKOFF: Duration = Duration::from_secs(30);

    struct Harness {
        processor: QueueProcessor,
        queue: Arc<tokio::sync::Mutex<MutationQueue>>,
        remote: Arc<MemoryRemoteStore>,
        store: Arc<MemoryDurableStore>,
        network: NetworkMonitor,
        status: Arc<SyncStatusMachine>,
        events: EventBus,
    }

    async fn harness() -> Harness {
        let remote = Arc::new(MemoryRemoteStore::new());
        let store = Arc::new(MemoryDurableStore::new());
        let events = EventBus::new(64);
        let network = NetworkMonitor::new(true);
        let status = Arc::new(SyncStatusMachine::new(events.clone()));
        let clock: Clock = Arc::new(|| 1_000);
        let echo = Arc::new(EchoSuppressor::new(
            "session-a",
            Duration::from_secs(10),
            Duration::from_secs(5),
        ));
        let queue = Arc::new(tokio::sync::Mutex::new(
            MutationQueue::load(store.clone(), events.clone())
                .await
                .unwrap(),
        ));
        let executor = Arc::new(OperationExecutor::new(
            remote.clone(),
            echo,
            clock.clone(),
        ));
        let processor = QueueProcessor::new(
            ProcessorParts {
                queue: queue.clone(),
                executor,
                network: network.clone(),
                status: status.clone(),
                events: events.clone(),
                store: store.clone(),
                clock,
            },
            3,
            BACKOFF,
        );
        Harness {
            processor,
            queue,
            remote,
            store,
            network,
            status,
            events,
        }
    }

    fn update(doc_id: &str, xp: u64) -> Operation {
        let payload: FieldMap = json!({ "xp": xp }).as_object().cloned().unwrap();
        Operation::update("profiles", doc_id, payload)
    }

    impl Harness {
        async fn enqueue(&self, op: Operation) {
            self.queue.lock().await.enqueue(op).await.unwrap();
        }

        async fn pending(&self) -> usize {
            self.queue.lock().await.peek_size()
        }
    }

    #[tokio::test]
    async fn pass_executes_in_order_and_empties_queue() {
        let h = harness().await;
        h.enqueue(update("p1", 1)).await;
        h.enqueue(update("p2", 2)).await;

        let report = h.processor.process_queue().await.unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(h.pending().await, 0);
        assert_eq!(h.status.current(), SyncStatus::Synced);
        assert_eq!(h.processor.last_sync_at(), Some(1_000));

        let order: Vec<_> = h
            .remote
            .writes()
            .into_iter()
            .map(|write| match write {
                RemoteWrite::Set { doc_id, .. } | RemoteWrite::Delete { doc_id, .. } => doc_id,
            })
            .collect();
        assert_eq!(order, vec!["p1".to_string(), "p2".to_string()]);
    }

    #[tokio::test]
    async fn empty_queue_leaves_status_alone() {
        let h = harness().await;
        let report = h.processor.process_queue().await.unwrap();
        assert_eq!(report, PassReport::default());
        assert_eq!(h.status.current(), SyncStatus::Idle);
        assert_eq!(h.processor.last_sync_at(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_retains_and_schedules_retry() {
        let h = harness().await;
        h.remote.fail_next(RemoteError::Transient("timeout".into()));
        h.enqueue(update("p1", 1)).await;
        h.enqueue(update("p2", 2)).await;

        let report = h.processor.process_queue().await.unwrap();
        assert_eq!(report.retained, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(h.status.current(), SyncStatus::Retrying);
        assert!(h.processor.retry_scheduled());
        assert_eq!(h.queue.lock().await.pending()[0].retries, 1);

        tokio::time::sleep(BACKOFF + Duration::from_millis(10)).await;
        assert_eq!(h.pending().await, 0);
        assert_eq!(h.status.current(), SyncStatus::Synced);
        assert!(!h.processor.retry_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_max_and_dead_letter() {
        let h = harness().await;
        let mut events = h.events.subscribe();
        h.remote
            .fail_always(Some(RemoteError::Transient("unreachable".into())));
        let op = update("p1", 1);
        h.enqueue(op.clone()).await;

        h.processor.process_queue().await.unwrap();
        for _ in 0..5 {
            tokio::time::sleep(BACKOFF + Duration::from_millis(10)).await;
        }

        assert_eq!(h.remote.writes().len(), 3);
        assert_eq!(h.pending().await, 0);
        assert_eq!(h.status.current(), SyncStatus::Error);

        let dead = h.store.list_dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].operation.id, op.id);
        assert_eq!(dead[0].operation.retries, 3);
        assert!(!dead[0].permanent);

        let mut dropped = None;
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::OperationDropped { operation, error } = event {
                dropped = Some((operation.id, error));
            }
        }
        assert_eq!(
            dropped,
            Some((op.id, "Transient remote error: unreachable".to_string()))
        );
    }

    #[tokio::test]
    async fn permanent_failure_is_dropped_immediately() {
        let h = harness().await;
        h.remote
            .fail_next(RemoteError::Permanent("missing field".into()));
        h.enqueue(update("p1", 1)).await;
        h.enqueue(update("p2", 2)).await;

        let report = h.processor.process_queue().await.unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(h.remote.writes().len(), 2);
        assert_eq!(h.status.current(), SyncStatus::Error);
        assert!(!h.processor.retry_scheduled());

        let dead = h.store.list_dead_letters(10).await.unwrap();
        assert!(dead[0].permanent);
        assert_eq!(dead[0].operation.retries, 0);
    }

    #[tokio::test]
    async fn offline_pass_does_nothing_and_reports_offline() {
        let h = harness().await;
        h.enqueue(update("p1", 1)).await;
        h.network.set_online(false);

        let report = h.processor.process_queue().await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.attempted(), 0);
        assert_eq!(h.pending().await, 1);
        assert!(h.remote.writes().is_empty());
        assert_eq!(h.status.current(), SyncStatus::Offline);
    }

    #[tokio::test]
    async fn concurrent_trigger_coalesces() {
        let h = harness().await;
        h.enqueue(update("p1", 1)).await;

        // Simulate a pass in flight
        h.processor
            .inner
            .sync_in_progress
            .store(true, Ordering::SeqCst);
        let report = h.processor.process_queue().await.unwrap();
        assert!(report.coalesced);
        assert_eq!(h.pending().await, 1);
        assert!(h.processor.inner.rerun_requested.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn driver_runs_pass_when_network_returns() {
        let h = harness().await;
        h.network.set_online(false);
        let driver = h.processor.spawn();
        h.enqueue(update("p1", 1)).await;

        let mut events = h.events.subscribe();
        h.network.set_online(true);
        loop {
            if let SyncEvent::SyncStatusChanged(SyncStatus::Synced) = events.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(h.pending().await, 0);
        driver.abort();
    }

    #[tokio::test]
    async fn trigger_wakes_driver() {
        let h = harness().await;
        let driver = h.processor.spawn();
        let mut events = h.events.subscribe();
        h.enqueue(update("p1", 1)).await;

        h.processor.trigger();
        loop {
            if let SyncEvent::SyncStatusChanged(SyncStatus::Synced) = events.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(h.remote.writes().len(), 1);
        driver.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_scheduled_retry() {
        let h = harness().await;
        h.remote.fail_next(RemoteError::Transient("timeout".into()));
        h.enqueue(update("p1", 1)).await;

        h.processor.process_queue().await.unwrap();
        assert!(h.processor.retry_scheduled());
        h.processor.shutdown();

        tokio::time::sleep(BACKOFF * 2).await;
        assert_eq!(h.remote.writes().len(), 1);
        assert_eq!(h.pending().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_acknowledge_hands_queue_to_retry_pass() {
        let h = harness().await;
        let op = update("p1", 1);
        h.enqueue(op.clone()).await;

        h.store.set_fail_writes(true);
        let error = h.processor.process_queue().await.unwrap_err();
        assert!(matches!(error, Error::Persistence(_)));
        assert_eq!(h.status.current(), SyncStatus::Retrying);
        assert!(h.processor.retry_scheduled());
        assert_eq!(h.queue.lock().await.pending(), &[op.clone()]);
        assert_eq!(h.store.load_queue().await.unwrap(), vec![op]);
        assert_eq!(h.remote.writes().len(), 1);

        h.store.set_fail_writes(false);
        tokio::time::sleep(BACKOFF + Duration::from_millis(10)).await;
        assert_eq!(h.pending().await, 0);
        assert!(h.store.load_queue().await.unwrap().is_empty());
        assert_eq!(h.status.current(), SyncStatus::Synced);
        // The applied write is acknowledged without being sent again
        assert_eq!(h.remote.writes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_retry_count_persist_keeps_operation_unchanged() {
        let h = harness().await;
        h.remote.fail_next(RemoteError::Transient("timeout".into()));
        h.enqueue(update("p1", 1)).await;

        h.store.set_fail_writes(true);
        assert!(h.processor.process_queue().await.is_err());
        assert_eq!(h.queue.lock().await.pending()[0].retries, 0);
        assert_eq!(h.store.load_queue().await.unwrap()[0].retries, 0);
        assert_eq!(h.status.current(), SyncStatus::Retrying);
        assert!(h.processor.retry_scheduled());

        h.store.set_fail_writes(false);
        tokio::time::sleep(BACKOFF + Duration::from_millis(10)).await;
        assert_eq!(h.pending().await, 0);
        assert_eq!(h.status.current(), SyncStatus::Synced);
    }

    #[tokio::test]
    async fn failed_removal_does_not_report_a_drop() {
        let h = harness().await;
        let mut events = h.events.subscribe();
        h.remote
            .fail_next(RemoteError::Permanent("missing field".into()));
        let op = update("p1", 1);
        h.enqueue(op.clone()).await;

        h.store.set_fail_writes(true);
        assert!(h.processor.process_queue().await.is_err());
        assert_eq!(h.queue.lock().await.pending(), &[op.clone()]);
        assert_eq!(h.store.load_queue().await.unwrap(), vec![op]);
        assert!(h.store.list_dead_letters(10).await.unwrap().is_empty());
        assert_eq!(h.status.current(), SyncStatus::Retrying);

        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, SyncEvent::OperationDropped { .. }));
        }
        h.processor.shutdown();
    }

    #[tokio::test]
    async fn collapsed_operation_sends_only_latest_payload() {
        let h = harness().await;
        let first = update("p1", 1);
        h.enqueue(first.clone()).await;

        let newer = update("p1", 5);
        h.enqueue(newer).await;
        h.processor.process_queue().await.unwrap();

        assert_eq!(h.pending().await, 0);
        assert_eq!(
            h.remote.document("profiles", "p1").unwrap().get("xp"),
            Some(&json!(5))
        );
    }
}
