//! Background loop driving the outbox dispatcher.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::OutboxDispatcher;
use crate::store::OutboxStore;
use crate::transport::Transport;

/// Scheduler runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub published: u64,
    pub failed: u64,
    pub malformed: u64,
    pub errors: u64,
    pub dead_lettered: u64,
    pub uptime_secs: u64,
}

/// Handle to control a running scheduler.
#[derive(Debug)]
pub struct OutboxSchedulerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<SchedulerStats>>,
}

impl OutboxSchedulerHandle {
    /// Stop ticking and wait for the loop to exit. An in-flight batch is
    /// finished first.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "outbox scheduler task failed");
            }
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Runs `dispatch_once` on a fixed interval.
///
/// Dispatch and tick share one sequential loop: a slow batch delays the next
/// tick and never overlaps with another batch.
pub struct OutboxScheduler<S, T> {
    dispatcher: OutboxDispatcher<S, T>,
    interval: Duration,
    name: String,
}

impl<S, T> OutboxScheduler<S, T>
where
    S: OutboxStore + 'static,
    T: Transport + 'static,
{
    pub fn new(dispatcher: OutboxDispatcher<S, T>) -> Self {
        let interval = dispatcher.settings().interval;
        Self {
            dispatcher,
            interval,
            name: "outbox-scheduler".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Spawn the loop on the current tokio runtime.
    pub fn spawn(self) -> OutboxSchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(SchedulerStats::default()));
        let join = tokio::spawn(self.run(shutdown_rx, stats.clone()));

        OutboxSchedulerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>, stats: Arc<Mutex<SchedulerStats>>) {
        info!(scheduler = %self.name, interval_ms = self.interval.as_millis() as u64, "outbox scheduler started");
        let started = Instant::now();

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_dead_lettered = 0u64;

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let outcome = self.dispatcher.dispatch_once().await;
                    let dead_lettered = match self.dispatcher.dead_letter_count().await {
                        Ok(dead) => Some(dead),
                        Err(e) => {
                            warn!(scheduler = %self.name, error = %e, "failed to count dead-lettered outbox records");
                            None
                        }
                    };

                    let mut s = stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    s.ticks += 1;
                    s.uptime_secs = started.elapsed().as_secs();
                    match outcome {
                        Ok(report) => {
                            s.published += report.published as u64;
                            s.failed += report.failed as u64;
                            s.malformed += report.malformed as u64;
                            if report.fetched > 0 {
                                info!(
                                    scheduler = %self.name,
                                    fetched = report.fetched,
                                    published = report.published,
                                    failed = report.failed,
                                    malformed = report.malformed,
                                    "outbox dispatch completed"
                                );
                            } else {
                                debug!(scheduler = %self.name, "outbox empty");
                            }
                        }
                        Err(e) => {
                            s.errors += 1;
                            error!(scheduler = %self.name, error = %e, "outbox dispatch failed");
                        }
                    }

                    if let Some(dead) = dead_lettered {
                        s.dead_lettered = dead;
                        if dead > last_dead_lettered {
                            warn!(
                                scheduler = %self.name,
                                dead_lettered = dead,
                                "outbox records exhausted their retry budget"
                            );
                        }
                        last_dead_lettered = dead;
                    }
                }
            }
        }

        info!(scheduler = %self.name, "outbox scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;

    use stockhold_core::MessageId;

    use super::*;
    use crate::config::OutboxSettings;
    use crate::outbox::OutboxRecord;
    use crate::store::{InMemoryInventoryStore, OutboxStats, StoreError};
    use crate::transport::InMemoryTransport;

    /// Delegates to the in-memory store and counts full stats scans.
    struct ScanCountingStore {
        inner: InMemoryInventoryStore,
        stats_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl OutboxStore for ScanCountingStore {
        async fn enqueue(&self, record: &OutboxRecord) -> Result<(), StoreError> {
            self.inner.enqueue(record).await
        }

        async fn get_pending_batch(
            &self,
            max_retry: u32,
            batch_size: usize,
        ) -> Result<Vec<OutboxRecord>, StoreError> {
            self.inner.get_pending_batch(max_retry, batch_size).await
        }

        async fn save(&self, record: &OutboxRecord) -> Result<(), StoreError> {
            self.inner.save(record).await
        }

        async fn get_dead_lettered(
            &self,
            max_retry: u32,
            limit: usize,
        ) -> Result<Vec<OutboxRecord>, StoreError> {
            self.inner.get_dead_lettered(max_retry, limit).await
        }

        async fn stats(&self, max_retry: u32) -> Result<OutboxStats, StoreError> {
            self.stats_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.stats(max_retry).await
        }

        async fn count_dead_lettered(&self, max_retry: u32) -> Result<u64, StoreError> {
            self.inner.count_dead_lettered(max_retry).await
        }

        async fn requeue(&self, id: MessageId) -> Result<(), StoreError> {
            self.inner.requeue(id).await
        }
    }

    fn settings() -> OutboxSettings {
        OutboxSettings {
            batch_size: 10,
            max_retry: 5,
            interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn ticks_relay_records_until_shutdown() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let transport = InMemoryTransport::new();
        let sub = transport.subscribe();
        store
            .enqueue(&OutboxRecord::new("StockReserved", "{}", Utc::now()))
            .await
            .unwrap();

        let handle =
            OutboxScheduler::new(OutboxDispatcher::new(store.clone(), transport, settings())).spawn();

        let mut received = Vec::new();
        for _ in 0..100 {
            received.extend(sub.drain());
            if !received.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(received.len(), 1);

        let stats = handle.stats();
        assert!(stats.ticks >= 1);
        handle.shutdown().await;

        store
            .enqueue(&OutboxRecord::new("StockReserved", "{}", Utc::now()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sub.drain().is_empty());
    }

    #[tokio::test]
    async fn ticks_track_dead_letters_without_full_stats_scans() {
        let store = Arc::new(ScanCountingStore {
            inner: InMemoryInventoryStore::new(),
            stats_calls: AtomicUsize::new(0),
        });
        let mut dead = OutboxRecord::new("StockReserved", "{}", Utc::now());
        dead.retry_count = 5;
        store.save(&dead).await.unwrap();

        let handle = OutboxScheduler::new(OutboxDispatcher::new(
            store.clone(),
            InMemoryTransport::new(),
            settings(),
        ))
        .spawn();

        for _ in 0..100 {
            if handle.stats().ticks >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stats = handle.stats();
        handle.shutdown().await;

        assert!(stats.ticks >= 2);
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(store.stats_calls.load(Ordering::SeqCst), 0);
    }
}
