use chrono::Utc;
use tracing::{debug, instrument, warn};

use stockhold_core::MessageId;

use super::{OutboxError, OutboxRecord};
use crate::config::OutboxSettings;
use crate::store::{OutboxStats, OutboxStore};
use crate::transport::Transport;

/// Outcome of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatchReport {
    /// Records read from the pending set.
    pub fetched: usize,
    /// Records the transport accepted.
    pub published: usize,
    /// Publish attempts that failed (retry budget consumed).
    pub failed: usize,
    /// Records whose payload was not valid JSON (retry budget consumed).
    pub malformed: usize,
    /// Outcome writes that failed; those records stay as they were.
    pub save_errors: usize,
}

/// Relays pending outbox records to the transport.
///
/// Each record is handled independently: a failure consumes that record's
/// retry budget and never blocks the rest of the batch.
pub struct OutboxDispatcher<S, T> {
    store: S,
    transport: T,
    settings: OutboxSettings,
}

impl<S, T> OutboxDispatcher<S, T>
where
    S: OutboxStore,
    T: Transport,
{
    pub fn new(store: S, transport: T, settings: OutboxSettings) -> Self {
        Self {
            store,
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &OutboxSettings {
        &self.settings
    }

    /// One pass over at most `batch_size` pending records, oldest first.
    ///
    /// Only a failure to read the batch is an error.
    #[instrument(
        skip(self),
        fields(
            batch_size = self.settings.batch_size,
            max_retry = self.settings.max_retry
        ),
        err
    )]
    pub async fn dispatch_once(&self) -> Result<DispatchReport, OutboxError> {
        let batch = self
            .store
            .get_pending_batch(self.settings.max_retry, self.settings.batch_size)
            .await?;

        let mut report = DispatchReport {
            fetched: batch.len(),
            ..DispatchReport::default()
        };

        for mut record in batch {
            if let Err(e) = serde_json::from_str::<serde_json::Value>(&record.payload) {
                record.record_failure();
                warn!(
                    message_id = %record.id,
                    event_type = %record.event_type,
                    retry_count = record.retry_count,
                    error = %e,
                    "outbox payload is not valid JSON"
                );
                report.malformed += 1;
                self.persist(&record, &mut report).await;
                continue;
            }

            match self.transport.publish(record.to_envelope()).await {
                Ok(()) => {
                    record.mark_processed(Utc::now());
                    report.published += 1;
                    debug!(message_id = %record.id, event_type = %record.event_type, "outbox record published");
                }
                Err(e) => {
                    record.record_failure();
                    report.failed += 1;
                    warn!(
                        message_id = %record.id,
                        event_type = %record.event_type,
                        retry_count = record.retry_count,
                        error = %e,
                        "outbox publish failed"
                    );
                }
            }
            self.persist(&record, &mut report).await;
        }

        Ok(report)
    }

    /// Records that exhausted their retry budget, oldest first.
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxRecord>, OutboxError> {
        Ok(self
            .store
            .get_dead_lettered(self.settings.max_retry, limit)
            .await?)
    }

    pub async fn stats(&self) -> Result<OutboxStats, OutboxError> {
        Ok(self.store.stats(self.settings.max_retry).await?)
    }

    /// Cheaper than [`Self::stats`]: only unprocessed rows are counted.
    pub async fn dead_letter_count(&self) -> Result<u64, OutboxError> {
        Ok(self.store.count_dead_lettered(self.settings.max_retry).await?)
    }

    /// Give a dead-lettered record a fresh retry budget.
    #[instrument(skip(self), fields(message_id = %id), err)]
    pub async fn requeue(&self, id: MessageId) -> Result<(), OutboxError> {
        self.store.requeue(id).await?;
        Ok(())
    }

    async fn persist(&self, record: &OutboxRecord, report: &mut DispatchReport) {
        if let Err(e) = self.store.save(record).await {
            // Left as it was: a published record will be published again.
            report.save_errors += 1;
            warn!(message_id = %record.id, error = %e, "failed to save outbox record outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::Utc;
    use stockhold_events::IntegrationEnvelope;

    use super::*;
    use crate::store::InMemoryInventoryStore;
    use crate::transport::{InMemoryTransport, TransportError};

    /// Fails the first `failures` publishes, then delegates.
    struct FlakyTransport {
        failures: AtomicUsize,
        inner: InMemoryTransport,
    }

    impl FlakyTransport {
        fn new(failures: usize) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                inner: InMemoryTransport::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl Transport for FlakyTransport {
        async fn publish(&self, envelope: IntegrationEnvelope) -> Result<(), TransportError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(TransportError::Unavailable("broker down".into()));
            }
            self.inner.publish(envelope).await
        }
    }

    fn settings(max_retry: u32) -> OutboxSettings {
        OutboxSettings {
            batch_size: 100,
            max_retry,
            interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn publishes_pending_and_marks_processed() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let transport = InMemoryTransport::new();
        let sub = transport.subscribe();
        let record = OutboxRecord::new("StockReserved", r#"{"orderId":"x"}"#, Utc::now());
        store.enqueue(&record).await.unwrap();

        let dispatcher = OutboxDispatcher::new(store.clone(), transport, settings(5));
        let report = dispatcher.dispatch_once().await.unwrap();

        assert_eq!(report.published, 1);
        let env = sub.try_recv().unwrap();
        assert_eq!(env.message_id(), record.id);
        assert_eq!(env.routing_key(), "StockReserved");

        let stored = store.all_outbox().unwrap();
        assert!(stored[0].processed_at.is_some());
        assert_eq!(dispatcher.dispatch_once().await.unwrap().fetched, 0);
    }

    #[tokio::test]
    async fn transient_failures_then_success_keep_retry_count() {
        let store = Arc::new(InMemoryInventoryStore::new());
        store
            .enqueue(&OutboxRecord::new("StockReserved", "{}", Utc::now()))
            .await
            .unwrap();
        let dispatcher =
            OutboxDispatcher::new(store.clone(), FlakyTransport::new(2), settings(5));

        assert_eq!(dispatcher.dispatch_once().await.unwrap().failed, 1);
        assert_eq!(dispatcher.dispatch_once().await.unwrap().failed, 1);
        assert_eq!(dispatcher.dispatch_once().await.unwrap().published, 1);

        let stored = &store.all_outbox().unwrap()[0];
        assert_eq!(stored.retry_count, 2);
        assert!(stored.processed_at.is_some());
    }

    #[tokio::test]
    async fn exhausted_records_are_dead_lettered() {
        let store = Arc::new(InMemoryInventoryStore::new());
        store
            .enqueue(&OutboxRecord::new("StockReserved", "{}", Utc::now()))
            .await
            .unwrap();
        let dispatcher =
            OutboxDispatcher::new(store.clone(), FlakyTransport::new(usize::MAX), settings(3));

        for _ in 0..3 {
            dispatcher.dispatch_once().await.unwrap();
        }
        assert_eq!(dispatcher.dispatch_once().await.unwrap().fetched, 0);

        let dead = dispatcher.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].retry_count, 3);
        assert_eq!(dispatcher.stats().await.unwrap().dead_lettered, 1);
        assert_eq!(dispatcher.dead_letter_count().await.unwrap(), 1);

        dispatcher.requeue(dead[0].id).await.unwrap();
        assert_eq!(dispatcher.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn malformed_payload_consumes_budget_without_blocking_others() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let base = Utc::now();
        let bad = OutboxRecord::new("StockReserved", "{not json", base);
        let good = OutboxRecord::new("CatalogStockAdjusted", "{}", base + chrono::Duration::seconds(1));
        store.enqueue(&bad).await.unwrap();
        store.enqueue(&good).await.unwrap();

        let transport = InMemoryTransport::new();
        let sub = transport.subscribe();
        let dispatcher = OutboxDispatcher::new(store.clone(), transport, settings(5));
        let report = dispatcher.dispatch_once().await.unwrap();

        assert_eq!(report.malformed, 1);
        assert_eq!(report.published, 1);
        assert_eq!(sub.drain().len(), 1);

        let stored = store.all_outbox().unwrap();
        assert_eq!(stored[0].id, bad.id);
        assert_eq!(stored[0].retry_count, 1);
        assert!(stored[0].processed_at.is_none());
    }

    #[tokio::test]
    async fn batch_is_published_oldest_first() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let base = Utc::now();
        for (ty, offset) in [("C", 2), ("A", 0), ("B", 1)] {
            let rec = OutboxRecord::new(ty, "{}", base + chrono::Duration::seconds(offset));
            store.enqueue(&rec).await.unwrap();
        }

        let transport = InMemoryTransport::new();
        let sub = transport.subscribe();
        OutboxDispatcher::new(store, transport, settings(5))
            .dispatch_once()
            .await
            .unwrap();

        let order: Vec<_> = sub.drain().iter().map(|e| e.event_type().to_string()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
    }
}
