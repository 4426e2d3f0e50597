use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use stockhold_core::{MessageId, OrderId, Sku};
use stockhold_inventory::{StockItem, StockReservation};

use crate::outbox::OutboxRecord;

/// Storage operation error.
///
/// Every variant except `DuplicateOrder` is an infrastructure failure: callers
/// propagate it so the triggering message is redelivered or retried.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A reservation already exists for this order (uniqueness on order id).
    #[error("reservation already exists for order {0}")]
    DuplicateOrder(OrderId),

    /// A row changed under us (stale version, concurrent writer).
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

/// Stock ledger storage.
#[async_trait::async_trait]
pub trait StockStore: Send + Sync {
    /// Batch read. Unknown SKUs are simply absent from the result.
    async fn get_by_skus(&self, skus: &[Sku]) -> Result<HashMap<Sku, StockItem>, StoreError>;

    /// Atomically create or update every item, checking each row version.
    async fn upsert_many(&self, items: &[StockItem]) -> Result<(), StoreError>;
}

/// Reservation storage. Order id is unique.
#[async_trait::async_trait]
pub trait ReservationStore: Send + Sync {
    async fn get_by_order_id(&self, order_id: OrderId)
    -> Result<Option<StockReservation>, StoreError>;

    /// Fails with [`StoreError::DuplicateOrder`] if the order already has a reservation.
    async fn insert(&self, reservation: &StockReservation) -> Result<(), StoreError>;

    async fn update(&self, reservation: &StockReservation) -> Result<(), StoreError>;
}

/// Outbox counters by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct OutboxStats {
    pub pending: u64,
    pub processed: u64,
    pub dead_lettered: u64,
}

/// Outbox storage.
///
/// A record is pending while `processed_at` is unset and `retry_count < max_retry`;
/// once `retry_count` reaches `max_retry` it is dead-lettered.
#[async_trait::async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue(&self, record: &OutboxRecord) -> Result<(), StoreError>;

    /// Oldest first (occurred_at, then id).
    async fn get_pending_batch(
        &self,
        max_retry: u32,
        batch_size: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Upsert by id.
    async fn save(&self, record: &OutboxRecord) -> Result<(), StoreError>;

    /// Unprocessed records that exhausted their retry budget, oldest first.
    async fn get_dead_lettered(
        &self,
        max_retry: u32,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError>;

    async fn stats(&self, max_retry: u32) -> Result<OutboxStats, StoreError>;

    /// Number of dead-lettered records; only scans unprocessed rows.
    async fn count_dead_lettered(&self, max_retry: u32) -> Result<u64, StoreError>;

    /// Reset the retry budget of an unprocessed record.
    async fn requeue(&self, id: MessageId) -> Result<(), StoreError>;
}

/// Everything one coordinator operation writes.
#[derive(Debug, Clone, Default)]
pub struct StockChanges {
    pub items: Vec<StockItem>,
    pub new_reservation: Option<StockReservation>,
    pub updated_reservation: Option<StockReservation>,
    pub outbox: Vec<OutboxRecord>,
}

impl StockChanges {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
            && self.new_reservation.is_none()
            && self.updated_reservation.is_none()
            && self.outbox.is_empty()
    }
}

/// All three stores behind one unit of work.
#[async_trait::async_trait]
pub trait InventoryStore: StockStore + ReservationStore + OutboxStore {
    /// Persist `changes` as one unit.
    ///
    /// The reservation insert is applied first so a duplicate order surfaces as
    /// [`StoreError::DuplicateOrder`]. This default runs the port calls in
    /// sequence and is only atomic per call; transactional backends override it.
    async fn commit(&self, changes: StockChanges) -> Result<(), StoreError> {
        if let Some(reservation) = &changes.new_reservation {
            ReservationStore::insert(self, reservation).await?;
        }
        if !changes.items.is_empty() {
            self.upsert_many(&changes.items).await?;
        }
        if let Some(reservation) = &changes.updated_reservation {
            self.update(reservation).await?;
        }
        for record in &changes.outbox {
            self.enqueue(record).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    async fn get_by_skus(&self, skus: &[Sku]) -> Result<HashMap<Sku, StockItem>, StoreError> {
        (**self).get_by_skus(skus).await
    }

    async fn upsert_many(&self, items: &[StockItem]) -> Result<(), StoreError> {
        (**self).upsert_many(items).await
    }
}

#[async_trait::async_trait]
impl<S> ReservationStore for Arc<S>
where
    S: ReservationStore + ?Sized,
{
    async fn get_by_order_id(
        &self,
        order_id: OrderId,
    ) -> Result<Option<StockReservation>, StoreError> {
        (**self).get_by_order_id(order_id).await
    }

    async fn insert(&self, reservation: &StockReservation) -> Result<(), StoreError> {
        (**self).insert(reservation).await
    }

    async fn update(&self, reservation: &StockReservation) -> Result<(), StoreError> {
        (**self).update(reservation).await
    }
}

#[async_trait::async_trait]
impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    async fn enqueue(&self, record: &OutboxRecord) -> Result<(), StoreError> {
        (**self).enqueue(record).await
    }

    async fn get_pending_batch(
        &self,
        max_retry: u32,
        batch_size: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        (**self).get_pending_batch(max_retry, batch_size).await
    }

    async fn save(&self, record: &OutboxRecord) -> Result<(), StoreError> {
        (**self).save(record).await
    }

    async fn get_dead_lettered(
        &self,
        max_retry: u32,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        (**self).get_dead_lettered(max_retry, limit).await
    }

    async fn stats(&self, max_retry: u32) -> Result<OutboxStats, StoreError> {
        (**self).stats(max_retry).await
    }

    async fn count_dead_lettered(&self, max_retry: u32) -> Result<u64, StoreError> {
        (**self).count_dead_lettered(max_retry).await
    }

    async fn requeue(&self, id: MessageId) -> Result<(), StoreError> {
        (**self).requeue(id).await
    }
}

#[async_trait::async_trait]
impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    async fn commit(&self, changes: StockChanges) -> Result<(), StoreError> {
        (**self).commit(changes).await
    }
}
