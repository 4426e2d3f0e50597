use std::collections::HashMap;
use std::sync::RwLock;

use stockhold_core::{AggregateRoot, ExpectedVersion, MessageId, OrderId, Sku};
use stockhold_inventory::{StockItem, StockReservation};

use super::r#trait::{
    InventoryStore, OutboxStats, OutboxStore, ReservationStore, StockChanges, StockStore,
    StoreError,
};
use crate::outbox::OutboxRecord;

#[derive(Debug, Default)]
struct State {
    items: HashMap<Sku, StockItem>,
    reservations: HashMap<OrderId, StockReservation>,
    outbox: HashMap<MessageId, OutboxRecord>,
}

impl State {
    fn check_items(&self, items: &[StockItem]) -> Result<(), StoreError> {
        for item in items {
            let stored = self.items.get(item.sku()).map(|s| s.version());
            if !ExpectedVersion::from_loaded(item.version()).matches(stored) {
                return Err(StoreError::conflict(format!(
                    "stock item {} changed (loaded version {}, stored {stored:?})",
                    item.sku(),
                    item.version()
                )));
            }
        }
        Ok(())
    }

    fn apply_items(&mut self, items: &[StockItem]) {
        for item in items {
            let mut next = item.clone();
            next.set_version(item.version() + 1);
            self.items.insert(item.sku().clone(), next);
        }
    }

    fn check_insert(&self, reservation: &StockReservation) -> Result<(), StoreError> {
        if self.reservations.contains_key(&reservation.order_id()) {
            return Err(StoreError::DuplicateOrder(reservation.order_id()));
        }
        Ok(())
    }

    fn check_update(&self, reservation: &StockReservation) -> Result<(), StoreError> {
        if !self.reservations.contains_key(&reservation.order_id()) {
            return Err(StoreError::NotFound(format!(
                "reservation for order {}",
                reservation.order_id()
            )));
        }
        Ok(())
    }

    fn check_enqueue(&self, record: &OutboxRecord) -> Result<(), StoreError> {
        if self.outbox.contains_key(&record.id) {
            return Err(StoreError::conflict(format!(
                "outbox record {} already exists",
                record.id
            )));
        }
        Ok(())
    }

    fn sorted_outbox<F>(&self, keep: F, limit: usize) -> Vec<OutboxRecord>
    where
        F: Fn(&OutboxRecord) -> bool,
    {
        let mut records: Vec<_> = self.outbox.values().filter(|r| keep(r)).cloned().collect();
        records.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then(a.id.cmp(&b.id)));
        records.truncate(limit);
        records
    }
}

/// In-memory inventory store.
///
/// Intended for tests/dev. Every operation (including `commit`) runs under one
/// lock, so a commit is validated fully before anything is written.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    state: RwLock<State>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored item (tests/diagnostics).
    pub fn all_items(&self) -> Result<Vec<StockItem>, StoreError> {
        let state = self.read()?;
        let mut items: Vec<_> = state.items.values().cloned().collect();
        items.sort_by(|a, b| a.sku().cmp(b.sku()));
        Ok(items)
    }

    /// Snapshot of every outbox record, oldest first (tests/diagnostics).
    pub fn all_outbox(&self) -> Result<Vec<OutboxRecord>, StoreError> {
        Ok(self.read()?.sorted_outbox(|_| true, usize::MAX))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::backend("lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::backend("lock poisoned"))
    }
}

#[async_trait::async_trait]
impl StockStore for InMemoryInventoryStore {
    async fn get_by_skus(&self, skus: &[Sku]) -> Result<HashMap<Sku, StockItem>, StoreError> {
        let state = self.read()?;
        Ok(skus
            .iter()
            .filter_map(|sku| state.items.get(sku).map(|i| (sku.clone(), i.clone())))
            .collect())
    }

    async fn upsert_many(&self, items: &[StockItem]) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.check_items(items)?;
        state.apply_items(items);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ReservationStore for InMemoryInventoryStore {
    async fn get_by_order_id(
        &self,
        order_id: OrderId,
    ) -> Result<Option<StockReservation>, StoreError> {
        Ok(self.read()?.reservations.get(&order_id).cloned())
    }

    async fn insert(&self, reservation: &StockReservation) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.check_insert(reservation)?;
        state
            .reservations
            .insert(reservation.order_id(), reservation.clone());
        Ok(())
    }

    async fn update(&self, reservation: &StockReservation) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.check_update(reservation)?;
        state
            .reservations
            .insert(reservation.order_id(), reservation.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl OutboxStore for InMemoryInventoryStore {
    async fn enqueue(&self, record: &OutboxRecord) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.check_enqueue(record)?;
        state.outbox.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_pending_batch(
        &self,
        max_retry: u32,
        batch_size: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        Ok(self
            .read()?
            .sorted_outbox(|r| r.is_pending(max_retry), batch_size))
    }

    async fn save(&self, record: &OutboxRecord) -> Result<(), StoreError> {
        self.write()?.outbox.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_dead_lettered(
        &self,
        max_retry: u32,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        Ok(self
            .read()?
            .sorted_outbox(|r| r.is_dead_lettered(max_retry), limit))
    }

    async fn stats(&self, max_retry: u32) -> Result<OutboxStats, StoreError> {
        let state = self.read()?;
        let mut stats = OutboxStats::default();
        for record in state.outbox.values() {
            if record.is_processed() {
                stats.processed += 1;
            } else if record.is_pending(max_retry) {
                stats.pending += 1;
            } else {
                stats.dead_lettered += 1;
            }
        }
        Ok(stats)
    }

    async fn count_dead_lettered(&self, max_retry: u32) -> Result<u64, StoreError> {
        let state = self.read()?;
        Ok(state
            .outbox
            .values()
            .filter(|r| r.is_dead_lettered(max_retry))
            .count() as u64)
    }

    async fn requeue(&self, id: MessageId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let record = state
            .outbox
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("outbox record {id}")))?;
        if record.is_processed() {
            return Err(StoreError::conflict(format!(
                "outbox record {id} was already processed"
            )));
        }
        record.retry_count = 0;
        Ok(())
    }
}

#[async_trait::async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn commit(&self, changes: StockChanges) -> Result<(), StoreError> {
        let mut state = self.write()?;

        // Validate everything before the first write.
        if let Some(reservation) = &changes.new_reservation {
            state.check_insert(reservation)?;
        }
        state.check_items(&changes.items)?;
        if let Some(reservation) = &changes.updated_reservation {
            state.check_update(reservation)?;
        }
        for record in &changes.outbox {
            state.check_enqueue(record)?;
        }

        if let Some(reservation) = changes.new_reservation {
            state.reservations.insert(reservation.order_id(), reservation);
        }
        state.apply_items(&changes.items);
        if let Some(reservation) = changes.updated_reservation {
            state.reservations.insert(reservation.order_id(), reservation);
        }
        for record in changes.outbox {
            state.outbox.insert(record.id, record);
        }

        Ok(())
    }
}
