//! Reservation coordinator: reserves and releases stock per order.
//!
//! Every operation reads a snapshot, decides, and writes the stock rows, the
//! reservation and the outbox records in one [`InventoryStore::commit`].
//! There is no in-process locking: the order-id uniqueness constraint and the
//! stock row versions do the exclusion.

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use stockhold_core::{DomainError, OrderId, ReservationId, Sku, UserId};
use stockhold_events::{
    AdjustmentReason, CatalogStockAdjusted, StockReservationFailed, StockReserved,
    StockReservedLine,
};
use stockhold_inventory::{OrderLine, ReservationLine, StockItem, StockReservation};

use crate::outbox::OutboxRecord;
use crate::store::{InventoryStore, StockChanges, StoreError};

pub const NO_LINES_REASON: &str = "No lines in order";

#[derive(Debug, Error)]
pub enum ReservationError {
    /// The request cannot be acted on at all (e.g. nil order id).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ReservationError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Stock held; a reservation now exists for the order.
    Reserved { reservation_id: ReservationId },
    /// A reservation already existed; nothing was written.
    AlreadyReserved,
    /// Business rejection; a `StockReservationFailed` event was recorded.
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Stock returned for the SKUs still in the ledger.
    Released { skus: usize },
    NotFound,
    AlreadyReleased,
}

pub struct ReservationCoordinator<S> {
    store: S,
}

impl<S> ReservationCoordinator<S>
where
    S: InventoryStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reserve every line of an order, or nothing.
    #[instrument(skip(self, lines), fields(order_id = %order_id, user_id = %user_id, lines = lines.len()), err)]
    pub async fn reserve_for_order(
        &self,
        order_id: OrderId,
        user_id: UserId,
        lines: Vec<OrderLine>,
    ) -> Result<ReserveOutcome, ReservationError> {
        if order_id.is_nil() {
            return Err(ReservationError::invalid("missing order id"));
        }

        if self.store.get_by_order_id(order_id).await?.is_some() {
            debug!(order_id = %order_id, "order already reserved");
            return Ok(ReserveOutcome::AlreadyReserved);
        }

        if lines.is_empty() {
            return self.reject(order_id, user_id, NO_LINES_REASON).await;
        }

        // SKUs are compared in their trimmed form, as stored by catalog sync.
        let mut normalized = Vec::with_capacity(lines.len());
        for line in lines {
            let Ok(sku) = Sku::parse(line.sku.as_str()) else {
                return self.reject(order_id, user_id, "line without sku").await;
            };
            if line.quantity <= 0 {
                let reason = format!("Invalid quantity {} for sku {sku}", line.quantity);
                return self.reject(order_id, user_id, reason).await;
            }
            normalized.push(OrderLine::new(sku, line.quantity));
        }
        let lines = normalized;

        // Requested totals per SKU, in first-seen order.
        let mut requested: Vec<(Sku, i64)> = Vec::new();
        for line in &lines {
            match requested.iter_mut().find(|(sku, _)| *sku == line.sku) {
                Some((sku, total)) => match total.checked_add(line.quantity) {
                    Some(sum) => *total = sum,
                    None => {
                        let reason = format!("Invalid quantity {} for sku {sku}", line.quantity);
                        return self.reject(order_id, user_id, reason).await;
                    }
                },
                None => requested.push((line.sku.clone(), line.quantity)),
            }
        }

        let skus: Vec<Sku> = requested.iter().map(|(sku, _)| sku.clone()).collect();
        let mut snapshot = self.store.get_by_skus(&skus).await?;

        for (sku, total) in &requested {
            match snapshot.get(sku) {
                None => {
                    return self
                        .reject(order_id, user_id, format!("SKU {sku} not found"))
                        .await;
                }
                Some(item) if !item.can_reserve(*total) => {
                    return self
                        .reject(order_id, user_id, format!("Not enough stock for sku {sku}"))
                        .await;
                }
                Some(_) => {}
            }
        }

        let now = Utc::now();
        let mut items = Vec::with_capacity(requested.len());
        for (sku, total) in &requested {
            if let Some(mut item) = snapshot.remove(sku) {
                item.reserve(*total, now)?;
                items.push(item);
            }
        }

        let reservation_lines = lines
            .iter()
            .map(|l| ReservationLine::new(l.sku.clone(), l.quantity))
            .collect::<Result<Vec<_>, _>>()?;
        let reservation = StockReservation::open(order_id, user_id, reservation_lines, now)?;
        let reservation_id = reservation.id_typed();

        let reserved = StockReserved::new(
            order_id,
            user_id,
            lines
                .iter()
                .map(|l| StockReservedLine {
                    sku: l.sku.clone(),
                    quantity: l.quantity,
                })
                .collect(),
            now,
        );
        let mut outbox = vec![OutboxRecord::from_event(&reserved)?];
        outbox.extend(adjustments(&items, AdjustmentReason::OrderReserved)?);

        let changes = StockChanges {
            items,
            new_reservation: Some(reservation),
            updated_reservation: None,
            outbox,
        };

        match self.store.commit(changes).await {
            Ok(()) => {
                info!(order_id = %order_id, reservation_id = %reservation_id, "stock reserved");
                Ok(ReserveOutcome::Reserved { reservation_id })
            }
            Err(StoreError::DuplicateOrder(_)) => {
                debug!(order_id = %order_id, "concurrent delivery reserved the order first");
                Ok(ReserveOutcome::AlreadyReserved)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Return the stock held for an order. Missing or released reservations are a no-op.
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn release_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<ReleaseOutcome, ReservationError> {
        if order_id.is_nil() {
            return Err(ReservationError::invalid("missing order id"));
        }

        let Some(mut reservation) = self.store.get_by_order_id(order_id).await? else {
            debug!(order_id = %order_id, "no reservation to release");
            return Ok(ReleaseOutcome::NotFound);
        };
        if !reservation.is_active() {
            debug!(order_id = %order_id, "reservation already released");
            return Ok(ReleaseOutcome::AlreadyReleased);
        }

        let mut skus: Vec<Sku> = Vec::new();
        for line in reservation.lines() {
            if !skus.contains(line.sku()) {
                skus.push(line.sku().clone());
            }
        }
        let mut snapshot = self.store.get_by_skus(&skus).await?;

        let now = Utc::now();
        for line in reservation.lines() {
            match snapshot.get_mut(line.sku()) {
                Some(item) => item.release(line.quantity(), now),
                None => warn!(order_id = %order_id, sku = %line.sku(), "sku missing from ledger; skipped"),
            }
        }
        let items: Vec<StockItem> = skus.iter().filter_map(|s| snapshot.remove(s)).collect();

        reservation.mark_released(now);
        let outbox = adjustments(&items, AdjustmentReason::OrderReleased)?;
        let released = items.len();

        self.store
            .commit(StockChanges {
                items,
                new_reservation: None,
                updated_reservation: Some(reservation),
                outbox,
            })
            .await?;

        info!(order_id = %order_id, skus = released, "reservation released");
        Ok(ReleaseOutcome::Released { skus: released })
    }

    async fn reject(
        &self,
        order_id: OrderId,
        user_id: UserId,
        reason: impl Into<String>,
    ) -> Result<ReserveOutcome, ReservationError> {
        let reason = reason.into();
        let event = StockReservationFailed::new(order_id, user_id, reason.clone(), Utc::now());
        self.store
            .commit(StockChanges {
                outbox: vec![OutboxRecord::from_event(&event)?],
                ..StockChanges::default()
            })
            .await?;

        info!(order_id = %order_id, reason = %reason, "stock reservation rejected");
        Ok(ReserveOutcome::Rejected { reason })
    }
}

/// One `CatalogStockAdjusted` record per item, carrying its new counts.
pub(crate) fn adjustments(
    items: &[StockItem],
    reason: AdjustmentReason,
) -> Result<Vec<OutboxRecord>, StoreError> {
    items
        .iter()
        .map(|item| {
            OutboxRecord::from_event(&CatalogStockAdjusted::new(
                item.sku().clone(),
                item.available(),
                item.reserved(),
                reason,
                item.updated_at(),
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{InMemoryInventoryStore, ReservationStore, StockStore};
    use stockhold_inventory::ReservationStatus;

    fn sku(s: &str) -> Sku {
        Sku::parse(s).unwrap()
    }

    fn line(s: &str, qty: i64) -> OrderLine {
        OrderLine::new(sku(s), qty)
    }

    async fn seeded(stock: &[(&str, i64)]) -> ReservationCoordinator<Arc<InMemoryInventoryStore>> {
        let store = Arc::new(InMemoryInventoryStore::new());
        let items: Vec<_> = stock
            .iter()
            .map(|(s, q)| StockItem::new(sku(s), *q, Utc::now()))
            .collect();
        store.upsert_many(&items).await.unwrap();
        ReservationCoordinator::new(store)
    }

    async fn counts(c: &ReservationCoordinator<Arc<InMemoryInventoryStore>>, s: &str) -> (i64, i64) {
        let items = c.store().get_by_skus(&[sku(s)]).await.unwrap();
        let item = &items[&sku(s)];
        (item.available(), item.reserved())
    }

    fn outbox_types(c: &ReservationCoordinator<Arc<InMemoryInventoryStore>>) -> Vec<String> {
        c.store()
            .all_outbox()
            .unwrap()
            .into_iter()
            .map(|r| r.event_type)
            .collect()
    }

    #[tokio::test]
    async fn reserve_then_release_round_trip() {
        let c = seeded(&[("X", 10)]).await;
        let order_id = OrderId::new();

        let outcome = c
            .reserve_for_order(order_id, UserId::new(), vec![line("X", 4)])
            .await
            .unwrap();
        assert!(matches!(outcome, ReserveOutcome::Reserved { .. }));
        assert_eq!(counts(&c, "X").await, (6, 4));

        let records = c.store().all_outbox().unwrap();
        assert_eq!(records.len(), 2);
        let adjusted = records
            .iter()
            .find(|r| r.event_type == "CatalogStockAdjusted")
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&adjusted.payload).unwrap();
        assert_eq!(body["availableQuantity"], 6);
        assert_eq!(body["reservedQuantity"], 4);
        assert_eq!(body["reason"], "ORDER_RESERVED");

        let released = c.release_for_order(order_id).await.unwrap();
        assert_eq!(released, ReleaseOutcome::Released { skus: 1 });
        assert_eq!(counts(&c, "X").await, (10, 0));

        let reservation = c.store().get_by_order_id(order_id).await.unwrap().unwrap();
        assert_eq!(reservation.status(), ReservationStatus::Released);
        assert!(reservation.released_at().is_some());
        assert_eq!(outbox_types(&c).len(), 3);
    }

    #[tokio::test]
    async fn reserve_is_idempotent() {
        let c = seeded(&[("A", 10)]).await;
        let order_id = OrderId::new();
        let user_id = UserId::new();

        c.reserve_for_order(order_id, user_id, vec![line("A", 3)])
            .await
            .unwrap();
        let again = c
            .reserve_for_order(order_id, user_id, vec![line("A", 3)])
            .await
            .unwrap();

        assert_eq!(again, ReserveOutcome::AlreadyReserved);
        assert_eq!(counts(&c, "A").await, (7, 3));
        assert_eq!(outbox_types(&c).len(), 2);
    }

    #[tokio::test]
    async fn concurrent_deliveries_reserve_once() {
        let c = Arc::new(seeded(&[("A", 10)]).await);
        let order_id = OrderId::new();
        let user_id = UserId::new();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let c = c.clone();
                tokio::spawn(async move {
                    c.reserve_for_order(order_id, user_id, vec![line("A", 2)]).await
                })
            })
            .collect();

        let mut reserved = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(ReserveOutcome::Reserved { .. }) => reserved += 1,
                Ok(ReserveOutcome::AlreadyReserved) => {}
                // A stale stock version is a transient error; redelivery would see the reservation.
                Err(ReservationError::Store(StoreError::Conflict(_))) => {}
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!(reserved, 1);
        assert_eq!(counts(&c, "A").await, (8, 2));
    }

    #[tokio::test]
    async fn all_or_nothing_when_one_line_is_short() {
        let c = seeded(&[("A", 10), ("B", 3)]).await;
        let order_id = OrderId::new();

        let outcome = c
            .reserve_for_order(order_id, UserId::new(), vec![line("A", 5), line("B", 999)])
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReserveOutcome::Rejected {
                reason: "Not enough stock for sku B".to_string()
            }
        );
        assert_eq!(counts(&c, "A").await, (10, 0));
        assert_eq!(counts(&c, "B").await, (3, 0));
        assert!(c.store().get_by_order_id(order_id).await.unwrap().is_none());
        assert_eq!(outbox_types(&c), vec!["StockReservationFailed"]);
    }

    #[tokio::test]
    async fn unknown_sku_is_rejected() {
        let c = seeded(&[("A", 10)]).await;
        let outcome = c
            .reserve_for_order(OrderId::new(), UserId::new(), vec![line("Z", 1)])
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReserveOutcome::Rejected {
                reason: "SKU Z not found".to_string()
            }
        );
    }

    #[tokio::test]
    async fn split_lines_cannot_over_reserve() {
        let c = seeded(&[("A", 5)]).await;
        let outcome = c
            .reserve_for_order(OrderId::new(), UserId::new(), vec![line("A", 3), line("A", 3)])
            .await
            .unwrap();
        assert!(matches!(outcome, ReserveOutcome::Rejected { .. }));
        assert_eq!(counts(&c, "A").await, (5, 0));
    }

    #[tokio::test]
    async fn empty_order_is_rejected_not_an_error() {
        let c = seeded(&[]).await;
        let outcome = c
            .reserve_for_order(OrderId::new(), UserId::new(), vec![])
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReserveOutcome::Rejected {
                reason: "No lines in order".to_string()
            }
        );
        assert_eq!(outbox_types(&c), vec!["StockReservationFailed"]);
    }

    #[tokio::test]
    async fn overflowing_split_lines_are_rejected() {
        let c = seeded(&[("A", 5)]).await;
        let order_id = OrderId::new();

        let outcome = c
            .reserve_for_order(order_id, UserId::new(), vec![line("A", i64::MAX), line("A", 1)])
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReserveOutcome::Rejected {
                reason: "Invalid quantity 1 for sku A".to_string()
            }
        );
        assert_eq!(counts(&c, "A").await, (5, 0));
        assert!(c.store().get_by_order_id(order_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn order_line_skus_are_trimmed_like_catalog_skus() {
        let c = seeded(&[("A", 5)]).await;
        let order_id = OrderId::new();
        let padded = OrderLine::new(serde_json::from_str::<Sku>("\" A \"").unwrap(), 2);

        let outcome = c
            .reserve_for_order(order_id, UserId::new(), vec![padded])
            .await
            .unwrap();

        assert!(matches!(outcome, ReserveOutcome::Reserved { .. }));
        assert_eq!(counts(&c, "A").await, (3, 2));
        let reservation = c.store().get_by_order_id(order_id).await.unwrap().unwrap();
        assert_eq!(reservation.lines()[0].sku().as_str(), "A");
    }

    #[tokio::test]
    async fn blank_line_sku_is_rejected() {
        let c = seeded(&[("A", 5)]).await;
        let outcome = c
            .reserve_for_order(OrderId::new(), UserId::new(), vec![OrderLine::new(Sku::default(), 1)])
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReserveOutcome::Rejected {
                reason: "line without sku".to_string()
            }
        );
    }

    #[tokio::test]
    async fn non_positive_quantity_is_rejected() {
        let c = seeded(&[("A", 5)]).await;
        let outcome = c
            .reserve_for_order(OrderId::new(), UserId::new(), vec![line("A", 0)])
            .await
            .unwrap();
        assert!(matches!(outcome, ReserveOutcome::Rejected { .. }));
        assert_eq!(counts(&c, "A").await, (5, 0));
    }

    #[tokio::test]
    async fn nil_order_id_is_invalid() {
        let c = seeded(&[("A", 5)]).await;
        let err = c
            .reserve_for_order(OrderId::nil(), UserId::new(), vec![line("A", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::InvalidRequest(_)));
        assert!(outbox_types(&c).is_empty());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let c = seeded(&[("A", 5)]).await;
        let order_id = OrderId::new();
        c.reserve_for_order(order_id, UserId::new(), vec![line("A", 2)])
            .await
            .unwrap();

        c.release_for_order(order_id).await.unwrap();
        let again = c.release_for_order(order_id).await.unwrap();

        assert_eq!(again, ReleaseOutcome::AlreadyReleased);
        assert_eq!(counts(&c, "A").await, (5, 0));
        assert_eq!(
            c.release_for_order(OrderId::new()).await.unwrap(),
            ReleaseOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn release_skips_skus_missing_from_ledger() {
        let store = Arc::new(InMemoryInventoryStore::new());
        store
            .upsert_many(&[StockItem::new(sku("A"), 5, Utc::now())])
            .await
            .unwrap();
        let order_id = OrderId::new();
        let lines = vec![
            ReservationLine::new(sku("A"), 1).unwrap(),
            ReservationLine::new(sku("GONE"), 2).unwrap(),
        ];
        store
            .insert(&StockReservation::open(order_id, UserId::new(), lines, Utc::now()).unwrap())
            .await
            .unwrap();

        let c = ReservationCoordinator::new(store);
        let outcome = c.release_for_order(order_id).await.unwrap();

        assert_eq!(outcome, ReleaseOutcome::Released { skus: 1 });
        assert_eq!(counts(&c, "A").await, (6, 0));
    }
}
