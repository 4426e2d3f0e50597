//! Applies catalog product announcements to the stock ledger.

use chrono::Utc;
use tracing::{info, instrument};

use stockhold_core::{AggregateRoot, Sku};
use stockhold_events::AdjustmentReason;
use stockhold_inventory::StockItem;

use crate::coordinator::{ReservationError, adjustments};
use crate::store::{InventoryStore, StockChanges};

/// The catalog owns the announced quantity: a known SKU gets its `available`
/// overwritten while `reserved` is kept.
pub struct CatalogSync<S> {
    store: S,
}

impl<S> CatalogSync<S>
where
    S: InventoryStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(sku = %sku), err)]
    pub async fn apply_product_created(
        &self,
        sku: Sku,
        quantity: i64,
    ) -> Result<StockItem, ReservationError> {
        if sku.is_blank() {
            return Err(ReservationError::invalid("missing sku"));
        }
        if quantity < 0 {
            return Err(ReservationError::invalid(format!(
                "negative stock quantity {quantity} for sku {sku}"
            )));
        }

        let now = Utc::now();
        let existing = self.store.get_by_skus(std::slice::from_ref(&sku)).await?;
        let item = match existing.get(&sku).cloned() {
            Some(mut item) => {
                item.restock(quantity, now);
                item
            }
            None => StockItem::new(sku.clone(), quantity, now),
        };
        let created = item.version() == 0;

        let outbox = adjustments(std::slice::from_ref(&item), AdjustmentReason::InitialLoad)?;
        self.store
            .commit(StockChanges {
                items: vec![item.clone()],
                outbox,
                ..StockChanges::default()
            })
            .await?;

        info!(sku = %sku, available = item.available(), reserved = item.reserved(), created, "stock synced from catalog");
        Ok(item)
    }
}
