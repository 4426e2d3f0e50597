use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockhold_core::{AggregateRoot, DomainError, DomainResult, Sku};

/// Stock ledger entry for one SKU.
///
/// `available` and `reserved` never go negative. `version` is the persisted
/// row version (0 until first stored) and is maintained by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    sku: Sku,
    available: i64,
    reserved: i64,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl StockItem {
    /// First sighting of a SKU. Negative quantities are clamped to zero.
    pub fn new(sku: Sku, available: i64, now: DateTime<Utc>) -> Self {
        Self {
            sku,
            available: available.max(0),
            reserved: 0,
            updated_at: now,
            version: 0,
        }
    }

    /// Rebuild from persisted state.
    pub fn restore(
        sku: Sku,
        available: i64,
        reserved: i64,
        updated_at: DateTime<Utc>,
        version: u64,
    ) -> DomainResult<Self> {
        if available < 0 || reserved < 0 {
            return Err(DomainError::invariant(format!(
                "stock counts for {sku} cannot be negative"
            )));
        }
        Ok(Self {
            sku,
            available,
            reserved,
            updated_at,
            version,
        })
    }

    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn available(&self) -> i64 {
        self.available
    }

    pub fn reserved(&self) -> i64 {
        self.reserved
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn can_reserve(&self, quantity: i64) -> bool {
        quantity > 0 && self.available >= quantity
    }

    /// Move `quantity` from available to reserved.
    pub fn reserve(&mut self, quantity: i64, now: DateTime<Utc>) -> DomainResult<()> {
        if quantity <= 0 {
            return Err(DomainError::validation(format!(
                "quantity for {} must be positive",
                self.sku
            )));
        }
        if self.available < quantity {
            return Err(DomainError::insufficient_stock(
                self.sku.as_str(),
                quantity,
                self.available,
            ));
        }
        self.available -= quantity;
        self.reserved += quantity;
        self.updated_at = now;
        Ok(())
    }

    /// Return `quantity` to available. Reserved is floored at zero.
    pub fn release(&mut self, quantity: i64, now: DateTime<Utc>) {
        if quantity <= 0 {
            return;
        }
        self.available += quantity;
        self.reserved = (self.reserved - quantity).max(0);
        self.updated_at = now;
    }

    /// Overwrite available with an announced catalog quantity; reserved is kept.
    pub fn restock(&mut self, available: i64, now: DateTime<Utc>) {
        self.available = available.max(0);
        self.updated_at = now;
    }

    /// Called by stores after a successful write.
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl AggregateRoot for StockItem {
    type Id = Sku;

    fn id(&self) -> &Self::Id {
        &self.sku
    }

    fn version(&self) -> u64 {
        self.version
    }
}
