//! Events published by the inventory service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockhold_core::{OrderId, Sku, UserId};

use crate::event::IntegrationEvent;

/// Why a SKU's counts changed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentReason {
    OrderReserved,
    OrderReleased,
    InitialLoad,
}

impl AdjustmentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentReason::OrderReserved => "ORDER_RESERVED",
            AdjustmentReason::OrderReleased => "ORDER_RELEASED",
            AdjustmentReason::InitialLoad => "INITIAL_LOAD",
        }
    }
}

impl core::fmt::Display for AdjustmentReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockReservedLine {
    pub sku: Sku,
    pub quantity: i64,
}

/// Event: StockReserved (order-level, all lines).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockReserved {
    pub event_id: Uuid,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub reserved_at_utc: DateTime<Utc>,
    pub lines: Vec<StockReservedLine>,
}

impl StockReserved {
    pub fn new(
        order_id: OrderId,
        user_id: UserId,
        lines: Vec<StockReservedLine>,
        reserved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            order_id,
            user_id,
            reserved_at_utc: reserved_at,
            lines,
        }
    }
}

/// Event: StockReservationFailed (business rejection, not an error).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockReservationFailed {
    pub event_id: Uuid,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub reason: String,
    pub failed_at_utc: DateTime<Utc>,
}

impl StockReservationFailed {
    pub fn new(
        order_id: OrderId,
        user_id: UserId,
        reason: impl Into<String>,
        failed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            order_id,
            user_id,
            reason: reason.into(),
            failed_at_utc: failed_at,
        }
    }
}

/// Event: CatalogStockAdjusted (one per affected SKU).
///
/// Carries absolute counts so projections can overwrite rather than apply deltas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStockAdjusted {
    pub event_id: Uuid,
    pub sku: Sku,
    pub available_quantity: i64,
    pub reserved_quantity: i64,
    pub reason: AdjustmentReason,
    pub occurred_at_utc: DateTime<Utc>,
}

impl CatalogStockAdjusted {
    pub fn new(
        sku: Sku,
        available: i64,
        reserved: i64,
        reason: AdjustmentReason,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            sku,
            available_quantity: available,
            reserved_quantity: reserved,
            reason,
            occurred_at_utc: occurred_at,
        }
    }
}

impl IntegrationEvent for StockReserved {
    fn event_type(&self) -> &'static str {
        "StockReserved"
    }

    fn event_id(&self) -> Uuid {
        self.event_id
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.reserved_at_utc
    }
}

impl IntegrationEvent for StockReservationFailed {
    fn event_type(&self) -> &'static str {
        "StockReservationFailed"
    }

    fn event_id(&self) -> Uuid {
        self.event_id
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.failed_at_utc
    }
}

impl IntegrationEvent for CatalogStockAdjusted {
    fn event_type(&self) -> &'static str {
        "CatalogStockAdjusted"
    }

    fn event_id(&self) -> Uuid {
        self.event_id
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at_utc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_serialize_as_screaming_snake() {
        let json = serde_json::to_string(&AdjustmentReason::OrderReleased).unwrap();
        assert_eq!(json, "\"ORDER_RELEASED\"");
        assert_eq!(AdjustmentReason::InitialLoad.to_string(), "INITIAL_LOAD");
    }

    #[test]
    fn catalog_adjustment_uses_camel_case_fields() {
        let ev = CatalogStockAdjusted::new(
            Sku::parse("X").unwrap(),
            6,
            4,
            AdjustmentReason::OrderReserved,
            Utc::now(),
        );
        let value = serde_json::to_value(&ev).unwrap();
        assert_eq!(value["sku"], "X");
        assert_eq!(value["availableQuantity"], 6);
        assert_eq!(value["reservedQuantity"], 4);
        assert_eq!(value["reason"], "ORDER_RESERVED");
        assert_eq!(ev.event_type(), "CatalogStockAdjusted");
    }
}
