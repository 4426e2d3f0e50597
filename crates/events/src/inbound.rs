//! Payloads consumed from the orders and catalog services.
//!
//! Fields default when absent so that decoding never fails on a merely
//! incomplete payload; adapters validate the decoded values instead.

use serde::{Deserialize, Serialize};

use stockhold_core::{OrderId, Sku, UserId};

/// Envelope type of an order placement.
pub const ORDER_PLACED: &str = "OrderPlacedEvent";
/// Envelope type of a customer cancellation.
pub const ORDER_CANCELLED: &str = "OrderCancelledEvent";
/// Envelope type of an order rejected downstream (treated as a cancellation).
pub const ORDER_REJECTED: &str = "OrderRejectedEvent";
/// Envelope type of a new catalog product.
pub const PRODUCT_CREATED: &str = "ProductCreated";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlacedLine {
    #[serde(default)]
    pub sku: Sku,
    #[serde(default)]
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlaced {
    #[serde(default = "OrderId::nil")]
    pub order_id: OrderId,
    #[serde(default = "UserId::nil")]
    pub user_id: UserId,
    #[serde(default)]
    pub lines: Vec<OrderPlacedLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelled {
    #[serde(default = "OrderId::nil")]
    pub order_id: OrderId,
    #[serde(default = "UserId::nil")]
    pub user_id: UserId,
}

/// Catalog announcement; only the stock-relevant fields are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCreated {
    #[serde(default)]
    pub sku: Sku,
    #[serde(default)]
    pub stock_quantity: i64,
    #[serde(default)]
    pub name: Option<String>,
}
