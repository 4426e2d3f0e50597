use std::sync::Arc;

use tracing::{info, warn};

use stockhold_core::Sku;
use stockhold_events::inbound::{ORDER_CANCELLED, ORDER_PLACED, ORDER_REJECTED, PRODUCT_CREATED};
use stockhold_events::{IntegrationEnvelope, OrderCancelled, OrderPlaced, ProductCreated};
use stockhold_inventory::OrderLine;

use super::{InboundError, InboundHandler};
use crate::catalog_sync::CatalogSync;
use crate::coordinator::{ReservationCoordinator, ReservationError};
use crate::store::InventoryStore;

/// Map a coordinator failure: invalid requests are dropped, the rest retried.
fn settle(envelope: &IntegrationEnvelope, result: Result<(), ReservationError>) -> Result<(), InboundError> {
    match result {
        Ok(()) => Ok(()),
        Err(ReservationError::InvalidRequest(reason)) => {
            warn!(
                message_id = %envelope.message_id(),
                event_type = %envelope.event_type(),
                reason = %reason,
                "dropping invalid inbound event"
            );
            Ok(())
        }
        Err(source) => Err(InboundError::Transient {
            event_type: envelope.event_type().to_string(),
            source,
        }),
    }
}

fn decode<T: serde::de::DeserializeOwned>(envelope: &IntegrationEnvelope) -> Option<T> {
    match envelope.decode::<T>() {
        Ok(body) => Some(body),
        Err(e) => {
            warn!(
                message_id = %envelope.message_id(),
                event_type = %envelope.event_type(),
                error = %e,
                "failed to decode inbound payload"
            );
            None
        }
    }
}

/// `OrderPlacedEvent` → reserve stock.
pub struct OrderPlacedHandler<S> {
    coordinator: Arc<ReservationCoordinator<S>>,
}

impl<S> OrderPlacedHandler<S> {
    pub fn new(coordinator: Arc<ReservationCoordinator<S>>) -> Self {
        Self { coordinator }
    }
}

#[async_trait::async_trait]
impl<S> InboundHandler for OrderPlacedHandler<S>
where
    S: InventoryStore + 'static,
{
    fn name(&self) -> &'static str {
        "order-placed"
    }

    fn handles(&self, event_type: &str) -> bool {
        event_type == ORDER_PLACED
    }

    async fn handle(&self, envelope: &IntegrationEnvelope) -> Result<(), InboundError> {
        let Some(body) = decode::<OrderPlaced>(envelope) else {
            return Ok(());
        };
        info!(order_id = %body.order_id, user_id = %body.user_id, lines = body.lines.len(), "order placed received");

        let lines = body
            .lines
            .into_iter()
            .map(|l| OrderLine::new(l.sku, l.quantity))
            .collect();
        let result = self
            .coordinator
            .reserve_for_order(body.order_id, body.user_id, lines)
            .await
            .map(|_| ());
        settle(envelope, result)
    }
}

/// `OrderCancelledEvent` / `OrderRejectedEvent` → release stock.
pub struct OrderCancelledHandler<S> {
    coordinator: Arc<ReservationCoordinator<S>>,
}

impl<S> OrderCancelledHandler<S> {
    pub fn new(coordinator: Arc<ReservationCoordinator<S>>) -> Self {
        Self { coordinator }
    }
}

#[async_trait::async_trait]
impl<S> InboundHandler for OrderCancelledHandler<S>
where
    S: InventoryStore + 'static,
{
    fn name(&self) -> &'static str {
        "order-cancelled"
    }

    fn handles(&self, event_type: &str) -> bool {
        event_type == ORDER_CANCELLED || event_type == ORDER_REJECTED
    }

    async fn handle(&self, envelope: &IntegrationEnvelope) -> Result<(), InboundError> {
        let Some(body) = decode::<OrderCancelled>(envelope) else {
            return Ok(());
        };
        info!(order_id = %body.order_id, event_type = %envelope.event_type(), "releasing reservation");

        let result = self
            .coordinator
            .release_for_order(body.order_id)
            .await
            .map(|_| ());
        settle(envelope, result)
    }
}

/// `ProductCreated` → create or restock the ledger entry.
pub struct ProductCreatedHandler<S> {
    sync: Arc<CatalogSync<S>>,
}

impl<S> ProductCreatedHandler<S> {
    pub fn new(sync: Arc<CatalogSync<S>>) -> Self {
        Self { sync }
    }
}

#[async_trait::async_trait]
impl<S> InboundHandler for ProductCreatedHandler<S>
where
    S: InventoryStore + 'static,
{
    fn name(&self) -> &'static str {
        "product-created"
    }

    fn handles(&self, event_type: &str) -> bool {
        event_type == PRODUCT_CREATED
    }

    async fn handle(&self, envelope: &IntegrationEnvelope) -> Result<(), InboundError> {
        let Some(body) = decode::<ProductCreated>(envelope) else {
            return Ok(());
        };
        let Ok(sku) = Sku::parse(body.sku.as_str()) else {
            warn!(message_id = %envelope.message_id(), "ProductCreated without sku dropped");
            return Ok(());
        };

        let result = self
            .sync
            .apply_product_created(sku, body.stock_quantity)
            .await
            .map(|_| ());
        settle(envelope, result)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use stockhold_core::{MessageId, OrderId};

    use super::*;
    use crate::store::{InMemoryInventoryStore, StockStore};

    fn envelope(event_type: &str, payload: String) -> IntegrationEnvelope {
        IntegrationEnvelope::new(MessageId::new(), event_type, payload, Utc::now())
    }

    fn coordinator() -> (Arc<InMemoryInventoryStore>, Arc<ReservationCoordinator<Arc<InMemoryInventoryStore>>>) {
        let store = Arc::new(InMemoryInventoryStore::new());
        (store.clone(), Arc::new(ReservationCoordinator::new(store)))
    }

    #[tokio::test]
    async fn malformed_order_placed_is_dropped() {
        let (store, c) = coordinator();
        let handler = OrderPlacedHandler::new(c);

        handler
            .handle(&envelope(ORDER_PLACED, "{broken".to_string()))
            .await
            .unwrap();
        assert!(store.all_outbox().unwrap().is_empty());
    }

    #[tokio::test]
    async fn order_without_id_is_dropped() {
        let (store, c) = coordinator();
        let handler = OrderPlacedHandler::new(c);

        handler
            .handle(&envelope(ORDER_PLACED, r#"{"lines":[{"sku":"A","quantity":1}]}"#.to_string()))
            .await
            .unwrap();
        assert!(store.all_outbox().unwrap().is_empty());
    }

    #[tokio::test]
    async fn order_placed_reserves_stock() {
        let (store, c) = coordinator();
        store
            .upsert_many(&[stockhold_inventory::StockItem::new(Sku::parse("A").unwrap(), 5, Utc::now())])
            .await
            .unwrap();
        let handler = OrderPlacedHandler::new(c);
        let order_id = OrderId::new();
        let payload = format!(
            r#"{{"orderId":"{order_id}","userId":"{}","lines":[{{"sku":"A","quantity":2}}]}}"#,
            uuid::Uuid::now_v7()
        );

        handler.handle(&envelope(ORDER_PLACED, payload)).await.unwrap();

        assert_eq!(store.all_items().unwrap()[0].reserved(), 2);
    }

    #[test]
    fn cancelled_handler_also_handles_rejections() {
        let (_, c) = coordinator();
        let handler = OrderCancelledHandler::new(c);
        assert!(handler.handles(ORDER_CANCELLED));
        assert!(handler.handles(ORDER_REJECTED));
        assert!(!handler.handles(ORDER_PLACED));
    }

    #[tokio::test]
    async fn product_without_sku_is_dropped() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let handler = ProductCreatedHandler::new(Arc::new(CatalogSync::new(store.clone())));

        handler
            .handle(&envelope(PRODUCT_CREATED, r#"{"name":"Mug","stockQuantity":3}"#.to_string()))
            .await
            .unwrap();
        assert!(store.all_items().unwrap().is_empty());
    }

    #[tokio::test]
    async fn product_with_negative_quantity_is_dropped() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let handler = ProductCreatedHandler::new(Arc::new(CatalogSync::new(store.clone())));

        handler
            .handle(&envelope(PRODUCT_CREATED, r#"{"sku":"A","stockQuantity":-3}"#.to_string()))
            .await
            .unwrap();
        assert!(store.all_items().unwrap().is_empty());
    }
}
