//! End-to-end flows over the in-memory adapters.
//!
//! Inbound envelope → router → coordinator → store + outbox → dispatcher → transport.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use proptest::prelude::*;

    use stockhold_core::{MessageId, OrderId, Sku, UserId};
    use stockhold_events::inbound::{ORDER_CANCELLED, ORDER_PLACED, PRODUCT_CREATED};
    use stockhold_events::{IntegrationEnvelope, Subscription};
    use stockhold_inventory::{OrderLine, ReservationStatus};

    use crate::catalog_sync::CatalogSync;
    use crate::config::OutboxSettings;
    use crate::coordinator::ReservationCoordinator;
    use crate::inbound::{
        InboundRouter, OrderCancelledHandler, OrderPlacedHandler, ProductCreatedHandler, Routed,
    };
    use crate::outbox::OutboxDispatcher;
    use crate::store::{InMemoryInventoryStore, ReservationStore, StockStore};
    use crate::transport::InMemoryTransport;

    type Store = Arc<InMemoryInventoryStore>;

    struct Harness {
        store: Store,
        router: InboundRouter,
        dispatcher: OutboxDispatcher<Store, InMemoryTransport>,
        published: Subscription<IntegrationEnvelope>,
    }

    fn setup() -> Harness {
        let store: Store = Arc::new(InMemoryInventoryStore::new());
        let coordinator = Arc::new(ReservationCoordinator::new(store.clone()));
        let sync = Arc::new(CatalogSync::new(store.clone()));

        let router = InboundRouter::new()
            .register(Arc::new(OrderPlacedHandler::new(coordinator.clone())))
            .register(Arc::new(OrderCancelledHandler::new(coordinator)))
            .register(Arc::new(ProductCreatedHandler::new(sync)));

        let transport = InMemoryTransport::new();
        let published = transport.subscribe();
        let settings = OutboxSettings {
            batch_size: 100,
            max_retry: 5,
            interval: Duration::from_millis(10),
        };

        Harness {
            dispatcher: OutboxDispatcher::new(store.clone(), transport, settings),
            store,
            router,
            published,
        }
    }

    fn envelope(event_type: &str, payload: String) -> IntegrationEnvelope {
        IntegrationEnvelope::new(MessageId::new(), event_type, payload, Utc::now())
    }

    fn product_created(sku: &str, qty: i64) -> IntegrationEnvelope {
        envelope(
            PRODUCT_CREATED,
            format!(r#"{{"sku":"{sku}","name":"{sku}","stockQuantity":{qty}}}"#),
        )
    }

    fn order_placed(order_id: OrderId, lines: &[(&str, i64)]) -> IntegrationEnvelope {
        let lines: Vec<String> = lines
            .iter()
            .map(|(sku, qty)| format!(r#"{{"sku":"{sku}","quantity":{qty}}}"#))
            .collect();
        envelope(
            ORDER_PLACED,
            format!(
                r#"{{"orderId":"{order_id}","userId":"{}","lines":[{}]}}"#,
                UserId::new(),
                lines.join(",")
            ),
        )
    }

    fn order_cancelled(order_id: OrderId) -> IntegrationEnvelope {
        envelope(ORDER_CANCELLED, format!(r#"{{"orderId":"{order_id}"}}"#))
    }

    async fn counts(store: &Store, sku: &str) -> (i64, i64) {
        let sku = Sku::parse(sku).unwrap();
        let items = store.get_by_skus(std::slice::from_ref(&sku)).await.unwrap();
        (items[&sku].available(), items[&sku].reserved())
    }

    fn payloads(published: &[IntegrationEnvelope], event_type: &str) -> Vec<serde_json::Value> {
        published
            .iter()
            .filter(|e| e.event_type() == event_type)
            .map(|e| serde_json::from_str(e.payload()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn catalog_load_reserve_and_cancel_are_relayed() {
        let h = setup();

        h.router.route(&product_created("X", 10)).await.unwrap();
        assert_eq!(counts(&h.store, "X").await, (10, 0));

        let order_id = OrderId::new();
        let routed = h.router.route(&order_placed(order_id, &[("X", 4)])).await.unwrap();
        assert_eq!(routed, Routed::Handled("order-placed"));
        assert_eq!(counts(&h.store, "X").await, (6, 4));

        let report = h.dispatcher.dispatch_once().await.unwrap();
        assert_eq!(report.published, 3);
        let first = h.published.drain();
        assert_eq!(payloads(&first, "StockReserved").len(), 1);
        let adjusted = payloads(&first, "CatalogStockAdjusted");
        assert_eq!(adjusted.len(), 2);
        assert_eq!(adjusted[0]["reason"], "INITIAL_LOAD");
        assert_eq!(adjusted[1]["reason"], "ORDER_RESERVED");
        assert_eq!(adjusted[1]["availableQuantity"], 6);

        h.router.route(&order_cancelled(order_id)).await.unwrap();
        assert_eq!(counts(&h.store, "X").await, (10, 0));
        let reservation = h.store.get_by_order_id(order_id).await.unwrap().unwrap();
        assert_eq!(reservation.status(), ReservationStatus::Released);

        h.dispatcher.dispatch_once().await.unwrap();
        let second = h.published.drain();
        let released = payloads(&second, "CatalogStockAdjusted");
        assert_eq!(released.len(), 1);
        assert_eq!(released[0]["reason"], "ORDER_RELEASED");
        assert_eq!(released[0]["availableQuantity"], 10);
        assert_eq!(released[0]["reservedQuantity"], 0);
    }

    #[tokio::test]
    async fn redelivered_order_is_reserved_once() {
        let h = setup();
        h.router.route(&product_created("A", 5)).await.unwrap();

        let order_id = OrderId::new();
        let placed = order_placed(order_id, &[("A", 2)]);
        h.router.route(&placed).await.unwrap();
        h.router.route(&placed).await.unwrap();

        assert_eq!(counts(&h.store, "A").await, (3, 2));
        h.dispatcher.dispatch_once().await.unwrap();
        assert_eq!(payloads(&h.published.drain(), "StockReserved").len(), 1);
    }

    #[tokio::test]
    async fn insufficient_stock_publishes_failure_and_changes_nothing() {
        let h = setup();
        h.router.route(&product_created("A", 10)).await.unwrap();
        h.router.route(&product_created("B", 3)).await.unwrap();

        let order_id = OrderId::new();
        h.router
            .route(&order_placed(order_id, &[("A", 5), ("B", 999)]))
            .await
            .unwrap();

        assert_eq!(counts(&h.store, "A").await, (10, 0));
        assert_eq!(counts(&h.store, "B").await, (3, 0));
        assert!(h.store.get_by_order_id(order_id).await.unwrap().is_none());

        h.dispatcher.dispatch_once().await.unwrap();
        let failed = payloads(&h.published.drain(), "StockReservationFailed");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["orderId"], order_id.to_string());
    }

    #[tokio::test]
    async fn unknown_event_types_are_ignored() {
        let h = setup();
        let routed = h
            .router
            .route(&envelope("PaymentCaptured", "{}".to_string()))
            .await
            .unwrap();
        assert_eq!(routed, Routed::Ignored);
        assert!(h.store.all_outbox().unwrap().is_empty());
    }

    #[derive(Debug, Clone)]
    enum Step {
        Reserve { order: usize, sku: usize, qty: i64 },
        Release { order: usize },
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0usize..6, 0usize..3, 1i64..8).prop_map(|(order, sku, qty)| Step::Reserve { order, sku, qty }),
            (0usize..6).prop_map(|order| Step::Release { order }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: available + reserved per SKU never changes under reserve/release traffic.
        #[test]
        fn stock_is_conserved(steps in prop::collection::vec(step(), 1..30)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let store: Store = Arc::new(InMemoryInventoryStore::new());
                let sync = CatalogSync::new(store.clone());
                let skus = ["A", "B", "C"];
                for sku in skus {
                    sync.apply_product_created(Sku::parse(sku).unwrap(), 10).await.unwrap();
                }
                let coordinator = ReservationCoordinator::new(store.clone());
                let orders: Vec<OrderId> = (0..6).map(|_| OrderId::new()).collect();

                for step in steps {
                    match step {
                        Step::Reserve { order, sku, qty } => {
                            coordinator
                                .reserve_for_order(
                                    orders[order],
                                    UserId::new(),
                                    vec![OrderLine::new(Sku::parse(skus[sku]).unwrap(), qty)],
                                )
                                .await
                                .unwrap();
                        }
                        Step::Release { order } => {
                            coordinator.release_for_order(orders[order]).await.unwrap();
                        }
                    }

                    for item in store.all_items().unwrap() {
                        prop_assert_eq!(item.available() + item.reserved(), 10);
                        prop_assert!(item.available() >= 0 && item.reserved() >= 0);
                    }
                }
                Ok(())
            })?;
        }
    }
}
