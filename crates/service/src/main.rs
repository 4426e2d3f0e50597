use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use stockhold_infra::inbound::{
    InboundRouter, OrderCancelledHandler, OrderPlacedHandler, ProductCreatedHandler,
    RedisStreamsConsumer,
};
use stockhold_infra::transport::RedisStreamsTransport;
use stockhold_infra::{
    CatalogSync, OutboxDispatcher, OutboxScheduler, PostgresInventoryStore, ReservationCoordinator,
    ServiceConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockhold_observability::init();

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    info!(
        redis_url = %config.redis_url,
        orders_stream = %config.orders_stream,
        catalog_stream = %config.catalog_stream,
        outbound_stream = %config.outbound_stream,
        group = %config.consumer_group,
        batch_size = config.outbox.batch_size,
        max_retry = config.outbox.max_retry,
        interval_secs = config.outbox.interval.as_secs(),
        "configuration loaded"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = Arc::new(PostgresInventoryStore::new(pool));
    store.migrate().await.context("failed to apply schema")?;

    let coordinator = Arc::new(ReservationCoordinator::new(store.clone()));
    let sync = Arc::new(CatalogSync::new(store.clone()));
    let router = Arc::new(
        InboundRouter::new()
            .register(Arc::new(OrderPlacedHandler::new(coordinator.clone())))
            .register(Arc::new(OrderCancelledHandler::new(coordinator)))
            .register(Arc::new(ProductCreatedHandler::new(sync))),
    );

    let transport = RedisStreamsTransport::new(&config.redis_url, config.outbound_stream.clone())
        .context("invalid REDIS_URL")?;
    let scheduler =
        OutboxScheduler::new(OutboxDispatcher::new(store, transport, config.outbox.clone()))
            .with_name("inventory-outbox")
            .spawn();

    let consumer_name = format!("stockhold-{}", std::process::id());
    let mut consumers = Vec::new();
    for stream in [&config.orders_stream, &config.catalog_stream] {
        let consumer = RedisStreamsConsumer::new(
            &config.redis_url,
            stream.clone(),
            config.consumer_group.clone(),
            consumer_name.clone(),
            router.clone(),
        )
        .context("invalid REDIS_URL")?;
        consumer
            .ensure_group()
            .with_context(|| format!("failed to create consumer group on {stream}"))?;
        consumers.push(consumer.spawn());
    }

    info!(handlers = ?router.handler_names(), "inventory service running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    for consumer in consumers {
        consumer.shutdown().await;
    }
    scheduler.shutdown().await;
    Ok(())
}
