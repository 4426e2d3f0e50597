//! Integration event contracts exchanged with other services.
//!
//! - [`outbound`]: events this service publishes through the outbox.
//! - [`inbound`]: payloads this service consumes from orders/catalog.
//! - [`IntegrationEnvelope`]: the transport-level wrapper tagged with a routing key.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod inbound;
pub mod outbound;

pub use bus::{EventBus, Subscription};
pub use envelope::IntegrationEnvelope;
pub use event::IntegrationEvent;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use inbound::{OrderCancelled, OrderPlaced, OrderPlacedLine, ProductCreated};
pub use outbound::{
    AdjustmentReason, CatalogStockAdjusted, StockReservationFailed, StockReserved,
    StockReservedLine,
};
