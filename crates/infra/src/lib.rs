//! Infrastructure layer: stores, outbox relay, transports, inbound adapters.

pub mod catalog_sync;
pub mod config;
pub mod coordinator;
pub mod inbound;
pub mod outbox;
pub mod store;
pub mod transport;

mod integration_tests;

pub use catalog_sync::CatalogSync;
pub use config::{ConfigError, OutboxSettings, ServiceConfig};
pub use coordinator::{ReleaseOutcome, ReservationCoordinator, ReservationError, ReserveOutcome};
pub use outbox::{OutboxDispatcher, OutboxError, OutboxRecord, OutboxScheduler};
pub use store::{InMemoryInventoryStore, InventoryStore, PostgresInventoryStore, StoreError};
pub use transport::{InMemoryTransport, Transport, TransportError};
