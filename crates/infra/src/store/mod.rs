//! Storage ports and their adapters.
//!
//! The coordinator and dispatcher only see the traits in [`r#trait`]; the
//! in-memory store backs tests/dev and the Postgres store backs production.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;
pub use r#trait::{
    InventoryStore, OutboxStats, OutboxStore, ReservationStore, StockChanges, StockStore,
    StoreError,
};
