//! Inventory domain: stock ledger entries and per-order reservations.
//!
//! This crate contains the business rules for reserving and releasing stock,
//! implemented purely as deterministic domain logic (no IO, no storage).

pub mod reservation;
pub mod stock_item;

pub use reservation::{OrderLine, ReservationLine, ReservationStatus, StockReservation};
pub use stock_item::StockItem;
