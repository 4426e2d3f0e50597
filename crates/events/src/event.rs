use chrono::{DateTime, Utc};
use uuid::Uuid;

/// An event published to other services.
///
/// Integration events are:
/// - **immutable** facts
/// - **routed** by `event_type` (the routing key on the transport)
/// - delivered **at-least-once**, so each carries a stable `event_id`
pub trait IntegrationEvent: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable routing key (e.g. "StockReserved").
    fn event_type(&self) -> &'static str;

    /// Unique id of this event instance.
    fn event_id(&self) -> Uuid;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
