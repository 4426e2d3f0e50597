//! Inbound adapters: turn envelopes from other services into coordinator calls.
//!
//! Handlers return `Err` only for transient infrastructure failures, so the
//! transport redelivers. Malformed or irrelevant envelopes are logged and
//! acknowledged.

pub mod handlers;
#[cfg(feature = "redis")]
pub mod redis_consumer;
pub mod router;

use thiserror::Error;

use stockhold_events::IntegrationEnvelope;

use crate::coordinator::ReservationError;

pub use handlers::{OrderCancelledHandler, OrderPlacedHandler, ProductCreatedHandler};
#[cfg(feature = "redis")]
pub use redis_consumer::{ConsumerHandle, RedisStreamsConsumer};
pub use router::{InboundRouter, Routed};

#[derive(Debug, Error)]
pub enum InboundError {
    /// Retry by redelivery.
    #[error("transient failure handling {event_type}: {source}")]
    Transient {
        event_type: String,
        #[source]
        source: ReservationError,
    },
}

#[async_trait::async_trait]
pub trait InboundHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn handles(&self, event_type: &str) -> bool;

    async fn handle(&self, envelope: &IntegrationEnvelope) -> Result<(), InboundError>;
}
