//! Outbound transports for integration envelopes.
//!
//! The outbox dispatcher only depends on [`Transport`]; delivery is
//! at-least-once and consumers deduplicate by envelope message id.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_streams;

use std::sync::Arc;

use thiserror::Error;

use stockhold_events::IntegrationEnvelope;

pub use in_memory::InMemoryTransport;
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Broker unreachable or rejected the write; the record stays pending.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Publishes envelopes to the message broker.
///
/// No timeout is imposed here; implementations own their own deadlines.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, envelope: IntegrationEnvelope) -> Result<(), TransportError>;
}

#[async_trait::async_trait]
impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    async fn publish(&self, envelope: IntegrationEnvelope) -> Result<(), TransportError> {
        (**self).publish(envelope).await
    }
}
