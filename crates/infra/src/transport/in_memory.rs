use std::sync::Arc;

use stockhold_events::{EventBus, InMemoryEventBus, IntegrationEnvelope, Subscription};

use super::{Transport, TransportError};

/// Transport backed by the in-process event bus (tests/dev).
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    bus: Arc<InMemoryEventBus<IntegrationEnvelope>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe every envelope published from now on.
    pub fn subscribe(&self) -> Subscription<IntegrationEnvelope> {
        self.bus.subscribe()
    }
}

#[async_trait::async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, envelope: IntegrationEnvelope) -> Result<(), TransportError> {
        self.bus
            .publish(envelope)
            .map_err(|e| TransportError::Unavailable(e.to_string()))
    }
}
