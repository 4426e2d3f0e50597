use std::sync::Arc;

use tracing::debug;

use stockhold_events::IntegrationEnvelope;

use super::{InboundError, InboundHandler};

/// What the router did with an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Handled(&'static str),
    Ignored,
}

/// Dispatches envelopes to the first handler that claims their type.
#[derive(Default, Clone)]
pub struct InboundRouter {
    handlers: Vec<Arc<dyn InboundHandler>>,
}

impl InboundRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: Arc<dyn InboundHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub async fn route(&self, envelope: &IntegrationEnvelope) -> Result<Routed, InboundError> {
        let Some(handler) = self.handlers.iter().find(|h| h.handles(envelope.event_type())) else {
            debug!(event_type = %envelope.event_type(), "no handler for inbound event; ignored");
            return Ok(Routed::Ignored);
        };
        handler.handle(envelope).await?;
        Ok(Routed::Handled(handler.name()))
    }
}
