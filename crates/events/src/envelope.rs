use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use stockhold_core::MessageId;

/// Standard envelope for an integration event on the wire.
///
/// The payload is kept as raw JSON text: the relay forwards exactly what was
/// recorded in the outbox and inbound adapters decode it into their own
/// payload types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationEnvelope {
    message_id: MessageId,
    event_type: String,
    routing_key: String,
    payload: String,
    occurred_at: DateTime<Utc>,
}

impl IntegrationEnvelope {
    /// Build an envelope routed by its event type.
    pub fn new(
        message_id: MessageId,
        event_type: impl Into<String>,
        payload: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let event_type = event_type.into();
        Self {
            message_id,
            routing_key: event_type.clone(),
            event_type,
            payload: payload.into(),
            occurred_at,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Decode the payload into a typed body.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}
