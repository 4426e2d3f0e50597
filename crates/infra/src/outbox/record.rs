use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockhold_core::MessageId;
use stockhold_events::{IntegrationEnvelope, IntegrationEvent};

use crate::store::StoreError;

/// A serialized integration event awaiting relay.
///
/// `processed_at` set means published and terminal. `retry_count` only grows
/// (until an operator requeues the record).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: MessageId,
    pub event_type: String,
    pub payload: String,
    pub occurred_at: DateTime<Utc>,
    pub retry_count: u32,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    pub fn new(
        event_type: impl Into<String>,
        payload: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            event_type: event_type.into(),
            payload: payload.into(),
            occurred_at,
            retry_count: 0,
            processed_at: None,
        }
    }

    /// Serialize a typed event; routing key and timestamp come from the event.
    pub fn from_event<E>(event: &E) -> Result<Self, StoreError>
    where
        E: IntegrationEvent + Serialize,
    {
        let payload = serde_json::to_string(event)
            .map_err(|e| StoreError::Serialization(format!("outbox payload: {e}")))?;
        Ok(Self::new(event.event_type(), payload, event.occurred_at()))
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    pub fn is_pending(&self, max_retry: u32) -> bool {
        self.processed_at.is_none() && self.retry_count < max_retry
    }

    pub fn is_dead_lettered(&self, max_retry: u32) -> bool {
        self.processed_at.is_none() && self.retry_count >= max_retry
    }

    pub fn mark_processed(&mut self, now: DateTime<Utc>) {
        self.processed_at = Some(now);
    }

    pub fn record_failure(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    /// Envelope for the transport; the message id is the record id so
    /// consumers can deduplicate redeliveries.
    pub fn to_envelope(&self) -> IntegrationEnvelope {
        IntegrationEnvelope::new(
            self.id,
            self.event_type.clone(),
            self.payload.clone(),
            self.occurred_at,
        )
    }
}
