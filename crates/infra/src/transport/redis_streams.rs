//! Redis Streams transport (durable, at-least-once delivery).
//!
//! Each envelope becomes one stream entry (XADD) with the fields
//! `event_type`, `message_id`, `occurred_at` and `payload`. The same layout is
//! read back by the inbound consumer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::instrument;

use stockhold_core::MessageId;
use stockhold_events::IntegrationEnvelope;

use super::{Transport, TransportError};

/// Publishes envelopes onto a Redis stream.
#[derive(Debug, Clone)]
pub struct RedisStreamsTransport {
    client: redis::Client,
    stream_key: String,
}

impl RedisStreamsTransport {
    /// `redis_url` e.g. "redis://localhost:6379".
    pub fn new(
        redis_url: impl AsRef<str>,
        stream_key: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            stream_key: stream_key.into(),
        })
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    fn publish_sync(&self, envelope: &IntegrationEnvelope) -> Result<(), TransportError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        let _: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg("event_type")
            .arg(envelope.routing_key())
            .arg("message_id")
            .arg(envelope.message_id().to_string())
            .arg("occurred_at")
            .arg(envelope.occurred_at().to_rfc3339())
            .arg("payload")
            .arg(envelope.payload())
            .query(&mut conn)
            .map_err(|e| TransportError::Unavailable(format!("XADD failed: {e}")))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for RedisStreamsTransport {
    #[instrument(
        skip(self, envelope),
        fields(
            stream_key = %self.stream_key,
            message_id = %envelope.message_id(),
            event_type = %envelope.event_type()
        ),
        err
    )]
    async fn publish(&self, envelope: IntegrationEnvelope) -> Result<(), TransportError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.publish_sync(&envelope))
            .await
            .map_err(|e| TransportError::Unavailable(format!("publish task failed: {e}")))?
    }
}

/// One entry read from a stream.
#[derive(Debug, Clone)]
pub(crate) struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamEntry {
    /// Rebuild the envelope written by [`RedisStreamsTransport`].
    ///
    /// `message_id` and `occurred_at` are optional so that producers which
    /// only send `event_type` + `payload` are still accepted.
    pub fn to_envelope(&self) -> Result<IntegrationEnvelope, TransportError> {
        let event_type = self
            .fields
            .get("event_type")
            .ok_or_else(|| TransportError::Serialization("missing event_type field".into()))?;
        let payload = self
            .fields
            .get("payload")
            .ok_or_else(|| TransportError::Serialization("missing payload field".into()))?;
        let message_id = self
            .fields
            .get("message_id")
            .and_then(|raw| raw.parse::<MessageId>().ok())
            .unwrap_or_default();
        let occurred_at = self
            .fields
            .get("occurred_at")
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(IntegrationEnvelope::new(
            message_id,
            event_type.clone(),
            payload.clone(),
            occurred_at,
        ))
    }
}

/// Parse an XREADGROUP reply: `[[stream, [[id, [k, v, ...]], ...]], ...]`.
///
/// A nil reply (BLOCK timeout) yields no entries.
pub(crate) fn parse_read_reply(reply: redis::Value) -> Result<Vec<StreamEntry>, TransportError> {
    let streams = match reply {
        redis::Value::Nil => return Ok(vec![]),
        redis::Value::Bulk(v) => v,
        other => {
            return Err(TransportError::Serialization(format!(
                "unexpected XREADGROUP reply: {other:?}"
            )));
        }
    };

    let mut entries = Vec::new();
    for stream in streams {
        let mut parts = match stream {
            redis::Value::Bulk(v) if v.len() == 2 => v,
            _ => return Err(TransportError::Serialization("invalid stream block".into())),
        };
        let items = match parts.pop() {
            Some(redis::Value::Bulk(items)) => items,
            _ => return Err(TransportError::Serialization("invalid stream entries".into())),
        };
        for item in items {
            entries.push(parse_entry(item)?);
        }
    }
    Ok(entries)
}

fn parse_entry(entry: redis::Value) -> Result<StreamEntry, TransportError> {
    let mut parts = match entry {
        redis::Value::Bulk(v) if v.len() == 2 => v,
        _ => return Err(TransportError::Serialization("invalid entry format".into())),
    };
    let raw_fields = parts.pop();
    let raw_id = parts.pop();

    let id = match raw_id {
        Some(redis::Value::Data(data)) => String::from_utf8_lossy(&data).to_string(),
        _ => return Err(TransportError::Serialization("invalid entry id".into())),
    };

    let mut fields = HashMap::new();
    match raw_fields {
        Some(redis::Value::Bulk(values)) => {
            for chunk in values.chunks(2) {
                if let [redis::Value::Data(k), redis::Value::Data(v)] = chunk {
                    fields.insert(
                        String::from_utf8_lossy(k).to_string(),
                        String::from_utf8_lossy(v).to_string(),
                    );
                }
            }
        }
        // Entries deleted while pending come back with nil fields.
        Some(redis::Value::Nil) => {}
        _ => return Err(TransportError::Serialization("invalid entry fields".into())),
    }

    Ok(StreamEntry { id, fields })
}
