//! Redis Streams consumer feeding the inbound router.
//!
//! Entries are read through a consumer group. An entry is acknowledged once
//! the router returns `Ok` (including malformed/ignored entries); on `Err` it
//! stays pending and is re-read from this consumer's backlog.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::InboundRouter;
use crate::transport::TransportError;
use crate::transport::redis_streams::{StreamEntry, parse_read_reply};

const DEFAULT_BATCH: usize = 16;
const DEFAULT_BLOCK_MS: u64 = 1_000;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct RedisStreamsConsumer {
    client: redis::Client,
    stream_key: String,
    group: String,
    consumer: String,
    router: Arc<InboundRouter>,
    batch: usize,
    block_ms: u64,
}

/// Handle to a running consumer loop.
#[derive(Debug)]
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl ConsumerHandle {
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "stream consumer task failed");
            }
        }
    }
}

impl RedisStreamsConsumer {
    pub fn new(
        redis_url: impl AsRef<str>,
        stream_key: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        router: Arc<InboundRouter>,
    ) -> Result<Self, TransportError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            stream_key: stream_key.into(),
            group: group.into(),
            consumer: consumer.into(),
            router,
            batch: DEFAULT_BATCH,
            block_ms: DEFAULT_BLOCK_MS,
        })
    }

    /// Create the consumer group (and stream) if missing.
    pub fn ensure_group(&self) -> Result<(), TransportError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut conn);

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(TransportError::Unavailable(format!("XGROUP CREATE failed: {e}"))),
        }
    }

    /// `from` is "0" for this consumer's pending backlog, ">" for new entries.
    fn read_sync(&self, from: &str) -> Result<Vec<StreamEntry>, TransportError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(self.batch);
        if from == ">" {
            cmd.arg("BLOCK").arg(self.block_ms);
        }
        cmd.arg("STREAMS").arg(&self.stream_key).arg(from);

        let reply: redis::Value = cmd
            .query(&mut conn)
            .map_err(|e| TransportError::Unavailable(format!("XREADGROUP failed: {e}")))?;
        parse_read_reply(reply)
    }

    fn ack_sync(&self, id: &str) -> Result<(), TransportError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        let _: u64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(id)
            .query(&mut conn)
            .map_err(|e| TransportError::Unavailable(format!("XACK failed: {e}")))?;
        Ok(())
    }

    async fn read(&self, from: &'static str) -> Result<Vec<StreamEntry>, TransportError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.read_sync(from))
            .await
            .map_err(|e| TransportError::Unavailable(format!("read task failed: {e}")))?
    }

    async fn ack(&self, id: String) -> Result<(), TransportError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.ack_sync(&id))
            .await
            .map_err(|e| TransportError::Unavailable(format!("ack task failed: {e}")))?
    }

    /// Process one entry. Returns `false` if it must stay pending.
    async fn process(&self, entry: StreamEntry) -> bool {
        let envelope = match entry.to_envelope() {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(stream = %self.stream_key, entry_id = %entry.id, error = %e, "malformed stream entry dropped");
                return self.acknowledge(&entry.id).await;
            }
        };

        match self.router.route(&envelope).await {
            Ok(routed) => {
                debug!(stream = %self.stream_key, entry_id = %entry.id, routed = ?routed, "stream entry handled");
                self.acknowledge(&entry.id).await
            }
            Err(e) => {
                warn!(
                    stream = %self.stream_key,
                    entry_id = %entry.id,
                    message_id = %envelope.message_id(),
                    error = %e,
                    "stream entry left pending for redelivery"
                );
                false
            }
        }
    }

    async fn acknowledge(&self, id: &str) -> bool {
        match self.ack(id.to_string()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(stream = %self.stream_key, entry_id = %id, error = %e, "failed to acknowledge entry");
                false
            }
        }
    }

    /// Spawn the consumer loop on the current tokio runtime.
    pub fn spawn(self) -> ConsumerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        ConsumerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(stream = %self.stream_key, group = %self.group, consumer = %self.consumer, "stream consumer started");

        // Start with whatever this consumer left pending before a restart.
        let mut backlog = true;

        loop {
            let from = if backlog { "0" } else { ">" };
            let read = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                read = self.read(from) => read,
            };

            let entries = match read {
                Ok(entries) => entries,
                Err(e) => {
                    error!(stream = %self.stream_key, error = %e, "stream read failed");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                    continue;
                }
            };

            if backlog && entries.is_empty() {
                backlog = false;
                continue;
            }

            let mut all_settled = true;
            for entry in entries {
                all_settled &= self.process(entry).await;
            }
            if !all_settled {
                backlog = true;
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }

        info!(stream = %self.stream_key, "stream consumer stopped");
    }
}
