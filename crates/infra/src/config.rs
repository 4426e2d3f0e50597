//! Service configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_RETRY: u32 = 5;
pub const DEFAULT_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_ORDERS_STREAM: &str = "orders.events";
pub const DEFAULT_CATALOG_STREAM: &str = "catalog.events";
pub const DEFAULT_OUTBOUND_STREAM: &str = "inventory.events";
pub const DEFAULT_CONSUMER_GROUP: &str = "inventory-service";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
/// Retry counts are stored in a signed 32-bit column.
pub const MAX_RETRY_LIMIT: u32 = i32::MAX as u32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Outbox relay tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxSettings {
    /// Records read per dispatch pass.
    pub batch_size: usize,
    /// Failed attempts before a record is dead-lettered.
    pub max_retry: u32,
    /// Delay between dispatch passes.
    pub interval: Duration,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_retry: DEFAULT_MAX_RETRY,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub redis_url: String,
    pub orders_stream: String,
    pub catalog_stream: String,
    pub outbound_stream: String,
    pub consumer_group: String,
    pub outbox: OutboxSettings,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the process environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let redis_url = get("REDIS_URL").unwrap_or_else(|| {
            warn!("REDIS_URL not set; using {DEFAULT_REDIS_URL}");
            DEFAULT_REDIS_URL.to_string()
        });

        let max_retry: u32 = positive(&get, "OUTBOX_MAX_RETRY", DEFAULT_MAX_RETRY)?;
        if max_retry > MAX_RETRY_LIMIT {
            return Err(ConfigError::Invalid {
                key: "OUTBOX_MAX_RETRY",
                value: max_retry.to_string(),
                reason: format!("must not exceed {MAX_RETRY_LIMIT}"),
            });
        }

        let outbox = OutboxSettings {
            batch_size: positive(&get, "OUTBOX_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            max_retry,
            interval: Duration::from_secs(positive(
                &get,
                "OUTBOX_INTERVAL_SECS",
                DEFAULT_INTERVAL_SECS,
            )?),
        };

        Ok(Self {
            database_url,
            db_max_connections: positive(&get, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            redis_url,
            orders_stream: get("INBOUND_ORDERS_STREAM")
                .unwrap_or_else(|| DEFAULT_ORDERS_STREAM.to_string()),
            catalog_stream: get("INBOUND_CATALOG_STREAM")
                .unwrap_or_else(|| DEFAULT_CATALOG_STREAM.to_string()),
            outbound_stream: get("OUTBOUND_STREAM")
                .unwrap_or_else(|| DEFAULT_OUTBOUND_STREAM.to_string()),
            consumer_group: get("CONSUMER_GROUP")
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            outbox,
        })
    }
}

/// Parse a strictly positive number, defaulting when absent.
fn positive<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    let value = raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
