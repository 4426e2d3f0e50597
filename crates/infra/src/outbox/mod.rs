//! Transactional outbox: records written with domain changes, relayed later.
//!
//! - [`OutboxRecord`]: the persisted, serialized event
//! - [`OutboxDispatcher`]: one relay pass over the pending set
//! - [`OutboxScheduler`]: the background loop driving the dispatcher

pub mod dispatcher;
pub mod record;
pub mod scheduler;

use thiserror::Error;

use crate::store::StoreError;

pub use dispatcher::{DispatchReport, OutboxDispatcher};
pub use record::OutboxRecord;
pub use scheduler::{OutboxScheduler, OutboxSchedulerHandle, SchedulerStats};

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
