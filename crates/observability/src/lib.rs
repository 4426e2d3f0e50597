//! Tracing/logging setup shared by the service binaries.

/// Initialize process-wide tracing from the environment.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

pub mod tracing;
