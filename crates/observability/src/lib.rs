//! Tracing and logging setup shared by every subprov binary.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use crate::tracing::{LogFormat, TracingConfig};

/// Initialize process-wide tracing with the default configuration.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(&TracingConfig::default());
}

/// Initialize process-wide tracing with an explicit configuration.
pub fn init_with(config: &TracingConfig) {
    tracing::init(config);
}
