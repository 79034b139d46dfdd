//! Tracing and logging setup shared by processes embedding keel.

/// Initialize process-wide tracing with the default settings.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    self::tracing::init(&self::tracing::TracingConfig::default());
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{LogFormat, TracingConfig};
