//! Tracing and logging setup shared by binaries.

/// Initialize process-wide logging with the defaults (`info`, JSON).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init_with(&LogConfig::default());
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{init_with, LogConfig, LogFormat, UnknownLogFormat};
