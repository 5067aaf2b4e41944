//! Process-wide tracing setup.

/// Initialize structured logging for the process.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber configuration (filter, JSON formatting).
pub mod tracing;
