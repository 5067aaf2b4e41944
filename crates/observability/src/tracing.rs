//! Tracing/logging initialization.
//!
//! JSON lines on stdout, one object per event, filtered by `RUST_LOG`
//! (default `info`). Spans opened by `#[instrument]` in the infra layer show up
//! as the `span`/`spans` fields of each line.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Filter from `RUST_LOG`, falling back to [`DEFAULT_FILTER`] when unset or
/// unparseable.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global JSON subscriber. Returns `false` if one was already set.
pub fn init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init()
        .is_ok()
}
