//! Tracing subscriber setup.
//!
//! The engine and executor emit structured lifecycle events
//! (`execution.started`, `stage.completed`, `stage.failed`, ...) through
//! `tracing`; this module installs a subscriber for processes that do not
//! bring their own.

use tracing_subscriber::EnvFilter;

/// Installs a global tracing subscriber with env-filter support.
///
/// Respects `RUST_LOG`; defaults to `info`. With `json` set, events are
/// emitted as JSON lines for log aggregation. Returns `false` when a
/// subscriber was already installed.
pub fn init_tracing(json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .is_ok()
    }
}
