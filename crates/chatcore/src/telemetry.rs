//! Structured logging bootstrap, shared by all four binaries.
//!
//! Mirrors the teacher's `CoreApp::init_logging`: reads `RUST_LOG` as a
//! `tracing-subscriber` env-filter directive, defaulting to `info` when
//! unset, and installs a single global subscriber. `OTEL_COLLECTOR_URL` is
//! recognized (§6.3) but this crate stops short of wiring an OTLP export
//! layer — full telemetry bootstrap is an out-of-scope collaborator.

use tracing_subscriber::EnvFilter;

use crate::constants::{DEFAULT_LOG_FILTER, ENV_LOG};

/// Install the global `tracing` subscriber for `bin_name`. Call once, at the
/// top of `main`, before anything else logs.
pub fn init(bin_name: &'static str) {
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .json()
        .init();

    tracing::info!(bin = bin_name, "starting");
}
