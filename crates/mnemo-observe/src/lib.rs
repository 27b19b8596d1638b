//! Observability setup for Mnemo: structured logging with an optional
//! OpenTelemetry bridge.

pub mod tracing_setup;

pub use tracing_setup::{filter_for_verbosity, init_tracing, shutdown_tracing};
