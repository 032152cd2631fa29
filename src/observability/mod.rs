//! Observability infrastructure.
//!
//! Provides:
//! - Structured logging via `tracing`
//! - OpenTelemetry metrics for persisted destinations, rows and failures

pub mod metrics;
pub mod tracing;
