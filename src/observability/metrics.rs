//! OpenTelemetry metrics.
//!
//! Key metrics:
//! - cistern_destinations_persisted_total: Counter of destinations written
//! - cistern_rows_persisted_total: Counter of rows inserted
//! - cistern_persist_errors_total: Counter of failed destinations, by error kind
//! - cistern_persist_latency_seconds: Histogram of per-destination persist time

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Cistern metrics registry.
#[derive(Debug)]
pub struct Metrics {
    /// Destinations successfully persisted.
    pub destinations_persisted: Counter<u64>,
    /// Rows inserted across destinations.
    pub rows_persisted: Counter<u64>,
    /// Destinations that failed to persist.
    pub persist_errors: Counter<u64>,
    /// Time spent persisting one destination, in seconds.
    pub persist_latency: Histogram<f64>,
}

impl Metrics {
    fn new(meter: &Meter) -> Self {
        Self {
            destinations_persisted: meter
                .u64_counter("cistern_destinations_persisted_total")
                .with_description("Destinations persisted")
                .with_unit("1")
                .init(),
            rows_persisted: meter
                .u64_counter("cistern_rows_persisted_total")
                .with_description("Rows inserted")
                .with_unit("1")
                .init(),
            persist_errors: meter
                .u64_counter("cistern_persist_errors_total")
                .with_description("Destinations that failed to persist")
                .with_unit("1")
                .init(),
            persist_latency: meter
                .f64_histogram("cistern_persist_latency_seconds")
                .with_description("Time to aggregate and write one destination")
                .with_unit("s")
                .init(),
        }
    }
}

fn install_manual_reader() {
    let reader = ManualReader::builder().build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider);
}

/// Initialize the metrics system.
///
/// This should be called once at startup. Subsequent calls are ignored.
/// With an OTLP endpoint it must run inside a Tokio runtime.
///
/// # Arguments
///
/// * `otel_endpoint` - Optional OTLP endpoint for metrics export
pub fn init_metrics_with_endpoint(otel_endpoint: Option<&str>) {
    METRICS.get_or_init(|| {
        if let Some(endpoint) = otel_endpoint {
            use opentelemetry_otlp::{Protocol, WithExportConfig};

            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_protocol(Protocol::Grpc);

            match opentelemetry_otlp::new_pipeline()
                .metrics(opentelemetry_sdk::runtime::Tokio)
                .with_exporter(exporter)
                .with_period(std::time::Duration::from_secs(10))
                .build()
            {
                Ok(provider) => {
                    global::set_meter_provider(provider);
                    tracing::info!(endpoint, "OTLP metrics exporter configured");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create OTLP exporter, using no-op metrics");
                    install_manual_reader();
                }
            }
        } else {
            // Recorded but not exported.
            install_manual_reader();
        }

        let meter = global::meter("cistern");
        Metrics::new(&meter)
    });
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

/// Get the global metrics instance, if initialized.
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Record a persisted destination.
pub fn record_persisted(mode: &str, rows: usize, latency_seconds: f64) {
    if let Some(m) = METRICS.get() {
        let attrs = [KeyValue::new("mode", mode.to_string())];
        m.destinations_persisted.add(1, &attrs);
        m.rows_persisted.add(rows as u64, &attrs);
        m.persist_latency.record(latency_seconds, &attrs);
    }
}

/// Record a destination that failed to persist.
pub fn record_persist_error(kind: &'static str) {
    if let Some(m) = METRICS.get() {
        m.persist_errors.add(1, &[KeyValue::new("kind", kind)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics();
        init_metrics();
        assert!(metrics().is_some());
    }

    #[test]
    fn test_record_does_not_panic() {
        init_metrics();
        record_persisted("row", 3, 0.002);
        record_persist_error("connection");
    }
}
