//! Metrics for the connector, grouped by pipeline phase
//!
//! Each phase owns a submodule with its metric names, registration and
//! documentation. Names follow `co2_{phase}_{name}` with a `_total` suffix for
//! counters.

pub mod failure_log;
pub mod producer;

pub use failure_log::FailureLogMetrics;
pub use producer::ProducerMetrics;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

/// Install the Prometheus exporter on `listen_addr` and register all metrics.
///
/// Idempotent. Without an exporter the metric macros are no-ops.
pub fn init_metrics(listen_addr: SocketAddr) {
    INIT.call_once(|| {
        let builder =
            metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(listen_addr);
        match builder.install() {
            Ok(()) => {
                info!("Prometheus HTTP exporter started at http://{}/metrics", listen_addr);
                register_all_metrics();
            }
            Err(e) => warn!("Failed to install Prometheus exporter: {}", e),
        }
    });
}

/// Per-phase metric registration and documentation
pub trait PhaseMetrics {
    fn register_metrics();

    fn phase_name() -> &'static str;

    fn metrics_documentation() -> Vec<MetricDoc>;
}

#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("co2_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("co2_", $phase, "_", $name)
    };
    (gauge, $phase:literal, $name:literal) => {
        concat!("co2_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;

/// Register every phase and return the documented metrics keyed by name.
pub fn register_all_metrics() -> HashMap<&'static str, MetricDoc> {
    let mut all = HashMap::new();
    register_phase::<ProducerMetrics>(&mut all);
    register_phase::<FailureLogMetrics>(&mut all);
    info!("Registered {} metrics", all.len());
    all
}

fn register_phase<T: PhaseMetrics>(all: &mut HashMap<&'static str, MetricDoc>) {
    T::register_metrics();
    for doc in T::metrics_documentation() {
        if all.contains_key(doc.name) {
            warn!(
                "Metric name conflict: '{}' already registered before phase '{}'",
                doc.name,
                T::phase_name()
            );
        } else {
            all.insert(doc.name, doc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_naming_convention() {
        assert_eq!(
            phase_metric!(counter, "producer", "messages_received"),
            "co2_producer_messages_received_total"
        );
        assert_eq!(
            phase_metric!(histogram, "producer", "publish_duration_seconds"),
            "co2_producer_publish_duration_seconds"
        );
    }

    #[test]
    fn test_phase_metrics_reach_prometheus_recorder() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        ::metrics::with_local_recorder(&recorder, || {
            ProducerMetrics::messages_received(3);
            FailureLogMetrics::write_error();
        });

        let rendered = handle.render();
        assert!(rendered.contains("co2_producer_messages_received_total 3"));
        assert!(rendered.contains("co2_failure_log_writes_error_total 1"));
    }

    #[test]
    fn test_registration_has_no_conflicts() {
        let all = register_all_metrics();
        let documented = ProducerMetrics::metrics_documentation().len()
            + FailureLogMetrics::metrics_documentation().len();
        assert_eq!(all.len(), documented);
    }
}
