use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct FailureLogMetrics;

impl FailureLogMetrics {
    pub fn write_success() {
        ::metrics::counter!(phase_metric!(counter, "failure_log", "writes_success")).increment(1);
    }

    pub fn write_error() {
        ::metrics::counter!(phase_metric!(counter, "failure_log", "writes_error")).increment(1);
    }

    pub fn current_file_bytes(size: u64) {
        ::metrics::gauge!(phase_metric!(gauge, "failure_log", "current_file_bytes"))
            .set(size as f64);
    }
}

impl PhaseMetrics for FailureLogMetrics {
    fn register_metrics() {
        let _ = ::metrics::counter!(phase_metric!(counter, "failure_log", "writes_success"));
        let _ = ::metrics::counter!(phase_metric!(counter, "failure_log", "writes_error"));
        let _ = ::metrics::gauge!(phase_metric!(gauge, "failure_log", "current_file_bytes"));
    }

    fn phase_name() -> &'static str {
        "failure_log"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "failure_log", "writes_success"),
                metric_type: MetricType::Counter,
                help: "Failure records appended to the local log",
            },
            MetricDoc {
                name: phase_metric!(counter, "failure_log", "writes_error"),
                metric_type: MetricType::Counter,
                help: "Failure records that could not be written",
            },
            MetricDoc {
                name: phase_metric!(gauge, "failure_log", "current_file_bytes"),
                metric_type: MetricType::Gauge,
                help: "Size of the failure log file in bytes",
            },
        ]
    }
}
