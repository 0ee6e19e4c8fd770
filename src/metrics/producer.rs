//! Producer phase metrics: decode and publish outcomes.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct ProducerMetrics;

impl ProducerMetrics {
    pub fn messages_received(count: usize) {
        ::metrics::counter!(phase_metric!(counter, "producer", "messages_received"))
            .increment(count as u64);
    }

    pub fn decode_failed() {
        ::metrics::counter!(phase_metric!(counter, "producer", "decode_failures")).increment(1);
    }

    pub fn records_published(count: usize) {
        ::metrics::counter!(phase_metric!(counter, "producer", "records_published"))
            .increment(count as u64);
    }

    pub fn publish_failed() {
        ::metrics::counter!(phase_metric!(counter, "producer", "publish_failures")).increment(1);
    }

    pub fn publish_duration(seconds: f64) {
        ::metrics::histogram!(phase_metric!(histogram, "producer", "publish_duration_seconds"))
            .record(seconds);
    }
}

impl PhaseMetrics for ProducerMetrics {
    fn register_metrics() {
        let _ = ::metrics::counter!(phase_metric!(counter, "producer", "messages_received"));
        let _ = ::metrics::counter!(phase_metric!(counter, "producer", "decode_failures"));
        let _ = ::metrics::counter!(phase_metric!(counter, "producer", "records_published"));
        let _ = ::metrics::counter!(phase_metric!(counter, "producer", "publish_failures"));
        let _ = ::metrics::histogram!(phase_metric!(
            histogram,
            "producer",
            "publish_duration_seconds"
        ));
    }

    fn phase_name() -> &'static str {
        "producer"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "producer", "messages_received"),
                metric_type: MetricType::Counter,
                help: "Raw messages handed to produce",
            },
            MetricDoc {
                name: phase_metric!(counter, "producer", "decode_failures"),
                metric_type: MetricType::Counter,
                help: "Messages that could not be decrypted or parsed",
            },
            MetricDoc {
                name: phase_metric!(counter, "producer", "records_published"),
                metric_type: MetricType::Counter,
                help: "Records accepted by the source update call",
            },
            MetricDoc {
                name: phase_metric!(counter, "producer", "publish_failures"),
                metric_type: MetricType::Counter,
                help: "Source update calls that failed",
            },
            MetricDoc {
                name: phase_metric!(histogram, "producer", "publish_duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Duration of the source update call",
            },
        ]
    }
}
