//! Query layer metrics: snapshot cache behaviour and view requests

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct QueryMetrics;

impl QueryMetrics {
    pub fn record_cache_hit() {
        ::metrics::counter!(phase_metric!(counter, "query", "cache_hits")).increment(1);
    }

    /// TTL expired but the file was unchanged
    pub fn record_cache_revalidated() {
        ::metrics::counter!(phase_metric!(counter, "query", "cache_revalidations")).increment(1);
    }

    pub fn record_dataset_load(duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "query", "dataset_loads")).increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "query", "dataset_load_seconds"))
            .record(duration_secs);
    }

    pub fn record_view(duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "query", "views")).increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "query", "view_seconds")).record(duration_secs);
    }

    pub fn record_rejected() {
        ::metrics::counter!(phase_metric!(counter, "query", "rejected")).increment(1);
    }
}

impl PhaseMetrics for QueryMetrics {
    fn register_metrics() {
        use metrics::{counter, histogram};

        let _ = counter!(phase_metric!(counter, "query", "cache_hits"));
        let _ = counter!(phase_metric!(counter, "query", "cache_revalidations"));
        let _ = counter!(phase_metric!(counter, "query", "dataset_loads"));
        let _ = counter!(phase_metric!(counter, "query", "views"));
        let _ = counter!(phase_metric!(counter, "query", "rejected"));
        let _ = histogram!(phase_metric!(histogram, "query", "dataset_load_seconds"));
        let _ = histogram!(phase_metric!(histogram, "query", "view_seconds"));
    }

    fn phase_name() -> &'static str {
        "query"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "query", "cache_hits"),
                metric_type: MetricType::Counter,
                help: "Snapshot served from cache within its TTL",
            },
            MetricDoc {
                name: phase_metric!(counter, "query", "cache_revalidations"),
                metric_type: MetricType::Counter,
                help: "Expired snapshot kept because the file was unchanged",
            },
            MetricDoc {
                name: phase_metric!(counter, "query", "dataset_loads"),
                metric_type: MetricType::Counter,
                help: "Dataset loads from disk",
            },
            MetricDoc {
                name: phase_metric!(counter, "query", "views"),
                metric_type: MetricType::Counter,
                help: "Dashboard views built",
            },
            MetricDoc {
                name: phase_metric!(counter, "query", "rejected"),
                metric_type: MetricType::Counter,
                help: "Requests rejected for bad parameters or missing data",
            },
            MetricDoc {
                name: phase_metric!(histogram, "query", "dataset_load_seconds"),
                metric_type: MetricType::Histogram,
                help: "Time to read and parse the dataset file",
            },
            MetricDoc {
                name: phase_metric!(histogram, "query", "view_seconds"),
                metric_type: MetricType::Histogram,
                help: "Time to assemble one view",
            },
        ]
    }
}
