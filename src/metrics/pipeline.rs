//! Ingestion and cleaning phase metrics

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct PipelineMetrics;

impl PipelineMetrics {
    pub fn record_fetch_success(duration_secs: f64, payload_bytes: usize) {
        ::metrics::counter!(phase_metric!(counter, "pipeline", "fetch_success")).increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "pipeline", "fetch_duration_seconds"))
            .record(duration_secs);
        ::metrics::histogram!(phase_metric!(histogram, "pipeline", "payload_bytes"))
            .record(payload_bytes as f64);
    }

    pub fn record_fetch_error() {
        ::metrics::counter!(phase_metric!(counter, "pipeline", "fetch_error")).increment(1);
    }

    pub fn record_fetch_retry() {
        ::metrics::counter!(phase_metric!(counter, "pipeline", "fetch_retries")).increment(1);
    }

    pub fn record_clean(kept_rows: usize, dropped_rows: usize, imputed_cells: usize) {
        ::metrics::gauge!(phase_metric!(gauge, "pipeline", "rows_kept")).set(kept_rows as f64);
        ::metrics::counter!(phase_metric!(counter, "pipeline", "rows_dropped"))
            .increment(dropped_rows as u64);
        ::metrics::counter!(phase_metric!(counter, "pipeline", "cells_imputed"))
            .increment(imputed_cells as u64);
    }

    pub fn record_save_success(timestamp_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "pipeline", "save_success")).increment(1);
        ::metrics::gauge!(phase_metric!(gauge, "pipeline", "last_success_timestamp_seconds"))
            .set(timestamp_secs);
    }

    pub fn record_save_error() {
        ::metrics::counter!(phase_metric!(counter, "pipeline", "save_error")).increment(1);
    }

    pub fn record_run_duration(duration_secs: f64) {
        ::metrics::histogram!(phase_metric!(histogram, "pipeline", "run_duration_seconds"))
            .record(duration_secs);
    }
}

impl PhaseMetrics for PipelineMetrics {
    fn register_metrics() {
        use metrics::{counter, gauge, histogram};

        let _ = counter!(phase_metric!(counter, "pipeline", "fetch_success"));
        let _ = counter!(phase_metric!(counter, "pipeline", "fetch_error"));
        let _ = counter!(phase_metric!(counter, "pipeline", "fetch_retries"));
        let _ = counter!(phase_metric!(counter, "pipeline", "rows_dropped"));
        let _ = counter!(phase_metric!(counter, "pipeline", "cells_imputed"));
        let _ = counter!(phase_metric!(counter, "pipeline", "save_success"));
        let _ = counter!(phase_metric!(counter, "pipeline", "save_error"));
        let _ = histogram!(phase_metric!(histogram, "pipeline", "fetch_duration_seconds"));
        let _ = histogram!(phase_metric!(histogram, "pipeline", "payload_bytes"));
        let _ = histogram!(phase_metric!(histogram, "pipeline", "run_duration_seconds"));
        let _ = gauge!(phase_metric!(gauge, "pipeline", "rows_kept"));
        let _ = gauge!(phase_metric!(gauge, "pipeline", "last_success_timestamp_seconds"));
    }

    fn phase_name() -> &'static str {
        "pipeline"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "pipeline", "fetch_success"),
                metric_type: MetricType::Counter,
                help: "Successful raw dataset downloads",
            },
            MetricDoc {
                name: phase_metric!(counter, "pipeline", "fetch_error"),
                metric_type: MetricType::Counter,
                help: "Fetches that failed after all attempts",
            },
            MetricDoc {
                name: phase_metric!(counter, "pipeline", "fetch_retries"),
                metric_type: MetricType::Counter,
                help: "Fetch attempts repeated after a transient failure",
            },
            MetricDoc {
                name: phase_metric!(counter, "pipeline", "rows_dropped"),
                metric_type: MetricType::Counter,
                help: "Raw rows dropped for missing identifying fields",
            },
            MetricDoc {
                name: phase_metric!(counter, "pipeline", "cells_imputed"),
                metric_type: MetricType::Counter,
                help: "Numeric cells filled by forward or median fill",
            },
            MetricDoc {
                name: phase_metric!(counter, "pipeline", "save_success"),
                metric_type: MetricType::Counter,
                help: "Cleaned datasets persisted",
            },
            MetricDoc {
                name: phase_metric!(counter, "pipeline", "save_error"),
                metric_type: MetricType::Counter,
                help: "Failed persist attempts",
            },
            MetricDoc {
                name: phase_metric!(histogram, "pipeline", "fetch_duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall time of a successful fetch",
            },
            MetricDoc {
                name: phase_metric!(histogram, "pipeline", "payload_bytes"),
                metric_type: MetricType::Histogram,
                help: "Size of the downloaded CSV",
            },
            MetricDoc {
                name: phase_metric!(histogram, "pipeline", "run_duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall time of a full fetch, clean and save run",
            },
            MetricDoc {
                name: phase_metric!(gauge, "pipeline", "rows_kept"),
                metric_type: MetricType::Gauge,
                help: "Rows in the last cleaned dataset",
            },
            MetricDoc {
                name: phase_metric!(gauge, "pipeline", "last_success_timestamp_seconds"),
                metric_type: MetricType::Gauge,
                help: "Unix time of the last successful save",
            },
        ]
    }
}
