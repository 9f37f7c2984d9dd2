//! Phase-organized metrics for the pipeline and the query layer
//!
//! Each phase owns its metric names in a dedicated submodule. Names follow
//! `covid_{phase}_{name}[_total]`.

pub mod pipeline;
pub mod query;

pub use pipeline::PipelineMetrics;
pub use query::QueryMetrics;

use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

/// Install the Prometheus exporter on `addr` and register every phase's metrics.
///
/// Idempotent. Without a call, the `metrics` macros record into a no-op recorder.
pub fn init_metrics(addr: &str) {
    INIT.call_once(|| {
        let addr = match addr.parse::<std::net::SocketAddr>() {
            Ok(a) => a,
            Err(e) => {
                warn!("Invalid metrics addr '{}': {}; exporter disabled", addr, e);
                return;
            }
        };

        let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
        match builder.install() {
            Ok(()) => {
                register_all_metrics();
                info!("Prometheus exporter listening on http://{}/metrics", addr);
            }
            Err(e) => {
                warn!("Failed to install Prometheus exporter: {}", e);
            }
        }
    });
}

pub fn register_all_metrics() {
    PipelineMetrics::register_metrics();
    QueryMetrics::register_metrics();
}

/// Every phase describes and pre-registers its own metrics
pub trait PhaseMetrics {
    /// Register all metrics for this phase so they are exported before first use
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

/// Build a metric name with the crate-wide prefix
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("covid_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("covid_", $phase, "_", $name)
    };
    (gauge, $phase:literal, $name:literal) => {
        concat!("covid_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;
