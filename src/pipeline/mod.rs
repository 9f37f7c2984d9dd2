// Batch pipeline: fetch the raw CSV, clean it, persist the canonical dataset

pub mod clean;
pub mod fetch;
pub mod impute;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::infra::http_client::ReqwestHttp;
use crate::metrics::PipelineMetrics;
use crate::storage::DatasetStore;
use crate::table::{CleanTable, RawTable};
use clean::CleanReport;
use fetch::{Fetcher, RetryPolicy};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Result of a complete pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub source: String,
    pub raw_rows: usize,
    pub clean: CleanReport,
    pub last_updated: String,
    pub output_file: PathBuf,
    pub duration_secs: f64,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub table: CleanTable,
    pub report: PipelineReport,
}

pub struct Pipeline {
    fetcher: Fetcher,
    store: DatasetStore,
}

impl Pipeline {
    pub fn new(fetcher: Fetcher, store: DatasetStore) -> Self {
        Self { fetcher, store }
    }

    /// Wire the reqwest client, retry policy and store from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = ReqwestHttp::new(config.source.timeout())?;
        let fetcher = Fetcher::new(
            Arc::new(http),
            config.source.url.clone(),
            RetryPolicy::from_config(&config.source),
        );
        Ok(Self::new(fetcher, DatasetStore::new(&config.storage.data_dir)))
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    /// fetch → clean → save. Any stage failure aborts the run and nothing is persisted.
    pub async fn process(&self) -> Result<PipelineOutcome> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id, source = %self.fetcher.url());
        async move {
            let started = Instant::now();
            info!("Starting pipeline");

            let raw = self.fetcher.fetch().await.map_err(|e| {
                let err = PipelineError::from(e);
                error!(stage = err.stage(), "Pipeline failed: {}", err);
                err
            })?;

            let outcome = self.finish(run_id, self.fetcher.url().to_string(), &raw, started)?;
            info!(duration_secs = outcome.report.duration_secs, "Pipeline finished");
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// clean → save for a raw table obtained elsewhere (e.g. a local file)
    pub fn clean_and_save(&self, raw: &RawTable, source: &str) -> Result<PipelineOutcome> {
        let run_id = Uuid::new_v4();
        let _enter = info_span!("pipeline_run", %run_id, source).entered();
        self.finish(run_id, source.to_string(), raw, Instant::now())
    }

    fn finish(&self, run_id: Uuid, source: String, raw: &RawTable, started: Instant) -> Result<PipelineOutcome> {
        let cleaned = clean::clean(raw);
        let imputed = cleaned.report.imputed.forward_filled + cleaned.report.imputed.median_filled;
        PipelineMetrics::record_clean(cleaned.report.kept_rows, cleaned.report.dropped_rows(), imputed);

        let last_updated = match self.store.save(&cleaned.table) {
            Ok(ts) => ts,
            Err(e) => {
                PipelineMetrics::record_save_error();
                let err = PipelineError::from(e);
                error!(stage = err.stage(), "Pipeline failed: {}", err);
                return Err(err);
            }
        };
        PipelineMetrics::record_save_success(chrono::Utc::now().timestamp() as f64);

        let duration_secs = started.elapsed().as_secs_f64();
        PipelineMetrics::record_run_duration(duration_secs);

        Ok(PipelineOutcome {
            report: PipelineReport {
                run_id,
                source,
                raw_rows: raw.len(),
                clean: cleaned.report,
                last_updated,
                output_file: self.store.dataset_path(),
                duration_secs,
            },
            table: cleaned.table,
        })
    }
}
