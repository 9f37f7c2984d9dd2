//! Download of the raw CSV with bounded, jittered retries.

use crate::app::ports::HttpClientPort;
use crate::config::SourceConfig;
use crate::error::FetchError;
use crate::metrics::PipelineMetrics;
use crate::table::RawTable;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Bounded exponential backoff with jitter between fetch attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(source: &SourceConfig) -> Self {
        Self {
            max_attempts: source.max_attempts.max(1),
            base_delay: Duration::from_millis(source.backoff_base_ms),
            max_delay: Duration::from_millis(source.backoff_max_ms),
        }
    }

    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff plus up to 25% random jitter
    fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        let spread = base.as_millis() as u64 / 4;
        if spread == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

/// Downloads the full raw table from a single URL
pub struct Fetcher {
    http: Arc<dyn HttpClientPort>,
    url: String,
    retry: RetryPolicy,
}

impl Fetcher {
    pub fn new(http: Arc<dyn HttpClientPort>, url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            http,
            url: url.into(),
            retry,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch and parse the whole table. Transient failures are retried per the
    /// policy; anything else fails immediately. No partial result is ever returned.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn fetch(&self) -> Result<RawTable, FetchError> {
        info!("Fetching data from {}", self.url);
        let mut attempt = 1;
        loop {
            let started = Instant::now();
            match self.fetch_once().await {
                Ok((table, bytes)) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    PipelineMetrics::record_fetch_success(elapsed, bytes);
                    info!(
                        rows = table.len(),
                        columns = table.headers.len(),
                        bytes,
                        attempt,
                        "Data fetched successfully"
                    );
                    return Ok(table);
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_with_jitter(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Fetch attempt failed: {}",
                        e
                    );
                    PipelineMetrics::record_fetch_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    PipelineMetrics::record_fetch_error();
                    error!(attempt, "Error fetching data: {}", e);
                    if attempt > 1 {
                        return Err(FetchError::Exhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn fetch_once(&self) -> Result<(RawTable, usize), FetchError> {
        let resp = self.http.get(&self.url).await?;
        debug!(
            status = resp.status,
            content_type = %resp.content_type,
            content_length = resp.content_length,
            last_modified = ?resp.last_modified,
            "Response received"
        );
        if !(200..300).contains(&resp.status) {
            return Err(FetchError::Status {
                url: self.url.clone(),
                status: resp.status,
            });
        }
        if resp.bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(FetchError::EmptyBody { url: self.url.clone() });
        }
        let table = RawTable::from_reader(resp.bytes.as_slice())?;
        if table.headers.is_empty() {
            return Err(FetchError::EmptyBody { url: self.url.clone() });
        }
        Ok((table, resp.bytes.len()))
    }
}
