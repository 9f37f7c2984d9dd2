use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

/// Failure retrieving the raw dataset. Fetch is all-or-nothing.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    #[error("HTTP request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} returned an empty body")]
    EmptyBody { url: String },

    #[error("CSV parse failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("giving up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Timeouts, connection failures and server-side statuses are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Transport { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// A raw row that lacks one of the identifying fields. The row is dropped, the run continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("row {row}: missing critical field '{field}'")]
pub struct MissingCriticalFieldError {
    /// 1-based data row number in the source table (header excluded)
    pub row: usize,
    pub field: &'static str,
}

#[derive(Error, Debug)]
pub enum SaveError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV serialization failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to replace {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The query layer has no usable dataset to read.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("no data available at {path}, run the pipeline first")]
    Missing { path: PathBuf },

    #[error("dataset last updated {last_updated}, older than {max_age_hours}h; run the pipeline")]
    Stale { last_updated: String, max_age_hours: u64 },

    #[error("dataset file {path} is missing required column '{column}'")]
    MissingColumn { path: PathBuf, column: &'static str },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV parse failed: {0}")]
    Csv(#[from] csv::Error),
}

/// Malformed query parameters from the presentation boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("metric name must not be empty")]
    EmptyMetric,

    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("unknown view '{0}'")]
    UnknownView(String),

    #[error("date range is inverted: start {start} is after end {end}")]
    InvertedDateRange { start: NaiveDate, end: NaiveDate },

    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("moving average window must be between 1 and {max}, got {window}")]
    InvalidWindow { window: usize, max: usize },

    #[error("n must be positive")]
    ZeroLimit,

    #[error("select at least one entity for this view")]
    NoEntitiesSelected,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Pipeline stage that failed a run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("fetch stage failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("save stage failed: {0}")]
    Save(#[from] SaveError),
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Fetch(_) => "fetch",
            PipelineError::Save(_) => "save",
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
