//! TTL-bounded snapshot cache in front of [`DatasetStore`].

use crate::error::DatasetError;
use crate::metrics::QueryMetrics;
use crate::storage::{CacheKey, Dataset, DatasetStore};
use chrono::Local;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Files modified this close to the last content check may have been rewritten
/// without the metadata key changing.
const MTIME_SLACK: Duration = Duration::from_secs(2);

struct CacheEntry {
    key: CacheKey,
    loaded_at: Instant,
    /// Wall-clock time just before the metadata key was last read against this snapshot
    verified_at: SystemTime,
    dataset: Arc<Dataset>,
}

impl CacheEntry {
    /// Whether an equal key is not enough to trust the snapshot
    fn key_ambiguous(&self) -> bool {
        self.key
            .dataset_modified
            .map_or(true, |modified| modified + MTIME_SLACK >= self.verified_at)
    }
}

/// Shared read-only snapshot of the persisted dataset.
///
/// Within `ttl` the cached snapshot is served as is. After that the file metadata
/// is compared with the key the snapshot was loaded under: unchanged files extend
/// the snapshot's life, changed files trigger a reload. When the file was modified
/// close to the last check, an equal key is confirmed against the content hash.
/// Callers hold an `Arc`, so a reload never disturbs a request already in flight.
pub struct DatasetCache {
    store: DatasetStore,
    ttl: Duration,
    max_age_hours: Option<u64>,
    slot: Mutex<Option<CacheEntry>>,
}

impl DatasetCache {
    pub fn new(store: DatasetStore, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            max_age_hours: None,
            slot: Mutex::new(None),
        }
    }

    /// Reject snapshots whose freshness marker is older than `hours`
    pub fn with_stale_limit(mut self, hours: Option<u64>) -> Self {
        self.max_age_hours = hours;
        self
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    pub async fn get(&self) -> Result<Arc<Dataset>, DatasetError> {
        let mut slot = self.slot.lock().await;

        if let Some(entry) = slot.as_ref() {
            if entry.loaded_at.elapsed() < self.ttl {
                QueryMetrics::record_cache_hit();
                let dataset = entry.dataset.clone();
                drop(slot);
                return self.checked(dataset);
            }
        }

        let checked_at = SystemTime::now();
        let key = match self.store.cache_key() {
            Ok(key) => key,
            Err(e) => {
                // files are gone or unreadable; do not keep serving the old snapshot
                *slot = None;
                return Err(e);
            }
        };

        let unchanged = match slot.as_ref() {
            Some(entry) if entry.key == key => {
                !entry.key_ambiguous() || self.content_version().await? == entry.dataset.version
            }
            _ => false,
        };
        if let Some(entry) = slot.as_mut().filter(|_| unchanged) {
            debug!("Dataset unchanged; extending cached snapshot");
            QueryMetrics::record_cache_revalidated();
            entry.loaded_at = Instant::now();
            entry.verified_at = checked_at;
            let dataset = entry.dataset.clone();
            drop(slot);
            return self.checked(dataset);
        }

        let started = Instant::now();
        let store = self.store.clone();
        let dataset = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| self.join_error(e))??;
        let elapsed = started.elapsed().as_secs_f64();
        QueryMetrics::record_dataset_load(elapsed);
        info!(
            rows = dataset.table.len(),
            version = %dataset.version,
            last_updated = %dataset.last_updated,
            load_secs = elapsed,
            "Dataset snapshot loaded"
        );

        let dataset = Arc::new(dataset);
        *slot = Some(CacheEntry {
            key,
            loaded_at: Instant::now(),
            verified_at: checked_at,
            dataset: dataset.clone(),
        });
        drop(slot);
        self.checked(dataset)
    }

    /// Drop the cached snapshot so the next `get` reloads from disk
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }

    async fn content_version(&self) -> Result<String, DatasetError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.content_version())
            .await
            .map_err(|e| self.join_error(e))?
    }

    fn join_error(&self, e: tokio::task::JoinError) -> DatasetError {
        DatasetError::Io {
            path: self.store.dataset_path(),
            source: io::Error::new(io::ErrorKind::Other, e),
        }
    }

    fn checked(&self, dataset: Arc<Dataset>) -> Result<Arc<Dataset>, DatasetError> {
        dataset.ensure_fresh(self.max_age_hours, Local::now().naive_local())?;
        Ok(dataset)
    }
}
