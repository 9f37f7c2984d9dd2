//! On-disk dataset and freshness marker: atomic replace on save, tolerant read-only load.

use crate::constants::{self, DATASET_FILE, LAST_UPDATED_FILE};
use crate::error::{DatasetError, SaveError};
use crate::table::{CleanTable, ColumnLayout, ColumnSelection, RawTable};
use chrono::{Local, NaiveDateTime};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Reads of the dataset/marker pair before settling for whatever is on disk
const LOAD_ATTEMPTS: u32 = 3;

/// A loaded, read-only snapshot of the persisted dataset
#[derive(Debug, Clone)]
pub struct Dataset {
    pub table: CleanTable,
    /// Freshness marker contents
    pub last_updated: String,
    /// sha256 of the dataset file
    pub version: String,
}

impl Dataset {
    /// Fail when the freshness marker is older than `max_age_hours` relative to `now`.
    /// An unparsable marker is not treated as stale, nor is any age when the limit
    /// is too large to represent as a duration.
    pub fn ensure_fresh(&self, max_age_hours: Option<u64>, now: NaiveDateTime) -> Result<(), DatasetError> {
        let Some(hours) = max_age_hours else {
            return Ok(());
        };
        let Ok(saved) = NaiveDateTime::parse_from_str(&self.last_updated, constants::TIMESTAMP_FORMAT) else {
            warn!(marker = %self.last_updated, "Unrecognised freshness marker; skipping staleness check");
            return Ok(());
        };
        let Some(limit) = i64::try_from(hours).ok().and_then(chrono::Duration::try_hours) else {
            return Ok(());
        };
        if now.signed_duration_since(saved) > limit {
            return Err(DatasetError::Stale {
                last_updated: self.last_updated.clone(),
                max_age_hours: hours,
            });
        }
        Ok(())
    }
}

/// File-metadata fingerprint of the persisted artifacts, used to decide whether a cached snapshot is still current.
/// A same-length rewrite inside one mtime tick leaves the key unchanged, so the cache
/// confirms recently modified files against the content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub dataset_modified: Option<SystemTime>,
    pub dataset_len: u64,
    pub marker_modified: Option<SystemTime>,
}

/// Persists the cleaned dataset and its freshness marker under one directory
#[derive(Debug, Clone)]
pub struct DatasetStore {
    data_dir: PathBuf,
}

impl DatasetStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.data_dir.join(DATASET_FILE)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.data_dir.join(LAST_UPDATED_FILE)
    }

    /// Replace the dataset and marker with `table` stamped with the current local time.
    pub fn save(&self, table: &CleanTable) -> Result<String, SaveError> {
        let timestamp = Local::now().format(constants::TIMESTAMP_FORMAT).to_string();
        self.save_with_timestamp(table, &timestamp)?;
        Ok(timestamp)
    }

    /// Both artifacts are fully written and synced to temp files in the data directory
    /// before either is renamed into place. The dataset is renamed first; the marker
    /// only moves once the new dataset is in place.
    pub fn save_with_timestamp(&self, table: &CleanTable, timestamp: &str) -> Result<(), SaveError> {
        let dataset_path = self.dataset_path();
        let marker_path = self.marker_path();
        info!("Saving processed data to {}", dataset_path.display());

        fs::create_dir_all(&self.data_dir).map_err(|source| SaveError::Io {
            path: self.data_dir.clone(),
            source,
        })?;

        let mut data_tmp = self.temp_file()?;
        {
            let mut writer = csv::Writer::from_writer(data_tmp.as_file_mut());
            table.write_csv(&mut writer)?;
            writer.flush().map_err(|source| SaveError::Io {
                path: dataset_path.clone(),
                source,
            })?;
        }
        sync(&data_tmp, &dataset_path)?;

        let mut marker_tmp = self.temp_file()?;
        marker_tmp
            .write_all(timestamp.as_bytes())
            .map_err(|source| SaveError::Io {
                path: marker_path.clone(),
                source,
            })?;
        sync(&marker_tmp, &marker_path)?;

        data_tmp.persist(&dataset_path).map_err(|e| SaveError::Persist {
            path: dataset_path.clone(),
            source: e.error,
        })?;
        marker_tmp.persist(&marker_path).map_err(|e| SaveError::Persist {
            path: marker_path.clone(),
            source: e.error,
        })?;

        info!(rows = table.len(), "Data saved successfully. Last updated: {}", timestamp);
        Ok(())
    }

    fn temp_file(&self) -> Result<NamedTempFile, SaveError> {
        NamedTempFile::new_in(&self.data_dir).map_err(|source| SaveError::Io {
            path: self.data_dir.clone(),
            source,
        })
    }

    /// Contents of the freshness marker
    pub fn last_updated(&self) -> Result<String, DatasetError> {
        let path = self.marker_path();
        let text = read_or_missing(&path, |p| fs::read_to_string(p))?;
        Ok(text.trim().to_string())
    }

    pub fn cache_key(&self) -> Result<CacheKey, DatasetError> {
        let dataset_path = self.dataset_path();
        let meta = read_or_missing(&dataset_path, |p| fs::metadata(p))?;
        let marker_path = self.marker_path();
        let marker = read_or_missing(&marker_path, |p| fs::metadata(p))?;
        Ok(CacheKey {
            dataset_modified: meta.modified().ok(),
            dataset_len: meta.len(),
            marker_modified: marker.modified().ok(),
        })
    }

    /// sha256 of the dataset file as it is on disk now
    pub fn content_version(&self) -> Result<String, DatasetError> {
        let path = self.dataset_path();
        let bytes = read_or_missing(&path, |p| fs::read(p))?;
        Ok(digest(&bytes))
    }

    /// Read the persisted dataset. Absent optional columns read as null; extra numeric columns are kept.
    pub fn load(&self) -> Result<Dataset, DatasetError> {
        self.load_checked(|_| ())
    }

    /// The marker is read before and after the dataset bytes; a change means a save
    /// completed in between, and the read is repeated so data and marker belong to the
    /// same save. A read that lands between the two renames of a single save can still
    /// pair new data with the old marker; the marker's own rename then changes the
    /// cache key, so the next cache check reloads.
    fn load_checked(&self, mut after_data_read: impl FnMut(u32)) -> Result<Dataset, DatasetError> {
        let path = self.dataset_path();
        let mut attempt = 1;
        let (bytes, last_updated) = loop {
            let before = self.last_updated()?;
            let bytes = read_or_missing(&path, |p| fs::read(p))?;
            after_data_read(attempt);
            let after = self.last_updated()?;
            if after == before {
                break (bytes, after);
            }
            if attempt == LOAD_ATTEMPTS {
                warn!(attempt, "Dataset kept changing while being read; using the latest marker");
                break (bytes, after);
            }
            debug!(attempt, "Dataset replaced during read; retrying");
            attempt += 1;
        };

        let version = digest(&bytes);
        let raw = RawTable::from_reader(bytes.as_slice())?;
        let layout = ColumnLayout::resolve(&raw.headers, ColumnSelection::AllNumeric);
        if let Some(column) = layout.missing_critical_column() {
            return Err(DatasetError::MissingColumn { path, column });
        }

        let parsed = layout.parse(&raw);
        if !parsed.dropped.is_empty() {
            warn!(dropped = parsed.dropped.len(), "Persisted dataset contained rows without identifying fields");
        }
        debug!(rows = parsed.table.len(), version = %version, "Dataset loaded");

        Ok(Dataset {
            table: parsed.table,
            last_updated,
            version,
        })
    }
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn sync(tmp: &NamedTempFile, target: &Path) -> Result<(), SaveError> {
    tmp.as_file().sync_all().map_err(|source| SaveError::Io {
        path: target.to_path_buf(),
        source,
    })
}

/// Map NotFound to `DatasetError::Missing`, everything else to `DatasetError::Io`
fn read_or_missing<T>(path: &Path, read: impl FnOnce(&Path) -> io::Result<T>) -> Result<T, DatasetError> {
    read(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            DatasetError::Missing { path: path.to_path_buf() }
        } else {
            DatasetError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Record;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn table() -> CleanTable {
        CleanTable::new(
            vec!["total_cases".into(), "reproduction_rate".into()],
            vec![
                Record {
                    iso_code: "AAA".into(),
                    continent: Some("Europe".into()),
                    country: "Alpha".into(),
                    date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
                    values: vec![Some(5.0), Some(0.95)],
                },
                Record {
                    iso_code: "BBB".into(),
                    continent: None,
                    country: "Beta, Republic of".into(),
                    date: NaiveDate::from_ymd_opt(2021, 1, 2).unwrap(),
                    values: vec![None, Some(1.0 / 3.0)],
                },
            ],
        )
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = DatasetStore::new(dir.path().join("data"));
        let stamp = store.save(&table()).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.table, table());
        assert_eq!(loaded.last_updated, stamp);
        assert_eq!(loaded.version.len(), 64);
    }

    #[test]
    fn test_load_rereads_when_a_save_lands_mid_read() {
        let dir = tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        store.save_with_timestamp(&table(), "2021-01-01 00:00:00").unwrap();

        let mut newer = table();
        newer.rows_mut()[0].values[0] = Some(6.0);
        let loaded = store
            .load_checked(|attempt| {
                if attempt == 1 {
                    store.save_with_timestamp(&newer, "2021-01-02 00:00:00").unwrap();
                }
            })
            .unwrap();

        assert_eq!(loaded.table, newer);
        assert_eq!(loaded.last_updated, "2021-01-02 00:00:00");
        assert_eq!(loaded.version, store.content_version().unwrap());
    }

    #[test]
    fn test_load_before_any_save_is_missing() {
        let dir = tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        assert!(matches!(store.load(), Err(DatasetError::Missing { .. })));
        assert!(matches!(store.cache_key(), Err(DatasetError::Missing { .. })));
    }

    #[test]
    fn test_save_replaces_wholesale_and_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        store.save_with_timestamp(&table(), "2021-01-01 00:00:00").unwrap();

        let smaller = CleanTable::new(table().columns().to_vec(), table().rows()[..1].to_vec());
        store.save_with_timestamp(&smaller, "2021-01-02 00:00:00").unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.table, smaller);
        assert_eq!(loaded.last_updated, "2021-01-02 00:00:00");

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2, "unexpected files: {:?}", names);
    }

    #[test]
    fn test_failed_save_keeps_previous_marker() {
        let dir = tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        fs::write(store.marker_path(), "2021-01-01 00:00:00").unwrap();

        // A non-empty directory squatting on the dataset path makes the rename fail
        fs::create_dir_all(store.dataset_path()).unwrap();
        fs::write(store.dataset_path().join("keep"), b"x").unwrap();

        let err = store.save(&table()).unwrap_err();
        assert!(matches!(err, SaveError::Persist { .. }));
        assert_eq!(store.last_updated().unwrap(), "2021-01-01 00:00:00");

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2, "temp files left behind: {:?}", names);
    }

    #[test]
    fn test_load_tolerates_missing_and_extra_columns() {
        let dir = tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        fs::write(
            store.dataset_path(),
            "iso_code,country,date,new_cases,excess_mortality\nAAA,Alpha,2021-01-01,3,0.5\n",
        )
        .unwrap();
        fs::write(store.marker_path(), "2021-01-01 00:00:00\n").unwrap();

        let loaded = store.load().unwrap();
        let row = &loaded.table.rows()[0];
        assert_eq!(loaded.table.value(row, "new_cases"), Some(3.0));
        assert_eq!(loaded.table.value(row, "excess_mortality"), Some(0.5));
        assert_eq!(loaded.table.value(row, "total_cases"), None);
        assert_eq!(loaded.last_updated, "2021-01-01 00:00:00");
    }

    #[test]
    fn test_load_rejects_file_without_identifying_column() {
        let dir = tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        fs::write(store.dataset_path(), "country,date,new_cases\nAlpha,2021-01-01,3\n").unwrap();
        fs::write(store.marker_path(), "2021-01-01 00:00:00").unwrap();
        assert!(matches!(
            store.load(),
            Err(DatasetError::MissingColumn { column: "iso_code", .. })
        ));
    }

    #[test]
    fn test_staleness_check() {
        let dataset = Dataset {
            table: CleanTable::default(),
            last_updated: "2021-01-01 00:00:00".into(),
            version: String::new(),
        };
        let now = NaiveDateTime::parse_from_str("2021-01-03 00:00:01", constants::TIMESTAMP_FORMAT).unwrap();
        assert!(dataset.ensure_fresh(None, now).is_ok());
        assert!(dataset.ensure_fresh(Some(72), now).is_ok());
        assert!(matches!(dataset.ensure_fresh(Some(48), now), Err(DatasetError::Stale { .. })));
    }

    #[test]
    fn test_huge_staleness_limit_never_expires() {
        let dataset = Dataset {
            table: CleanTable::default(),
            last_updated: "2021-01-01 00:00:00".into(),
            version: String::new(),
        };
        let now = NaiveDateTime::parse_from_str("2031-01-01 00:00:00", constants::TIMESTAMP_FORMAT).unwrap();
        assert!(dataset.ensure_fresh(Some(u64::MAX / 2), now).is_ok());
        assert!(dataset.ensure_fresh(Some(u64::MAX), now).is_ok());
        assert!(dataset.ensure_fresh(Some(i64::MAX as u64), now).is_ok());
    }
}
