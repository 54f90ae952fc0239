use crate::error::{Result, StorageError};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing;

const SAMPLES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS samples (
    resource_id TEXT NOT NULL,
    metric_key TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    value REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_samples_series_time
    ON samples(resource_id, metric_key, timestamp);
CREATE INDEX IF NOT EXISTS idx_samples_time
    ON samples(timestamp);
";

const PARTITION_DATE_FORMAT: &str = "%Y-%m-%d";

/// One daily file. Writes and reads go through separate connections so a
/// long aggregation never holds up ingestion (WAL lets them overlap).
struct Partition {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

fn lock_conn(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns the SQLite connections of every daily partition file (`YYYY-MM-DD.db`).
pub struct PartitionManager {
    data_dir: PathBuf,
    partitions: Mutex<HashMap<String, Arc<Partition>>>,
}

impl PartitionManager {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            partitions: Mutex::new(HashMap::new()),
        })
    }

    /// Lock the partitions map, recovering from a poisoned Mutex if necessary.
    fn lock_partitions(&self) -> MutexGuard<'_, HashMap<String, Arc<Partition>>> {
        self.partitions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn partition_key(ts: DateTime<Utc>) -> String {
        ts.format(PARTITION_DATE_FORMAT).to_string()
    }

    fn partition_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.db"))
    }

    fn open(path: &Path) -> Result<Partition> {
        let writer = Connection::open(path)?;
        writer.execute_batch("PRAGMA journal_mode=WAL;")?;
        // LIKE must be case-sensitive so glob patterns agree with exact matches
        writer.execute_batch("PRAGMA case_sensitive_like=ON;")?;
        writer.execute_batch(SAMPLES_SCHEMA)?;

        let reader = Connection::open(path)?;
        reader.execute_batch("PRAGMA case_sensitive_like=ON; PRAGMA query_only=ON;")?;
        Ok(Partition {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    fn ensure_open(
        &self,
        partitions: &mut HashMap<String, Arc<Partition>>,
        key: &str,
    ) -> Result<()> {
        if !partitions.contains_key(key) {
            let path = self.partition_path(key);
            let existed = path.exists();
            let partition = Self::open(&path)?;
            if !existed {
                tracing::info!(partition = %key, "Created new partition");
            }
            partitions.insert(key.to_string(), Arc::new(partition));
        }
        Ok(())
    }

    /// Returns the key of the partition holding `ts`, creating the file on
    /// first use.
    pub fn get_or_create(&self, ts: DateTime<Utc>) -> Result<String> {
        let key = Self::partition_key(ts);
        let mut partitions = self.lock_partitions();
        self.ensure_open(&mut partitions, &key)?;
        Ok(key)
    }

    fn partition(&self, key: &str) -> Result<Arc<Partition>> {
        self.lock_partitions()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::PartitionMissing(key.to_string()))
    }

    /// Runs `f` on the write connection of `key`. Only other writers to the
    /// same day wait for it.
    pub fn with_writer<F, R>(&self, key: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let partition = self.partition(key)?;
        let conn = lock_conn(&partition.writer);
        f(&conn)
    }

    /// Runs `f` on the read-only connection of `key`.
    pub fn with_reader<F, R>(&self, key: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let partition = self.partition(key)?;
        let conn = lock_conn(&partition.reader);
        f(&conn)
    }

    /// Dates of the partition files present in the data directory, oldest
    /// first. Anything that is not `YYYY-MM-DD.db` is ignored.
    fn scan_dates(&self) -> Result<Vec<NaiveDate>> {
        let mut dates = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let name = entry?.file_name().to_string_lossy().to_string();
            let date = name
                .strip_suffix(".db")
                .and_then(|d| NaiveDate::parse_from_str(d, PARTITION_DATE_FORMAT).ok());
            if let Some(date) = date {
                dates.push(date);
            }
        }
        dates.sort();
        Ok(dates)
    }

    /// Keys of the on-disk partitions, oldest first. Every returned key is
    /// opened and ready for [`Self::with_reader`].
    pub fn all_partitions(&self) -> Result<Vec<String>> {
        let dates = self.scan_dates()?;
        self.load(dates)
    }

    /// Keys of the on-disk partitions whose day overlaps `[from, to]`.
    pub fn partitions_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let (from_date, to_date) = (from.date_naive(), to.date_naive());
        let mut dates = self.scan_dates()?;
        dates.retain(|d| *d >= from_date && *d <= to_date);
        self.load(dates)
    }

    fn load(&self, dates: Vec<NaiveDate>) -> Result<Vec<String>> {
        let mut partitions = self.lock_partitions();
        let mut keys = Vec::with_capacity(dates.len());
        for date in dates {
            let key = date.format(PARTITION_DATE_FORMAT).to_string();
            self.ensure_open(&mut partitions, &key)?;
            keys.push(key);
        }
        Ok(keys)
    }
}
