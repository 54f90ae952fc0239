use crate::error::{Result, StorageError};
use crate::partition::PartitionManager;
use crate::MetricStore;
use chrono::DateTime;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tallymon_common::query::{AggregateQuery, Bucket, BucketAccumulator, Pattern};
use tallymon_common::types::{Sample, SeriesKey};

pub struct SqliteMetricStore {
    partitions: PartitionManager,
}

impl SqliteMetricStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            partitions: PartitionManager::new(data_dir)?,
        })
    }
}

/// Appends the SQL condition for `pattern` on `column`. Only fixed SQL text
/// is appended; the pattern itself always travels as a bound parameter.
fn push_pattern_clause(
    sql: &mut String,
    params: &mut Vec<Box<dyn rusqlite::types::ToSql>>,
    column: &str,
    pattern: &Pattern,
) {
    match pattern {
        Pattern::Any => {}
        Pattern::Exact(name) => {
            params.push(Box::new(name.clone()));
            sql.push_str(&format!(" AND {column} = ?{}", params.len()));
        }
        Pattern::Glob(_) => {
            if let Some(like) = pattern.to_sql_like() {
                params.push(Box::new(like));
                sql.push_str(&format!(" AND {column} LIKE ?{} ESCAPE '\\'", params.len()));
            }
        }
    }
}

impl MetricStore for SqliteMetricStore {
    fn write_sample(&self, sample: &Sample) -> Result<()> {
        let key = self.partitions.get_or_create(sample.timestamp)?;
        self.partitions.with_writer(&key, |conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO samples (resource_id, metric_key, timestamp, value) VALUES (?1, ?2, ?3, ?4)",
            )?;
            stmt.execute(rusqlite::params![
                &sample.resource_id,
                &sample.metric_key,
                sample.timestamp.timestamp_millis(),
                sample.value,
            ])?;
            Ok(())
        })
    }

    fn query_distinct_series(&self) -> Result<Vec<SeriesKey>> {
        let mut series = BTreeSet::new();
        for key in self.partitions.all_partitions()? {
            self.partitions.with_reader(&key, |conn| {
                let mut stmt =
                    conn.prepare_cached("SELECT DISTINCT resource_id, metric_key FROM samples")?;
                let rows = stmt.query_map([], |row| {
                    Ok(SeriesKey {
                        resource_id: row.get(0)?,
                        metric_key: row.get(1)?,
                    })
                })?;
                for row in rows {
                    series.insert(row?);
                }
                Ok(())
            })?;
        }
        Ok(series.into_iter().collect())
    }

    fn query_aggregated(&self, query: &AggregateQuery) -> Result<Vec<Bucket>> {
        let bucket_ms = query.bucket_millis();
        if bucket_ms <= 0 {
            return Err(StorageError::Other(format!(
                "bucket size must be positive, got {bucket_ms}ms"
            )));
        }

        let keys = self.partitions.partitions_in_range(query.from, query.to)?;
        let mut merged: BTreeMap<i64, BucketAccumulator> = BTreeMap::new();

        let mut sql = String::from(
            "SELECT timestamp - (((timestamp % ?1) + ?1) % ?1) AS bucket,
                    SUM(value), COUNT(*), MIN(value), MAX(value)
             FROM samples WHERE timestamp >= ?2 AND timestamp <= ?3",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
            Box::new(bucket_ms),
            Box::new(query.from.timestamp_millis()),
            Box::new(query.to.timestamp_millis()),
        ];
        push_pattern_clause(&mut sql, &mut params, "resource_id", &query.resource);
        push_pattern_clause(&mut sql, &mut params, "metric_key", &query.metric);
        sql.push_str(" GROUP BY bucket ORDER BY bucket ASC");

        for key in keys {
            self.partitions.with_reader(&key, |conn| {
                let mut stmt = conn.prepare_cached(&sql)?;
                let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                    params.iter().map(|p| p.as_ref()).collect();
                let rows = stmt.query_map(param_refs.as_slice(), |row| {
                    let count: i64 = row.get(2)?;
                    Ok((
                        row.get::<_, i64>(0)?,
                        BucketAccumulator {
                            sum: row.get(1)?,
                            count: count as u64,
                            min: row.get(3)?,
                            max: row.get(4)?,
                        },
                    ))
                })?;
                for row in rows {
                    let (start_ms, partial) = row?;
                    // a bucket can straddle midnight and show up in two partitions
                    merged
                        .entry(start_ms)
                        .and_modify(|acc| acc.merge(&partial))
                        .or_insert(partial);
                }
                Ok(())
            })?;
        }

        merged
            .into_iter()
            .map(|(start_ms, acc)| {
                let start = DateTime::from_timestamp_millis(start_ms).ok_or_else(|| {
                    StorageError::Malformed {
                        column: "timestamp",
                        detail: format!("bucket start {start_ms} out of range"),
                    }
                })?;
                Ok(Bucket {
                    start,
                    value: query.aggregator.finish(&acc),
                })
            })
            .collect()
    }
}
