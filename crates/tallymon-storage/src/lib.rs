//! Sample persistence for tallymon.
//!
//! The default implementation ([`engine::SqliteMetricStore`]) keeps one
//! SQLite database per UTC day under the data directory, in WAL mode with
//! separate read and write connections, so a slow query never stalls
//! ingestion. [`memory::MemoryMetricStore`] has the
//! same semantics without touching disk.

pub mod engine;
pub mod error;
pub mod memory;
pub mod partition;


use error::Result;
use tallymon_common::query::{AggregateQuery, Bucket};
use tallymon_common::types::{Sample, SeriesKey};

pub use engine::SqliteMetricStore;
pub use error::StorageError;
pub use memory::MemoryMetricStore;

/// Persistence backend for samples.
///
/// Implementations must be safe to share across threads (`Send + Sync`)
/// because ingestion and queries call into the store concurrently. Calls
/// are blocking; async callers run them on a blocking thread.
pub trait MetricStore: Send + Sync {
    /// Durably stores one sample. Once this returns `Ok`, the sample is
    /// visible to subsequent queries.
    fn write_sample(&self, sample: &Sample) -> Result<()>;

    /// Lists every distinct `(resource_id, metric_key)` pair, ordered by
    /// resource then metric.
    fn query_distinct_series(&self) -> Result<Vec<SeriesKey>>;

    /// Buckets the matching samples whose timestamp lies in
    /// `[query.from, query.to]`.
    ///
    /// Each sample timestamp is floored to an epoch-aligned multiple of
    /// `query.bucket`; samples sharing a bucket are folded with
    /// `query.aggregator`; buckets come back in ascending order with no
    /// empty buckets in between.
    fn query_aggregated(&self, query: &AggregateQuery) -> Result<Vec<Bucket>>;
}
