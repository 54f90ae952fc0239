//! Query vocabulary shared by the aggregation engine and every store.
//!
//! The bucketing rules live here so that the SQLite store, the in-memory
//! store and any future backend produce identical buckets: timestamps are
//! floored to an epoch-aligned multiple of the bucket size, samples are
//! folded into a [`BucketAccumulator`], and the [`Aggregator`] picks the
//! final value.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Aggregate function applied to the samples of one bucket.
///
/// # Examples
///
/// ```
/// use tallymon_common::query::Aggregator;
///
/// assert_eq!("max".parse::<Aggregator>().unwrap(), Aggregator::Max);
/// assert!("median".parse::<Aggregator>().is_err());
/// assert_eq!(Aggregator::parse_or_default("median"), Aggregator::Avg);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    #[default]
    Avg,
    Sum,
    Max,
    Min,
}

impl FromStr for Aggregator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avg" => Ok(Self::Avg),
            "sum" => Ok(Self::Sum),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            _ => Err(format!("unknown aggregator: {s}")),
        }
    }
}

impl std::fmt::Display for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Avg => write!(f, "avg"),
            Self::Sum => write!(f, "sum"),
            Self::Max => write!(f, "max"),
            Self::Min => write!(f, "min"),
        }
    }
}

impl Aggregator {
    /// Parses an aggregator name, falling back to [`Aggregator::Avg`] for
    /// anything unrecognised (including the empty string).
    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }

    /// Produces the bucket value from the folded samples.
    pub fn finish(&self, acc: &BucketAccumulator) -> f64 {
        match self {
            Self::Avg => acc.sum / acc.count as f64,
            Self::Sum => acc.sum,
            Self::Max => acc.max,
            Self::Min => acc.min,
        }
    }
}

/// Running sum/count/min/max for one bucket. Partial accumulators from
/// different partitions can be merged before the aggregator is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketAccumulator {
    pub sum: f64,
    pub count: u64,
    pub min: f64,
    pub max: f64,
}

impl BucketAccumulator {
    pub fn new(value: f64) -> Self {
        Self {
            sum: value,
            count: 1,
            min: value,
            max: value,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn merge(&mut self, other: &BucketAccumulator) {
        self.sum += other.sum;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

/// Floors `ts_ms` to a multiple of `bucket_ms` counted from the Unix epoch.
///
/// ```
/// use tallymon_common::query::truncate_millis;
///
/// assert_eq!(truncate_millis(125_000, 60_000), 120_000);
/// assert_eq!(truncate_millis(-1, 60_000), -60_000);
/// ```
pub fn truncate_millis(ts_ms: i64, bucket_ms: i64) -> i64 {
    ts_ms - ts_ms.rem_euclid(bucket_ms)
}

/// Resource or metric selector.
///
/// `*` on its own selects everything; any other string containing `*` is a
/// glob where each `*` matches any run of characters; a string without `*`
/// selects exactly that name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Any,
    Exact(String),
    Glob(String),
}

impl Pattern {
    pub fn parse(s: &str) -> Self {
        if s == "*" {
            Self::Any
        } else if s.contains('*') {
            Self::Glob(s.to_string())
        } else {
            Self::Exact(s.to_string())
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Tests a name against the pattern.
    ///
    /// ```
    /// use tallymon_common::query::Pattern;
    ///
    /// assert!(Pattern::parse("cpu.*").matches("cpu.user"));
    /// assert!(Pattern::parse("*.user").matches("cpu.user"));
    /// assert!(!Pattern::parse("host1").matches("host10"));
    /// assert!(Pattern::parse("*").matches("anything"));
    /// ```
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(name) => name == candidate,
            Self::Glob(glob) => star_match(glob, candidate),
        }
    }

    /// SQL `LIKE` form of a glob, with `\` as the escape character so that
    /// literal `%` and `_` in names are not treated as wildcards.
    /// Returns `None` for patterns that are not globs.
    ///
    /// ```
    /// use tallymon_common::query::Pattern;
    ///
    /// assert_eq!(Pattern::parse("net.if.*.bytes_sent").to_sql_like().as_deref(),
    ///            Some("net.if.%.bytes\\_sent"));
    /// assert_eq!(Pattern::parse("host1").to_sql_like(), None);
    /// ```
    pub fn to_sql_like(&self) -> Option<String> {
        let Self::Glob(glob) = self else {
            return None;
        };
        let mut like = String::with_capacity(glob.len() + 4);
        for c in glob.chars() {
            match c {
                '*' => like.push('%'),
                '%' | '_' | '\\' => {
                    like.push('\\');
                    like.push(c);
                }
                _ => like.push(c),
            }
        }
        Some(like)
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Exact(s) | Self::Glob(s) => write!(f, "{s}"),
        }
    }
}

fn star_match(glob: &str, candidate: &str) -> bool {
    let mut parts = glob.split('*');
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = candidate.strip_prefix(first) else {
        return false;
    };
    let mut parts: Vec<&str> = parts.collect();
    // glob contains at least one '*', so there is always a last part
    let last = parts.pop().unwrap_or_default();
    for part in parts {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

/// One aggregated time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub start: DateTime<Utc>,
    pub value: f64,
}

impl Bucket {
    pub fn unix_secs(&self) -> i64 {
        self.start.timestamp()
    }
}

/// A fully resolved aggregation request as handed to a store: patterns are
/// parsed, the window is turned into an absolute `[from, to]` range.
#[derive(Debug, Clone)]
pub struct AggregateQuery {
    pub resource: Pattern,
    pub metric: Pattern,
    pub aggregator: Aggregator,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub bucket: Duration,
}

impl AggregateQuery {
    pub fn bucket_millis(&self) -> i64 {
        self.bucket.num_milliseconds()
    }
}
