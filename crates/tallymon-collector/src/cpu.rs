use crate::{Collector, Readings};
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

/// Aggregate CPU time counters from the first `cpu` line of `/proc/stat`,
/// in clock ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    /// Everything else (iowait, irq, softirq, steal).
    pub other: u64,
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        self.user + self.nice + self.system + self.idle + self.other
    }

    /// Parses the aggregate `cpu` line of a `/proc/stat` dump.
    ///
    /// `guest` and `guest_nice` are skipped since the kernel already counts
    /// them in `user` and `nice`.
    pub fn parse_proc_stat(content: &str) -> Result<Self> {
        let line = content
            .lines()
            .find(|l| l.starts_with("cpu "))
            .ok_or_else(|| anyhow!("no aggregate cpu line in /proc/stat"))?;
        let fields = line
            .split_whitespace()
            .skip(1)
            .map(|f| f.parse::<u64>().with_context(|| format!("bad cpu field '{f}'")))
            .collect::<Result<Vec<_>>>()?;
        if fields.len() < 4 {
            return Err(anyhow!("cpu line has {} fields, need at least 4", fields.len()));
        }
        Ok(Self {
            user: fields[0],
            nice: fields[1],
            system: fields[2],
            idle: fields[3],
            other: fields.iter().skip(4).take(4).sum(),
        })
    }

    /// Percentage of time spent in each state between `prev` and `self`.
    /// Returns `None` when no ticks elapsed.
    pub fn percent_since(&self, prev: &CpuTimes) -> Option<[(&'static str, f64); 4]> {
        let total = self.total().checked_sub(prev.total()).filter(|t| *t > 0)? as f64;
        let pct = |now: u64, before: u64| now.saturating_sub(before) as f64 * 100.0 / total;
        Some([
            ("cpu.user", pct(self.user, prev.user)),
            ("cpu.nice", pct(self.nice, prev.nice)),
            ("cpu.system", pct(self.system, prev.system)),
            ("cpu.idle", pct(self.idle, prev.idle)),
        ])
    }
}

/// Reports `cpu.user`, `cpu.nice`, `cpu.system` and `cpu.idle` as the
/// share of CPU time since the previous call (since boot on the first one).
pub struct CpuTimesCollector {
    source: PathBuf,
    prev: CpuTimes,
}

impl CpuTimesCollector {
    pub fn new() -> Self {
        Self::with_source("/proc/stat")
    }

    pub fn with_source(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            prev: CpuTimes::default(),
        }
    }
}

impl Default for CpuTimesCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for CpuTimesCollector {
    fn name(&self) -> &str {
        "cpu"
    }

    fn collect(&mut self) -> Result<Readings> {
        let content = std::fs::read_to_string(&self.source)
            .with_context(|| format!("reading {}", self.source.display()))?;
        let now = CpuTimes::parse_proc_stat(&content)?;

        let mut readings = Readings::new();
        if let Some(shares) = now.percent_since(&self.prev) {
            readings.extend(shares.iter().map(|(k, v)| (k.to_string(), *v)));
        }
        self.prev = now;
        Ok(readings)
    }
}
