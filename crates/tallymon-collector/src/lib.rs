//! Host metric collectors for the tallymon agent.
//!
//! Each [`Collector`] reads one category of host state and returns flat
//! `metric_key -> value` readings. The agent merges the readings of every
//! collector into a single batch per tick.

pub mod cpu;
pub mod network;

use anyhow::Result;
use std::collections::BTreeMap;

/// Flat readings produced by one collection pass, keyed by metric key.
pub type Readings = BTreeMap<String, f64>;

/// A source of host metrics, polled once per collection interval.
pub trait Collector: Send {
    /// Short name used in logs (e.g., `"cpu"`, `"network"`).
    fn name(&self) -> &str;

    /// Reads the current values.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system source cannot be read.
    fn collect(&mut self) -> Result<Readings>;
}
