//! Shared domain types for tallymon: samples, batches, alert events and the
//! query vocabulary (aggregators, patterns, buckets) that every store
//! implementation has to agree on.

pub mod duration;
pub mod query;
pub mod types;
