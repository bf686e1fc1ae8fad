//! Metrics collector
//!
//! This module provides:
//! - `CounterCatalog`, resolving logical counter names to provider ids
//! - `reshape`, turning raw samples into per-entity payloads
//! - `MetricsScheduler`, the periodic batched sampling loop

mod catalog;
mod reshape;
mod scheduler;

#[cfg(test)]
mod tests;

pub use catalog::{precision_for_unit, CounterCatalog, METRIC_CAPTURE_COUNTERS};
pub use reshape::{reshape, series_key, RunContext};
pub use scheduler::{
    MetricsConfig, MetricsScheduler, MetricsSchedulerBuilder, RunSummary, DEFAULT_QUERY_SIZE,
    REALTIME_INTERVAL,
};
