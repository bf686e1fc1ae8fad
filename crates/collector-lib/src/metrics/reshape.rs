//! Reshape raw counter samples into per-entity payloads

use super::CounterCatalog;
use crate::models::{
    canonical_kind, capture_interval_name, CounterDescriptor, CounterValues, MetricsPayload,
};
use crate::observability::CollectorMetrics;
use crate::session::{CounterSeries, RawSample};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::warn;

/// Run-wide fields stamped on every payload
#[derive(Debug, Clone)]
pub struct RunContext {
    pub ems_id: u64,
    pub interval_name: String,
    pub start_range: DateTime<Utc>,
    pub end_range: Option<DateTime<Utc>>,
}

/// Composite key for one counter/instance series
pub fn series_key(counter_id: i32, instance: &str) -> String {
    format!("{}_{}", counter_id, instance)
}

/// Build the payload for one entity
///
/// Series whose counter id is missing from the catalog are skipped entirely.
pub fn reshape(sample: &RawSample, catalog: &CounterCatalog, ctx: &RunContext) -> MetricsPayload {
    let mut counters = BTreeMap::new();
    let mut counter_values = CounterValues::new();

    for series in &sample.series {
        let metadata = match catalog.lookup(series.counter_id) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(entity = %sample.entity, error = %e, "Skipping series");
                CollectorMetrics::new().inc_protocol_mismatches();
                continue;
            }
        };

        let key = series_key(series.counter_id, &series.instance);
        counters.insert(
            key.clone(),
            CounterDescriptor {
                counter_key: metadata.counter_key.clone(),
                rollup: metadata.rollup_type.clone(),
                precision: metadata.precision,
                unit_key: metadata.unit_key.clone(),
                vim_key: series.counter_id.to_string(),
                instance: series.instance.clone(),
                capture_interval: series.interval_id,
                capture_interval_name: capture_interval_name(series.interval_id).to_string(),
            },
        );

        fill_values(&mut counter_values, &key, series, sample);
    }

    MetricsPayload {
        ems_id: ctx.ems_id,
        ems_ref: sample.entity.value.clone(),
        ems_klass: canonical_kind(&sample.entity.kind),
        interval_name: ctx.interval_name.clone(),
        start_range: ctx.start_range,
        end_range: ctx.end_range,
        counters,
        counter_values,
    }
}

fn fill_values(values: &mut CounterValues, key: &str, series: &CounterSeries, sample: &RawSample) {
    let pairs = series.results.chunks_exact(2);
    if !pairs.remainder().is_empty() {
        warn!(
            entity = %sample.entity,
            counter_id = series.counter_id,
            len = series.results.len(),
            "Odd-length sample array, dropping trailing timestamp"
        );
        CollectorMetrics::new().inc_protocol_mismatches();
    }

    for pair in pairs {
        values.insert(pair[0] as i64, key, pair[1]);
    }
}
