//! Canonical payload models handed to the publisher

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};

/// Source tag stamped on every event from this provider family
pub const EVENT_SOURCE: &str = "VC";

/// Provider-agnostic event record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalEvent {
    pub ems_id: u64,
    pub event_type: String,
    pub chain_id: Option<i64>,
    pub is_task: bool,
    pub source: String,
    pub message: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub username: Option<String>,
    /// Untransformed provider record
    pub full_data: serde_json::Value,
}

/// Resolved metadata for one logical counter
///
/// The capture interval is a property of each returned series, not of the
/// counter, so it lives on [`CounterDescriptor`].
#[derive(Debug, Clone, PartialEq)]
pub struct PerfCounterMetadata {
    /// Provider counter id
    pub counter_id: i32,
    /// Logical name, `<group>_<name>_<stats>_<rollup>`
    pub counter_key: String,
    pub rollup_type: String,
    pub unit_key: String,
    /// Display precision hint, not applied to stored values
    pub precision: f64,
}

/// Per-series descriptor stored under `counters[<counter_id>_<instance>]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterDescriptor {
    pub counter_key: String,
    pub rollup: String,
    pub precision: f64,
    pub unit_key: String,
    pub vim_key: String,
    pub instance: String,
    pub capture_interval: i32,
    pub capture_interval_name: String,
}

/// Sparse time-indexed matrix of sample values
///
/// Timestamp buckets keep the order in which each timestamp first appeared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CounterValues {
    buckets: Vec<(i64, BTreeMap<String, f64>)>,
    index: HashMap<i64, usize>,
}

impl CounterValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `value` at `(timestamp, key)`, replacing any previous value
    pub fn insert(&mut self, timestamp: i64, key: &str, value: f64) {
        let slot = match self.index.get(&timestamp) {
            Some(&slot) => slot,
            None => {
                self.buckets.push((timestamp, BTreeMap::new()));
                let slot = self.buckets.len() - 1;
                self.index.insert(timestamp, slot);
                slot
            }
        };
        self.buckets[slot].1.insert(key.to_string(), value);
    }

    pub fn get(&self, timestamp: i64) -> Option<&BTreeMap<String, f64>> {
        self.index.get(&timestamp).map(|&slot| &self.buckets[slot].1)
    }

    /// Timestamps in order of first appearance
    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        self.buckets.iter().map(|(ts, _)| *ts)
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &BTreeMap<String, f64>)> {
        self.buckets.iter().map(|(ts, values)| (*ts, values))
    }

    /// Number of timestamp buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Total number of stored values across all buckets
    pub fn value_count(&self) -> usize {
        self.buckets.iter().map(|(_, values)| values.len()).sum()
    }
}

impl Serialize for CounterValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.buckets.len()))?;
        for (timestamp, values) in &self.buckets {
            map.serialize_entry(timestamp, values)?;
        }
        map.end()
    }
}

/// Metrics for one sampled entity over one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsPayload {
    pub ems_id: u64,
    pub ems_ref: String,
    pub ems_klass: String,
    pub interval_name: String,
    pub start_range: DateTime<Utc>,
    /// `None` means the provider resolved the upper bound to "now"
    pub end_range: Option<DateTime<Utc>>,
    pub counters: BTreeMap<String, CounterDescriptor>,
    pub counter_values: CounterValues,
}

/// Map a provider entity type to the canonical entity kind
pub fn canonical_kind(provider_kind: &str) -> String {
    match provider_kind {
        "VirtualMachine" => "Vm",
        "HostSystem" => "Host",
        "ClusterComputeResource" => "EmsCluster",
        "Datastore" => "Storage",
        "ResourcePool" => "ResourcePool",
        other => other,
    }
    .to_string()
}

/// Name of a provider capture interval id
pub fn capture_interval_name(interval_id: i32) -> &'static str {
    match interval_id {
        20 => "realtime",
        _ => "hourly",
    }
}
