//! Counter catalog resolution
//!
//! Maps the logical counter names the collector samples to the provider's
//! counter ids and metadata. Built fresh for every sampling run.

use crate::error::{CollectorError, Result};
use crate::models::PerfCounterMetadata;
use crate::session::{ProviderCounterInfo, RemoteSession};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Logical counters sampled for every powered-on VM
pub const METRIC_CAPTURE_COUNTERS: &[&str] = &[
    "cpu_usage_rate_average",
    "cpu_usagemhz_rate_average",
    "mem_usage_absolute_average",
    "disk_usage_rate_average",
    "net_usage_rate_average",
    "sys_uptime_absolute_latest",
    "cpu_ready_delta_summation",
    "cpu_system_delta_summation",
    "cpu_wait_delta_summation",
    "cpu_used_delta_summation",
    "mem_vmmemctl_absolute_average",
    "mem_vmmemctltarget_absolute_average",
    "mem_swapin_absolute_average",
    "mem_swapout_absolute_average",
    "mem_swapped_absolute_average",
    "mem_swaptarget_absolute_average",
    "disk_devicelatency_absolute_average",
    "disk_kernellatency_absolute_average",
    "disk_queuelatency_absolute_average",
];

/// Display precision hint for a unit key
pub fn precision_for_unit(unit_key: &str) -> f64 {
    if unit_key == "percent" {
        0.1
    } else {
        1.0
    }
}

/// Resolved counters for one sampling run, in requested order
#[derive(Debug, Clone, Default)]
pub struct CounterCatalog {
    counters: Vec<PerfCounterMetadata>,
    by_id: HashMap<i32, usize>,
}

impl CounterCatalog {
    /// Fetch the provider catalog and keep the requested logical names
    pub async fn resolve<S: AsRef<str>>(
        session: &dyn RemoteSession,
        logical_names: &[S],
    ) -> Result<Self> {
        let provider = session.list_counter_catalog().await?;
        debug!(provider_counters = provider.len(), "Fetched counter catalog");
        Ok(Self::from_provider(&provider, logical_names))
    }

    /// Build from an already fetched provider catalog
    ///
    /// Logical names the provider does not offer are logged and omitted.
    pub fn from_provider<S: AsRef<str>>(
        provider: &[ProviderCounterInfo],
        logical_names: &[S],
    ) -> Self {
        let mut by_name: HashMap<String, &ProviderCounterInfo> = HashMap::new();
        for info in provider {
            by_name.entry(info.logical_name()).or_insert(info);
        }

        let mut catalog = Self::default();
        for name in logical_names {
            let name = name.as_ref();
            match by_name.get(name) {
                Some(info) => catalog.push(PerfCounterMetadata {
                    counter_id: info.key,
                    counter_key: name.to_string(),
                    rollup_type: info.rollup_type.clone(),
                    unit_key: info.unit_info.key.clone(),
                    precision: precision_for_unit(&info.unit_info.key),
                }),
                None => warn!(counter = %name, "Counter not offered by provider, skipping"),
            }
        }

        catalog
    }

    fn push(&mut self, metadata: PerfCounterMetadata) {
        if self.by_id.contains_key(&metadata.counter_id) {
            return;
        }
        self.by_id.insert(metadata.counter_id, self.counters.len());
        self.counters.push(metadata);
    }

    pub fn counters(&self) -> &[PerfCounterMetadata] {
        &self.counters
    }

    pub fn by_id(&self, counter_id: i32) -> Option<&PerfCounterMetadata> {
        self.by_id.get(&counter_id).map(|&slot| &self.counters[slot])
    }

    /// Like `by_id`, but a miss is an `UnknownCounter` error
    pub fn lookup(&self, counter_id: i32) -> Result<&PerfCounterMetadata> {
        self.by_id(counter_id)
            .ok_or(CollectorError::UnknownCounter { counter_id })
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}
