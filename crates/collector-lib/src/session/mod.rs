//! Remote management session
//!
//! This module defines the seam between the collectors and the management
//! API:
//! - `RemoteSession`, the operations the collectors issue
//! - `Connector`, which opens a fresh authenticated session
//! - the provider record shapes exchanged over that seam
//!
//! `ViJsonSession` is the HTTPS implementation over the vSphere JSON API.

mod types;
mod vijson;

#[cfg(test)]
pub(crate) mod mock;

pub use types::{
    CounterSeries, ElementDescription, ObjectRef, ObjectUpdate, ObjectUpdateKind,
    PropertyChange, PropertyChangeOp, PropertyFilterUpdate, ProviderCounterInfo, QueryWindow,
    RawEvent, RawSample, SubscriptionCursor, UpdateSet,
};
pub use vijson::{SessionConfig, ViJsonConnector, ViJsonSession};

use crate::error::Result;
use crate::models::PerfCounterMetadata;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Operations issued against an authenticated management session
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Create a paged event history collector
    async fn create_event_collector(&self, page_size: u32) -> Result<ObjectRef>;

    /// Create a property filter on the collector's `latestPage` property
    async fn create_filter(&self, collector: &ObjectRef) -> Result<ObjectRef>;

    /// Block up to `max_wait` for property updates newer than `cursor`
    ///
    /// Returns `None` when the wait timed out with nothing to report.
    async fn wait_for_updates(
        &self,
        cursor: &SubscriptionCursor,
        max_wait: Duration,
    ) -> Result<Option<UpdateSet>>;

    /// Release a property filter
    async fn destroy_filter(&self, filter: &ObjectRef) -> Result<()>;

    /// List references to all powered-on virtual machines
    async fn list_powered_on_targets(&self) -> Result<Vec<ObjectRef>>;

    /// Run one counter query covering `counters` for every target
    async fn query_perf_counters(
        &self,
        counters: &[PerfCounterMetadata],
        targets: &[ObjectRef],
        window: &QueryWindow,
    ) -> Result<Vec<RawSample>>;

    /// Enumerate every counter the provider offers
    async fn list_counter_catalog(&self) -> Result<Vec<ProviderCounterInfo>>;

    /// Log out. Errors are reported but the session is unusable afterwards.
    async fn close(&self) -> Result<()>;
}

/// Opens new sessions, used by the collectors after every connection loss
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn RemoteSession>>;

    /// Host name used in diagnostics
    fn host(&self) -> &str;
}
