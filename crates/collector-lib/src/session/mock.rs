//! Scripted in-memory session for tests

use super::{
    Connector, CounterSeries, ElementDescription, ObjectRef, ProviderCounterInfo, QueryWindow,
    RawSample, RemoteSession, SubscriptionCursor, UpdateSet,
};
use crate::error::{CollectorError, Result};
use crate::models::PerfCounterMetadata;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) const COLLECTOR_ID: &str = "session[52f3]collector-1";
pub(crate) const FILTER_ID: &str = "session[52f3]filter-1";

pub(crate) fn collector_ref() -> ObjectRef {
    ObjectRef::new("EventHistoryCollector", COLLECTOR_ID)
}

pub(crate) fn filter_ref() -> ObjectRef {
    ObjectRef::new("PropertyFilter", FILTER_ID)
}

pub(crate) fn counter_info(
    key: i32,
    group: &str,
    name: &str,
    stats: &str,
    rollup: &str,
    unit: &str,
) -> ProviderCounterInfo {
    ProviderCounterInfo {
        key,
        name_info: ElementDescription { key: name.to_string() },
        group_info: ElementDescription { key: group.to_string() },
        unit_info: ElementDescription { key: unit.to_string() },
        rollup_type: rollup.to_string(),
        stats_type: stats.to_string(),
    }
}

#[derive(Default)]
pub(crate) struct MockSession {
    /// Replayed in order by `wait_for_updates`
    pub responses: Mutex<VecDeque<Result<Option<UpdateSet>>>>,
    /// Cursor passed to every `wait_for_updates` call
    pub cursors_seen: Mutex<Vec<SubscriptionCursor>>,
    pub destroyed_filters: Mutex<Vec<ObjectRef>>,
    pub closed: AtomicUsize,
    pub targets: Vec<ObjectRef>,
    pub catalog: Vec<ProviderCounterInfo>,
    /// Series returned for every queried target
    pub series: Vec<CounterSeries>,
    /// Target count of every issued counter query
    pub query_sizes: Mutex<Vec<usize>>,
    pub windows_seen: Mutex<Vec<QueryWindow>>,
    /// Cancelled when the scripted responses run out
    pub on_exhausted: Option<CancellationToken>,
    pub fail_queries: bool,
    /// Returned by the next target listings, one per call
    pub target_errors: Mutex<VecDeque<CollectorError>>,
    /// Returned by the next counter queries, one per call
    pub query_errors: Mutex<VecDeque<CollectorError>>,
}

impl MockSession {
    pub fn with_responses(responses: Vec<Result<Option<UpdateSet>>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    pub fn destroyed(&self) -> Vec<ObjectRef> {
        self.destroyed_filters.lock().unwrap().clone()
    }

    pub fn query_sizes(&self) -> Vec<usize> {
        self.query_sizes.lock().unwrap().clone()
    }

    pub fn fail_next_listing(&self, error: CollectorError) {
        self.target_errors.lock().unwrap().push_back(error);
    }

    pub fn fail_next_query(&self, error: CollectorError) {
        self.query_errors.lock().unwrap().push_back(error);
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn create_event_collector(&self, _page_size: u32) -> Result<ObjectRef> {
        Ok(collector_ref())
    }

    async fn create_filter(&self, _collector: &ObjectRef) -> Result<ObjectRef> {
        Ok(filter_ref())
    }

    async fn wait_for_updates(
        &self,
        cursor: &SubscriptionCursor,
        _max_wait: Duration,
    ) -> Result<Option<UpdateSet>> {
        self.cursors_seen.lock().unwrap().push(cursor.clone());

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(response) => response,
            None => {
                if let Some(token) = &self.on_exhausted {
                    token.cancel();
                }
                Ok(None)
            }
        }
    }

    async fn destroy_filter(&self, filter: &ObjectRef) -> Result<()> {
        self.destroyed_filters.lock().unwrap().push(filter.clone());
        Ok(())
    }

    async fn list_powered_on_targets(&self) -> Result<Vec<ObjectRef>> {
        let scripted = self.target_errors.lock().unwrap().pop_front();
        if let Some(error) = scripted {
            return Err(error);
        }
        Ok(self.targets.clone())
    }

    async fn query_perf_counters(
        &self,
        _counters: &[PerfCounterMetadata],
        targets: &[ObjectRef],
        window: &QueryWindow,
    ) -> Result<Vec<RawSample>> {
        if self.fail_queries {
            return Err(CollectorError::connection("mock", "query failed"));
        }
        let scripted = self.query_errors.lock().unwrap().pop_front();
        if let Some(error) = scripted {
            return Err(error);
        }

        self.query_sizes.lock().unwrap().push(targets.len());
        self.windows_seen.lock().unwrap().push(window.clone());

        Ok(targets
            .iter()
            .map(|target| RawSample {
                entity: target.clone(),
                series: self.series.clone(),
            })
            .collect())
    }

    async fn list_counter_catalog(&self) -> Result<Vec<ProviderCounterInfo>> {
        Ok(self.catalog.clone())
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out pre-built sessions, one per `connect`
pub(crate) struct MockConnector {
    pub sessions: Mutex<VecDeque<Arc<MockSession>>>,
    pub connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(sessions: Vec<Arc<MockSession>>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            connects: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Arc<dyn RemoteSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let session = self.sessions.lock().unwrap().pop_front();
        match session {
            Some(session) => Ok(session),
            None => Err(CollectorError::connection("mock", "no more sessions")),
        }
    }

    fn host(&self) -> &str {
        "mock"
    }
}
