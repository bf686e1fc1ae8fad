//! Incremental event subscription
//!
//! The management server pages new events through the mutable `latestPage`
//! property of an event history collector. A property filter on that
//! property plus a long-poll on the property collector gives an incremental
//! stream:
//! - every non-empty poll response advances the cursor, matching or not
//! - empty and irrelevant responses are normal steady-state traffic
//! - transport failures are returned to the caller, which starts over

use crate::error::Result;
use crate::session::{
    ObjectRef, ObjectUpdateKind, RawEvent, RemoteSession, SubscriptionCursor, UpdateSet,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Server-side wait per poll
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60);

/// Events per collector page
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Collector property the filter watches
pub const LATEST_PAGE: &str = "latestPage";

/// Server-side collector + property filter pair
#[derive(Debug, Clone, PartialEq)]
pub struct FilterHandle {
    pub collector: ObjectRef,
    pub filter: ObjectRef,
}

/// Result of one poll cycle
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The wait expired without updates
    Timeout,
    /// Updates arrived but none for this subscription's collector page
    Irrelevant,
    /// Events from the collector's latest page (possibly empty)
    Events(Vec<RawEvent>),
}

impl PollOutcome {
    pub fn into_events(self) -> Vec<RawEvent> {
        match self {
            PollOutcome::Events(events) => events,
            _ => Vec::new(),
        }
    }
}

/// Live subscription owning one filter handle and its cursor
pub struct EventSubscription {
    session: Arc<dyn RemoteSession>,
    handle: FilterHandle,
    cursor: SubscriptionCursor,
    max_wait: Duration,
}

impl EventSubscription {
    /// Create the collector and its filter; the cursor starts unset
    pub async fn open(
        session: Arc<dyn RemoteSession>,
        page_size: u32,
        max_wait: Duration,
    ) -> Result<Self> {
        let collector = session.create_event_collector(page_size).await?;
        let filter = session.create_filter(&collector).await?;

        debug!(collector = %collector, filter = %filter, "Opened event subscription");

        Ok(Self {
            session,
            handle: FilterHandle { collector, filter },
            cursor: SubscriptionCursor::unset(),
            max_wait,
        })
    }

    pub fn cursor(&self) -> &SubscriptionCursor {
        &self.cursor
    }

    pub fn handle(&self) -> &FilterHandle {
        &self.handle
    }

    /// Wait up to `max_wait` for the next batch of events
    pub async fn poll(&mut self) -> Result<PollOutcome> {
        let update_set = match self
            .session
            .wait_for_updates(&self.cursor, self.max_wait)
            .await?
        {
            Some(update_set) => update_set,
            None => return Ok(PollOutcome::Timeout),
        };

        self.cursor.advance(update_set.version.clone());

        Ok(extract_events(&update_set, &self.handle))
    }

    /// Release the server-side filter
    pub async fn close(self) -> Result<()> {
        debug!(filter = %self.handle.filter, "Destroying property filter");
        self.session.destroy_filter(&self.handle.filter).await
    }
}

/// Walk filter update → object update → property changes for `handle`
pub fn extract_events(update_set: &UpdateSet, handle: &FilterHandle) -> PollOutcome {
    let Some(filter_update) = update_set
        .filter_set
        .iter()
        .find(|update| update.filter == handle.filter)
    else {
        return PollOutcome::Irrelevant;
    };

    let Some(object_update) = filter_update
        .object_set
        .iter()
        .find(|update| update.obj == handle.collector)
    else {
        return PollOutcome::Irrelevant;
    };

    match object_update.kind {
        ObjectUpdateKind::Modify => {}
        ObjectUpdateKind::Enter | ObjectUpdateKind::Leave => return PollOutcome::Irrelevant,
    }

    let events = object_update
        .change_set
        .iter()
        .filter(|change| change.name.starts_with(LATEST_PAGE))
        .flat_map(|change| change.values())
        .map(RawEvent)
        .collect();

    PollOutcome::Events(events)
}
