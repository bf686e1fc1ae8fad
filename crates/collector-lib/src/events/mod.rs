//! Event catcher
//!
//! This module provides:
//! - `EventSubscription`, the cursor-based long-poll over the collector's
//!   latest event page
//! - `EventParser`, mapping provider events to canonical events
//! - `EventCatcher`, the reconnecting loop that publishes parsed batches

mod catcher;
mod parser;
mod subscription;


pub use catcher::{EventCatcher, EventCatcherBuilder, EventCatcherConfig};
pub use parser::{EventParser, TASK_EVENT_TYPE};
pub use subscription::{
    extract_events, EventSubscription, FilterHandle, PollOutcome, DEFAULT_MAX_WAIT,
    DEFAULT_PAGE_SIZE, LATEST_PAGE,
};
