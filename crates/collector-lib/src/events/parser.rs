//! Raw event to canonical event mapping

use crate::models::{CanonicalEvent, EVENT_SOURCE};
use crate::session::RawEvent;

/// Type tag of task (operation) events
pub const TASK_EVENT_TYPE: &str = "TaskEvent";

/// Maps provider events for one source system
#[derive(Debug, Clone)]
pub struct EventParser {
    ems_id: u64,
}

impl EventParser {
    pub fn new(ems_id: u64) -> Self {
        Self { ems_id }
    }

    pub fn ems_id(&self) -> u64 {
        self.ems_id
    }

    /// Never fails; missing optional fields come out empty
    pub fn parse(&self, raw: &RawEvent) -> CanonicalEvent {
        let event_type = raw.type_name().unwrap_or_default().to_string();

        CanonicalEvent {
            ems_id: self.ems_id,
            is_task: event_type == TASK_EVENT_TYPE,
            event_type,
            chain_id: raw.chain_id(),
            source: EVENT_SOURCE.to_string(),
            message: raw.full_formatted_message().unwrap_or_default().to_string(),
            timestamp: raw.created_time(),
            username: raw.user_name().map(str::to_string),
            full_data: raw.0.clone(),
        }
    }
}
