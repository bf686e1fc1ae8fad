//! Event catcher loop
//!
//! Owns the outer connect/subscribe/stream cycle. Every exit from a
//! subscription (stop, error, lost session) destroys its property filter and
//! logs the session out; a lost session is re-established from scratch with
//! a fresh subscription and an unset cursor.

use super::{EventParser, EventSubscription, PollOutcome, DEFAULT_MAX_WAIT, DEFAULT_PAGE_SIZE};
use crate::error::{CollectorError, Result};
use crate::health::{components, HealthRegistry};
use crate::observability::{CollectorMetrics, StructuredLogger};
use crate::publish::{Publisher, Topic};
use crate::session::{Connector, RawEvent, RemoteSession};
use crate::shutdown::sleep_unless_cancelled;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Configuration for the event catcher
#[derive(Debug, Clone)]
pub struct EventCatcherConfig {
    /// Source system identifier stamped on every event
    pub ems_id: u64,
    /// Events per collector page (default: 20)
    pub page_size: u32,
    /// Server-side wait per poll (default: 60 seconds)
    pub max_wait: Duration,
    /// Pause before reconnecting after a lost session, or before retrying
    /// a malformed update (default: 10 seconds)
    pub reconnect_delay: Duration,
}

impl Default for EventCatcherConfig {
    fn default() -> Self {
        Self {
            ems_id: 0,
            page_size: DEFAULT_PAGE_SIZE,
            max_wait: DEFAULT_MAX_WAIT,
            reconnect_delay: Duration::from_secs(10),
        }
    }
}

/// Streams provider events to the publisher until stopped
pub struct EventCatcher {
    config: EventCatcherConfig,
    parser: EventParser,
    publisher: Arc<dyn Publisher>,
    health: HealthRegistry,
    metrics: CollectorMetrics,
    logger: StructuredLogger,
    cancel: CancellationToken,
}

impl EventCatcher {
    pub fn new(
        config: EventCatcherConfig,
        publisher: Arc<dyn Publisher>,
        health: HealthRegistry,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            parser: EventParser::new(config.ems_id),
            logger: StructuredLogger::new(config.ems_id),
            config,
            publisher,
            health,
            metrics: CollectorMetrics::new(),
            cancel,
        }
    }

    /// Request a graceful stop. Idempotent.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!("Exit request received");
        }
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run until stopped, reconnecting after every lost session
    pub async fn run(&self, connector: &dyn Connector) {
        info!(ems_id = self.config.ems_id, host = %connector.host(), "Starting event catcher");

        while !self.cancel.is_cancelled() {
            let session = match connector.connect().await {
                Ok(session) => session,
                Err(e) => {
                    self.session_lost(connector.host(), &e.to_string()).await;
                    if !sleep_unless_cancelled(&self.cancel, self.config.reconnect_delay).await {
                        break;
                    }
                    continue;
                }
            };

            self.logger.log_session_connected(connector.host());
            self.health.set_healthy(components::SESSION).await;

            let result = self.monitor_events(Arc::clone(&session)).await;

            if let Err(e) = session.close().await {
                warn!(error = %e, "Failed to log out of management session");
            }

            if let Err(e) = result {
                self.session_lost(connector.host(), &e.to_string()).await;
                if !sleep_unless_cancelled(&self.cancel, self.config.reconnect_delay).await {
                    break;
                }
            }
        }

        info!("Exiting event catcher");
    }

    async fn session_lost(&self, host: &str, error: &str) {
        self.logger.log_session_lost(host, error);
        self.metrics.inc_reconnects(components::EVENT_CATCHER);
        self.health.set_unhealthy(components::SESSION, error).await;
        self.health
            .set_degraded(components::EVENT_CATCHER, error)
            .await;
    }

    /// Open a subscription, stream it, and always release its filter
    async fn monitor_events(&self, session: Arc<dyn RemoteSession>) -> Result<()> {
        let mut subscription =
            EventSubscription::open(session, self.config.page_size, self.config.max_wait).await?;

        let result = self.stream_events(&mut subscription).await;

        if let Err(e) = subscription.close().await {
            warn!(error = %e, "Failed to destroy property filter");
        }

        result
    }

    /// Poll until stopped; only connection-level errors end the stream
    async fn stream_events(&self, subscription: &mut EventSubscription) -> Result<()> {
        while !self.cancel.is_cancelled() {
            let outcome = match subscription.poll().await {
                Ok(outcome) => outcome,
                Err(e) if e.is_connection_level() => return Err(e),
                Err(e) => {
                    // Cursor is unchanged, so the next poll retries the same update
                    warn!(error = %e, "Skipping malformed update");
                    self.metrics.inc_protocol_mismatches();
                    self.health
                        .set_degraded(components::EVENT_CATCHER, e.to_string())
                        .await;
                    if !sleep_unless_cancelled(&self.cancel, self.config.reconnect_delay).await {
                        break;
                    }
                    continue;
                }
            };
            self.health.set_healthy(components::EVENT_CATCHER).await;

            match outcome {
                PollOutcome::Timeout => self.metrics.inc_poll("timeout"),
                PollOutcome::Irrelevant => self.metrics.inc_poll("irrelevant"),
                PollOutcome::Events(raw_events) => {
                    self.metrics.inc_poll("events");
                    if !raw_events.is_empty() {
                        self.publish_events(&raw_events).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn publish_events(&self, raw_events: &[RawEvent]) {
        let events: Vec<_> = raw_events
            .iter()
            .map(|raw| self.parser.parse(raw))
            .collect();

        for event in &events {
            info!(event_type = %event.event_type, message = %event.message, "event");
        }
        self.metrics.add_events_collected(events.len());

        let payload = match serde_json::to_value(&events) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to serialize events");
                return;
            }
        };

        match self.publisher.publish(Topic::Events, payload).await {
            Ok(()) => {
                self.metrics.inc_published(Topic::Events.as_str());
                self.health.set_healthy(components::PUBLISHER).await;
            }
            Err(e) => {
                self.logger
                    .log_publish_failed(Topic::Events.as_str(), &e.to_string());
                self.metrics.inc_publish_failures(Topic::Events.as_str());
                self.health
                    .set_degraded(components::PUBLISHER, e.to_string())
                    .await;
            }
        }
    }
}

/// Builder for the event catcher
pub struct EventCatcherBuilder {
    config: EventCatcherConfig,
    publisher: Option<Arc<dyn Publisher>>,
    health: Option<HealthRegistry>,
    cancel: Option<CancellationToken>,
}

impl EventCatcherBuilder {
    pub fn new() -> Self {
        Self {
            config: EventCatcherConfig::default(),
            publisher: None,
            health: None,
            cancel: None,
        }
    }

    pub fn ems_id(mut self, ems_id: u64) -> Self {
        self.config.ems_id = ems_id;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.config.page_size = page_size;
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.config.max_wait = max_wait;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Share a cancellation token with the caller
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Result<EventCatcher> {
        let publisher = self
            .publisher
            .ok_or_else(|| CollectorError::Config {
                reason: "publisher is required".to_string(),
            })?;

        Ok(EventCatcher::new(
            self.config,
            publisher,
            self.health.unwrap_or_default(),
            self.cancel.unwrap_or_default(),
        ))
    }
}

impl Default for EventCatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
