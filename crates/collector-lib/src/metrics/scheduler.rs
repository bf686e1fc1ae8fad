//! Metrics sampling loop
//!
//! Each run enumerates the powered-on VMs, resolves the counter catalog,
//! queries counters in fixed-size batches, reshapes every sample and
//! publishes the whole run as one message. The next run starts where the
//! last published one ended.

use super::{reshape, CounterCatalog, RunContext, METRIC_CAPTURE_COUNTERS};
use crate::error::{CollectorError, Result};
use crate::health::{components, HealthRegistry};
use crate::models::{capture_interval_name, MetricsPayload};
use crate::observability::{CollectorMetrics, StructuredLogger};
use crate::publish::{Publisher, Topic};
use crate::session::{Connector, ObjectRef, QueryWindow, RawSample, RemoteSession};
use crate::shutdown::sleep_unless_cancelled;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default number of targets per counter query
pub const DEFAULT_QUERY_SIZE: usize = 250;

/// Provider realtime sampling interval, in seconds
pub const REALTIME_INTERVAL: i32 = 20;

/// Configuration for the metrics scheduler
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Source system identifier stamped on every payload
    pub ems_id: u64,
    /// Pause between runs (default: 60 seconds)
    pub collect_interval: Duration,
    /// Targets per counter query (default: 250)
    pub query_size: usize,
    /// Provider capture interval id (default: 20)
    pub capture_interval: i32,
    /// How far back the first run reaches (default: 5 minutes)
    pub initial_backfill: Duration,
    /// Logical counter names to sample
    pub counters: Vec<String>,
    /// Pause before reconnecting after a lost session (default: 10 seconds)
    pub reconnect_delay: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            ems_id: 0,
            collect_interval: Duration::from_secs(60),
            query_size: DEFAULT_QUERY_SIZE,
            capture_interval: REALTIME_INTERVAL,
            initial_backfill: Duration::from_secs(300),
            counters: METRIC_CAPTURE_COUNTERS.iter().map(|c| c.to_string()).collect(),
            reconnect_delay: Duration::from_secs(10),
        }
    }
}

/// Outcome of one sampling run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub targets: usize,
    /// Batches the provider answered
    pub batches: usize,
    pub payloads: usize,
    pub published: bool,
}

/// Periodic counter sampler
pub struct MetricsScheduler {
    config: MetricsConfig,
    publisher: Arc<dyn Publisher>,
    health: HealthRegistry,
    metrics: CollectorMetrics,
    logger: StructuredLogger,
    cancel: CancellationToken,
    /// Lower bound of the next query window
    next_start: Mutex<DateTime<Utc>>,
}

impl MetricsScheduler {
    pub fn new(
        config: MetricsConfig,
        publisher: Arc<dyn Publisher>,
        health: HealthRegistry,
        cancel: CancellationToken,
    ) -> Self {
        let backfill = chrono::Duration::from_std(config.initial_backfill)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));

        Self {
            logger: StructuredLogger::new(config.ems_id),
            next_start: Mutex::new(Utc::now() - backfill),
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

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Lower bound the next run will query from
    pub async fn next_start(&self) -> DateTime<Utc> {
        *self.next_start.lock().await
    }

    /// Run until stopped, reconnecting after every lost session
    pub async fn run(&self, connector: &dyn Connector) {
        info!(
            ems_id = self.config.ems_id,
            host = %connector.host(),
            interval_secs = self.config.collect_interval.as_secs(),
            "Starting metrics collector"
        );

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

            let result = self.run_session(session.as_ref()).await;

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

        info!("Exiting metrics collector");
    }

    async fn session_lost(&self, host: &str, error: &str) {
        self.logger.log_session_lost(host, error);
        self.metrics.inc_reconnects(components::METRICS_COLLECTOR);
        self.health.set_unhealthy(components::SESSION, error).await;
        self.health
            .set_degraded(components::METRICS_COLLECTOR, error)
            .await;
    }

    /// Sample on one session until stopped or until a session-level error
    ///
    /// A run that fails for any other reason is skipped; the next run
    /// queries from the same start so no window is lost.
    pub async fn run_session(&self, session: &dyn RemoteSession) -> Result<()> {
        while !self.cancel.is_cancelled() {
            let start_time = self.next_start().await;
            match self.run_once(session, start_time).await {
                Ok(_) => {
                    *self.next_start.lock().await = Utc::now();
                    self.health.set_healthy(components::METRICS_COLLECTOR).await;
                }
                Err(e) if e.is_connection_level() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Sampling run failed, retrying next cycle");
                    self.metrics.inc_protocol_mismatches();
                    self.health
                        .set_degraded(components::METRICS_COLLECTOR, e.to_string())
                        .await;
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
            if !sleep_unless_cancelled(&self.cancel, self.config.collect_interval).await {
                break;
            }
        }

        Ok(())
    }

    /// One full sampling run starting at `start_time`
    ///
    /// A publish failure is logged and reported in the summary. A batch
    /// rejected for a non-connection reason is dropped from the run;
    /// connection-level errors propagate.
    pub async fn run_once(
        &self,
        session: &dyn RemoteSession,
        start_time: DateTime<Utc>,
    ) -> Result<RunSummary> {
        let started = Instant::now();

        let targets = session.list_powered_on_targets().await?;
        let catalog = CounterCatalog::resolve(session, self.config.counters.as_slice()).await?;
        debug!(
            targets = targets.len(),
            counters = catalog.len(),
            "Resolved sampling run inputs"
        );

        let window = QueryWindow {
            interval_id: self.config.capture_interval,
            start_time,
            end_time: None,
        };
        let (samples, batches) = self
            .query_batches(session, &catalog, &targets, &window)
            .await?;

        let ctx = RunContext {
            ems_id: self.config.ems_id,
            interval_name: capture_interval_name(self.config.capture_interval).to_string(),
            start_range: window.start_time,
            end_range: window.end_time,
        };
        let payloads: Vec<MetricsPayload> = samples
            .iter()
            .map(|sample| reshape(sample, &catalog, &ctx))
            .collect();

        let published = self.publish_payloads(&payloads).await;

        let elapsed = started.elapsed();
        self.metrics.observe_run_latency(elapsed.as_secs_f64());
        self.metrics.set_targets_sampled(targets.len() as i64);
        if published {
            self.logger
                .log_run_published(payloads.len(), elapsed.as_millis());
        }

        Ok(RunSummary {
            targets: targets.len(),
            batches,
            payloads: payloads.len(),
            published,
        })
    }

    async fn query_batches(
        &self,
        session: &dyn RemoteSession,
        catalog: &CounterCatalog,
        targets: &[ObjectRef],
        window: &QueryWindow,
    ) -> Result<(Vec<RawSample>, usize)> {
        let mut samples = Vec::with_capacity(targets.len());
        let mut batches = 0;

        for (index, batch) in targets.chunks(self.config.query_size.max(1)).enumerate() {
            let batch_samples = match session
                .query_perf_counters(catalog.counters(), batch, window)
                .await
            {
                Ok(batch_samples) => batch_samples,
                Err(e) if e.is_connection_level() => return Err(e),
                Err(e) => {
                    warn!(
                        batch = index,
                        targets = batch.len(),
                        error = %e,
                        "Skipping counter batch"
                    );
                    self.metrics.inc_protocol_mismatches();
                    continue;
                }
            };
            debug!(
                batch = index,
                targets = batch.len(),
                samples = batch_samples.len(),
                "Queried counter batch"
            );
            samples.extend(batch_samples);
            batches += 1;
        }

        Ok((samples, batches))
    }

    async fn publish_payloads(&self, payloads: &[MetricsPayload]) -> bool {
        let topic = Topic::Metrics;

        let result = match serde_json::to_value(payloads) {
            Ok(value) => self.publisher.publish(topic, value).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                self.metrics.inc_published(topic.as_str());
                self.health.set_healthy(components::PUBLISHER).await;
                true
            }
            Err(e) => {
                self.logger.log_publish_failed(topic.as_str(), &e.to_string());
                self.metrics.inc_publish_failures(topic.as_str());
                self.health
                    .set_degraded(components::PUBLISHER, e.to_string())
                    .await;
                false
            }
        }
    }
}

/// Builder for the metrics scheduler
pub struct MetricsSchedulerBuilder {
    config: MetricsConfig,
    publisher: Option<Arc<dyn Publisher>>,
    health: Option<HealthRegistry>,
    cancel: Option<CancellationToken>,
}

impl MetricsSchedulerBuilder {
    pub fn new() -> Self {
        Self {
            config: MetricsConfig::default(),
            publisher: None,
            health: None,
            cancel: None,
        }
    }

    /// Start from an existing configuration
    pub fn config(mut self, config: MetricsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ems_id(mut self, ems_id: u64) -> Self {
        self.config.ems_id = ems_id;
        self
    }

    pub fn collect_interval(mut self, interval: Duration) -> Self {
        self.config.collect_interval = interval;
        self
    }

    pub fn query_size(mut self, size: usize) -> Self {
        self.config.query_size = size;
        self
    }

    pub fn capture_interval(mut self, interval_id: i32) -> Self {
        self.config.capture_interval = interval_id;
        self
    }

    pub fn initial_backfill(mut self, backfill: Duration) -> Self {
        self.config.initial_backfill = backfill;
        self
    }

    pub fn counters<I, S>(mut self, counters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.counters = counters.into_iter().map(Into::into).collect();
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

    pub fn build(self) -> Result<MetricsScheduler> {
        let publisher = self.publisher.ok_or_else(|| CollectorError::Config {
            reason: "publisher is required".to_string(),
        })?;
        if self.config.query_size == 0 {
            return Err(CollectorError::Config {
                reason: "query_size must be at least 1".to_string(),
            });
        }

        Ok(MetricsScheduler::new(
            self.config,
            publisher,
            self.health.unwrap_or_default(),
            self.cancel.unwrap_or_default(),
        ))
    }
}

impl Default for MetricsSchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
