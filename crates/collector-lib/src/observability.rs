//! Observability infrastructure for the collectors
//!
//! Provides:
//! - Prometheus metrics (poll outcomes, run latency, publish results, reconnects)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for sampling run latency (in seconds)
const RUN_LATENCY_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<CollectorMetricsInner> = OnceLock::new();

struct CollectorMetricsInner {
    events_collected: IntCounter,
    polls: IntCounterVec,
    run_latency_seconds: Histogram,
    payloads_published: IntCounterVec,
    publish_failures: IntCounterVec,
    reconnects: IntCounterVec,
    protocol_mismatches: IntCounter,
    targets_sampled: IntGauge,
}

impl CollectorMetricsInner {
    fn new() -> Self {
        Self {
            events_collected: register_int_counter!(
                "ems_collector_events_collected_total",
                "Total number of provider events parsed"
            )
            .expect("Failed to register events_collected"),

            polls: register_int_counter_vec!(
                "ems_collector_polls_total",
                "Wait-for-updates calls by outcome",
                &["outcome"]
            )
            .expect("Failed to register polls"),

            run_latency_seconds: register_histogram!(
                "ems_collector_run_latency_seconds",
                "Time spent on one metrics sampling run",
                RUN_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register run_latency_seconds"),

            payloads_published: register_int_counter_vec!(
                "ems_collector_payloads_published_total",
                "Payload messages accepted by the publisher",
                &["topic"]
            )
            .expect("Failed to register payloads_published"),

            publish_failures: register_int_counter_vec!(
                "ems_collector_publish_failures_total",
                "Payload messages the publisher rejected",
                &["topic"]
            )
            .expect("Failed to register publish_failures"),

            reconnects: register_int_counter_vec!(
                "ems_collector_reconnects_total",
                "Session teardowns followed by a reconnect",
                &["collector"]
            )
            .expect("Failed to register reconnects"),

            protocol_mismatches: register_int_counter!(
                "ems_collector_protocol_mismatches_total",
                "Skipped items that lacked an expected field or counter"
            )
            .expect("Failed to register protocol_mismatches"),

            targets_sampled: register_int_gauge!(
                "ems_collector_targets_sampled",
                "Entities covered by the last sampling run"
            )
            .expect("Failed to register targets_sampled"),
        }
    }
}

/// Collector metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct CollectorMetrics {
    _private: (),
}

impl Default for CollectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(CollectorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &CollectorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn add_events_collected(&self, count: usize) {
        self.inner().events_collected.inc_by(count as u64);
    }

    /// Record a poll outcome: "timeout", "irrelevant" or "events"
    pub fn inc_poll(&self, outcome: &str) {
        self.inner().polls.with_label_values(&[outcome]).inc();
    }

    pub fn observe_run_latency(&self, duration_secs: f64) {
        self.inner().run_latency_seconds.observe(duration_secs);
    }

    pub fn inc_published(&self, topic: &str) {
        self.inner()
            .payloads_published
            .with_label_values(&[topic])
            .inc();
    }

    pub fn inc_publish_failures(&self, topic: &str) {
        self.inner().publish_failures.with_label_values(&[topic]).inc();
    }

    pub fn inc_reconnects(&self, collector: &str) {
        self.inner().reconnects.with_label_values(&[collector]).inc();
    }

    pub fn inc_protocol_mismatches(&self) {
        self.inner().protocol_mismatches.inc();
    }

    pub fn set_targets_sampled(&self, count: i64) {
        self.inner().targets_sampled.set(count);
    }
}

/// Structured logger for collector lifecycle records
#[derive(Clone)]
pub struct StructuredLogger {
    ems_id: u64,
}

impl StructuredLogger {
    pub fn new(ems_id: u64) -> Self {
        Self { ems_id }
    }

    pub fn log_startup(&self, collector: &str, version: &str) {
        info!(
            event = "collector_started",
            ems_id = self.ems_id,
            collector = %collector,
            version = %version,
            "Collector started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "collector_shutdown",
            ems_id = self.ems_id,
            reason = %reason,
            "Collector shutting down"
        );
    }

    pub fn log_session_connected(&self, host: &str) {
        info!(
            event = "session_connected",
            ems_id = self.ems_id,
            host = %host,
            "Management session established"
        );
    }

    pub fn log_session_lost(&self, host: &str, error: &str) {
        warn!(
            event = "session_lost",
            ems_id = self.ems_id,
            host = %host,
            error = %error,
            "Management session lost, reconnecting"
        );
    }

    pub fn log_run_published(&self, payloads: usize, elapsed_ms: u128) {
        info!(
            event = "run_published",
            ems_id = self.ems_id,
            payloads = payloads,
            elapsed_ms = elapsed_ms,
            "Sampling run published"
        );
    }

    pub fn log_publish_failed(&self, topic: &str, error: &str) {
        warn!(
            event = "publish_failed",
            ems_id = self.ems_id,
            topic = %topic,
            error = %error,
            "Publish failed, payload dropped"
        );
    }
}
