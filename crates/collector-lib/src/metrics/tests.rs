//! Integration tests for the metrics collector
//!
//! A mock session hands out a fixed target list, counter catalog and series
//! so batching, reshaping and the run loop can be checked end to end.

use super::*;
use crate::error::CollectorError;
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::publish::{ChannelPublisher, Published, Topic};
use crate::session::mock::{counter_info, MockConnector, MockSession};
use crate::session::{CounterSeries, ObjectRef};
use chrono::{TimeZone, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn targets(count: usize) -> Vec<ObjectRef> {
    (0..count)
        .map(|i| ObjectRef::new("VirtualMachine", format!("vm-{}", i)))
        .collect()
}

fn session(target_count: usize) -> MockSession {
    MockSession {
        targets: targets(target_count),
        catalog: vec![
            counter_info(2, "cpu", "usage", "rate", "average", "percent"),
            counter_info(24, "mem", "usage", "absolute", "average", "percent"),
        ],
        series: vec![
            CounterSeries {
                counter_id: 2,
                instance: String::new(),
                interval_id: 20,
                results: vec![1_714_564_800.0, 12.5, 1_714_564_820.0, 14.0],
            },
            CounterSeries {
                counter_id: 24,
                instance: String::new(),
                interval_id: 20,
                results: vec![1_714_564_800.0, 40.0],
            },
        ],
        ..Default::default()
    }
}

fn scheduler(
    publisher: ChannelPublisher,
    health: HealthRegistry,
    cancel: CancellationToken,
) -> MetricsScheduler {
    MetricsSchedulerBuilder::new()
        .ems_id(7)
        .collect_interval(Duration::from_millis(1))
        .reconnect_delay(Duration::from_millis(1))
        .publisher(Arc::new(publisher))
        .health(health)
        .cancel_token(cancel)
        .build()
        .unwrap()
}

/// Cancel once `count` messages have arrived, returning what was seen
fn cancel_after(
    count: usize,
    mut rx: mpsc::Receiver<Published>,
    cancel: CancellationToken,
) -> JoinHandle<Vec<Published>> {
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(published) = rx.recv().await {
            seen.push(published);
            if seen.len() == count {
                cancel.cancel();
                break;
            }
        }
        seen
    })
}

mod run_once_tests {
    use super::*;

    #[tokio::test]
    async fn test_targets_are_queried_in_batches() {
        let session = session(600);
        let (publisher, mut rx) = ChannelPublisher::new(4);
        let scheduler = scheduler(publisher, HealthRegistry::new(), CancellationToken::new());
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let summary = scheduler.run_once(&session, start).await.unwrap();

        assert_eq!(
            summary,
            RunSummary {
                targets: 600,
                batches: 3,
                payloads: 600,
                published: true,
            }
        );
        assert_eq!(session.query_sizes(), vec![250, 250, 100]);

        let published = rx.try_recv().unwrap();
        assert_eq!(published.topic, Topic::Metrics);
        assert_eq!(published.envelope.message, "save_metrics");
        assert_eq!(published.envelope.payload.as_array().unwrap().len(), 600);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_every_batch_uses_the_same_window() {
        let session = session(300);
        let (publisher, _rx) = ChannelPublisher::new(4);
        let scheduler = scheduler(publisher, HealthRegistry::new(), CancellationToken::new());
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        scheduler.run_once(&session, start).await.unwrap();

        let windows = session.windows_seen.lock().unwrap().clone();
        assert_eq!(windows.len(), 2);
        for window in windows {
            assert_eq!(window.interval_id, REALTIME_INTERVAL);
            assert_eq!(window.start_time, start);
            assert!(window.end_time.is_none());
        }
    }

    #[tokio::test]
    async fn test_payload_shape() {
        let session = session(1);
        let (publisher, mut rx) = ChannelPublisher::new(4);
        let scheduler = scheduler(publisher, HealthRegistry::new(), CancellationToken::new());
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        scheduler.run_once(&session, start).await.unwrap();

        let payload = &rx.try_recv().unwrap().envelope.payload[0];
        assert_eq!(payload["ems_id"], 7);
        assert_eq!(payload["ems_ref"], "vm-0");
        assert_eq!(payload["ems_klass"], "Vm");
        assert_eq!(payload["interval_name"], "realtime");
        assert_eq!(payload["end_range"], serde_json::Value::Null);
        assert_eq!(payload["counters"]["2_"]["counter_key"], "cpu_usage_rate_average");
        assert_eq!(payload["counter_values"]["1714564800"]["2_"], 12.5);
        assert_eq!(payload["counter_values"]["1714564800"]["24_"], 40.0);
        assert_eq!(payload["counter_values"]["1714564820"]["2_"], 14.0);
        assert!(payload["counter_values"]["1714564820"].get("24_").is_none());
    }

    #[tokio::test]
    async fn test_no_targets_publishes_empty_run() {
        let session = session(0);
        let (publisher, mut rx) = ChannelPublisher::new(4);
        let scheduler = scheduler(publisher, HealthRegistry::new(), CancellationToken::new());

        let summary = scheduler.run_once(&session, Utc::now()).await.unwrap();

        assert_eq!(summary.batches, 0);
        assert_eq!(summary.payloads, 0);
        assert!(session.query_sizes().is_empty());
        let published = rx.try_recv().unwrap();
        assert!(published.envelope.payload.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_failure_propagates() {
        let mut session = session(10);
        session.fail_queries = true;
        let (publisher, mut rx) = ChannelPublisher::new(4);
        let scheduler = scheduler(publisher, HealthRegistry::new(), CancellationToken::new());

        let err = scheduler.run_once(&session, Utc::now()).await.unwrap_err();

        assert!(err.is_connection_level());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejected_batch_is_skipped() {
        let session = session(600);
        session.fail_next_query(CollectorError::protocol("sample batch lacked entity"));
        let (publisher, mut rx) = ChannelPublisher::new(4);
        let scheduler = scheduler(publisher, HealthRegistry::new(), CancellationToken::new());

        let summary = scheduler.run_once(&session, Utc::now()).await.unwrap();

        assert_eq!(summary.targets, 600);
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.payloads, 350);
        assert!(summary.published);
        assert_eq!(session.query_sizes(), vec![250, 100]);
        let published = rx.try_recv().unwrap();
        assert_eq!(published.envelope.payload.as_array().unwrap().len(), 350);
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported_not_raised() {
        let session = session(3);
        let (publisher, rx) = ChannelPublisher::new(1);
        drop(rx);
        let health = HealthRegistry::new();
        let scheduler = scheduler(publisher, health.clone(), CancellationToken::new());

        let summary = scheduler.run_once(&session, Utc::now()).await.unwrap();

        assert!(!summary.published);
        assert_eq!(summary.payloads, 3);
        let health = health.health().await;
        assert_eq!(
            health.components[components::PUBLISHER].status,
            ComponentStatus::Degraded
        );
    }
}

mod loop_tests {
    use super::*;

    #[tokio::test]
    async fn test_first_run_reaches_back_five_minutes() {
        let (publisher, _rx) = ChannelPublisher::new(1);
        let scheduler = scheduler(publisher, HealthRegistry::new(), CancellationToken::new());

        let lag = Utc::now() - scheduler.next_start().await;
        assert!(lag >= chrono::Duration::seconds(299));
        assert!(lag < chrono::Duration::seconds(310));
    }

    #[tokio::test]
    async fn test_next_run_starts_after_previous() {
        let session = session(2);
        let cancel = CancellationToken::new();
        let (publisher, rx) = ChannelPublisher::new(4);
        let health = HealthRegistry::new();
        let scheduler = scheduler(publisher, health.clone(), cancel.clone());
        let watcher = cancel_after(2, rx, cancel);

        scheduler.run_session(&session).await.unwrap();

        assert_eq!(watcher.await.unwrap().len(), 2);
        let windows = session.windows_seen.lock().unwrap().clone();
        assert!(windows.len() >= 2);
        assert!(windows[1].start_time > windows[0].start_time);
        assert!(windows[1].start_time - windows[0].start_time >= chrono::Duration::seconds(299));
        let health = health.health().await;
        assert_eq!(
            health.components[components::METRICS_COLLECTOR].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_stopped_scheduler_does_not_sample() {
        let session = session(2);
        let (publisher, _rx) = ChannelPublisher::new(1);
        let scheduler = scheduler(publisher, HealthRegistry::new(), CancellationToken::new());

        scheduler.stop();
        scheduler.run_session(&session).await.unwrap();

        assert!(session.query_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_after_failed_session() {
        let mut broken = session(2);
        broken.fail_queries = true;
        let broken = Arc::new(broken);
        let healthy = Arc::new(session(2));
        let connector = MockConnector::new(vec![broken.clone(), healthy.clone()]);

        let cancel = CancellationToken::new();
        let (publisher, rx) = ChannelPublisher::new(4);
        let health = HealthRegistry::new();
        let scheduler = scheduler(publisher, health.clone(), cancel.clone());
        let watcher = cancel_after(1, rx, cancel);

        scheduler.run(&connector).await;

        assert_eq!(watcher.await.unwrap().len(), 1);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(broken.closed.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.closed.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.query_sizes()[0], 2);

        let health = health.health().await;
        assert_eq!(
            health.components[components::SESSION].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_protocol_mismatch_keeps_session() {
        let session = session(2);
        session.fail_next_query(CollectorError::protocol("sample batch lacked entity"));
        let session = Arc::new(session);
        let connector = MockConnector::new(vec![session.clone()]);

        let cancel = CancellationToken::new();
        let (publisher, rx) = ChannelPublisher::new(4);
        let scheduler = scheduler(publisher, HealthRegistry::new(), cancel.clone());
        let watcher = cancel_after(2, rx, cancel);

        scheduler.run(&connector).await;

        // The first run lost its only batch but was still published
        let seen = watcher.await.unwrap();
        assert!(seen[0].envelope.payload.as_array().unwrap().is_empty());
        assert_eq!(seen[1].envelope.payload.as_array().unwrap().len(), 2);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(session.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_run_is_retried_from_same_start() {
        let session = session(2);
        session.fail_next_listing(CollectorError::protocol("view lacked runtime.powerState"));
        let cancel = CancellationToken::new();
        let (publisher, rx) = ChannelPublisher::new(4);
        let health = HealthRegistry::new();
        let scheduler = scheduler(publisher, health.clone(), cancel.clone());
        let backfill_start = scheduler.next_start().await;
        let watcher = cancel_after(1, rx, cancel);

        scheduler.run_session(&session).await.unwrap();

        assert_eq!(watcher.await.unwrap().len(), 1);
        let windows = session.windows_seen.lock().unwrap().clone();
        assert_eq!(windows[0].start_time, backfill_start);
        assert_eq!(
            health.health().await.components[components::METRICS_COLLECTOR].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (publisher, _rx) = ChannelPublisher::new(1);
        let scheduler = scheduler(publisher, HealthRegistry::new(), CancellationToken::new());

        scheduler.stop();
        scheduler.stop();

        assert!(scheduler.is_stopped());
    }
}

mod builder_tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = MetricsConfig::default();
        assert_eq!(config.collect_interval, Duration::from_secs(60));
        assert_eq!(config.query_size, 250);
        assert_eq!(config.capture_interval, 20);
        assert_eq!(config.initial_backfill, Duration::from_secs(300));
        assert_eq!(config.counters.len(), METRIC_CAPTURE_COUNTERS.len());
    }

    #[test]
    fn test_builder_requires_publisher() {
        assert!(MetricsSchedulerBuilder::new().build().is_err());
    }

    #[test]
    fn test_builder_rejects_zero_query_size() {
        let (publisher, _rx) = ChannelPublisher::new(1);
        let result = MetricsSchedulerBuilder::new()
            .publisher(Arc::new(publisher))
            .query_size(0)
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_builder_overrides() {
        let (publisher, _rx) = ChannelPublisher::new(1);
        let scheduler = MetricsSchedulerBuilder::new()
            .publisher(Arc::new(publisher))
            .query_size(50)
            .capture_interval(300)
            .counters(["cpu_usage_rate_average"])
            .build()
            .unwrap();

        assert_eq!(scheduler.config().query_size, 50);
        assert_eq!(scheduler.config().capture_interval, 300);
        assert_eq!(scheduler.config().counters, vec!["cpu_usage_rate_average"]);
    }
}
