//! Collector library for virtualization management endpoints
//!
//! This crate provides the core functionality for:
//! - Streaming provider events through a cursor-based long-poll
//! - Periodic batched sampling of VM performance counters
//! - Publishing canonical payloads to a message broker
//! - Health checks and observability

pub mod error;
pub mod events;
pub mod health;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod publish;
pub mod session;
pub mod shutdown;

pub use error::{CollectorError, Result};
pub use events::{EventCatcher, EventCatcherBuilder, EventCatcherConfig};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use metrics::{MetricsConfig, MetricsScheduler, MetricsSchedulerBuilder};
pub use models::*;
pub use observability::{CollectorMetrics, StructuredLogger};
pub use publish::{ChannelPublisher, HttpPublisher, Publisher, Topic};
pub use session::{Connector, RemoteSession, SessionConfig, ViJsonConnector};
