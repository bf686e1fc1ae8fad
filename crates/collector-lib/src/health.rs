//! Health tracking for the collectors
//!
//! Each component (the management session, the running collector and the
//! publisher) reports its own status; the overall status is the worst one.
//! Readiness additionally requires the process to have finished startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Component status, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still working, but the last operation failed (e.g. a dropped payload)
    Degraded,
    /// Not working until recovered (e.g. no management session)
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

/// Last reported state of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the component last changed status
    pub since: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            since: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of the liveness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    fn from_components(components: BTreeMap<String, ComponentHealth>) -> Self {
        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        Self { status, components }
    }
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const SESSION: &str = "session";
    pub const EVENT_CATCHER: &str = "event_catcher";
    pub const METRICS_COLLECTOR: &str = "metrics_collector";
    pub const PUBLISHER: &str = "publisher";
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<String, ComponentHealth>,
    started: bool,
}

/// Shared, cloneable component health registry
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a component as healthy
    pub async fn register(&self, name: &str) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    /// Record a component report
    ///
    /// Repeating the current status only refreshes the message; `since`
    /// moves on status changes, which are also logged.
    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut state = self.state.write().await;

        match state.components.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get_mut();
                if current.status == health.status {
                    current.message = health.message;
                } else {
                    log_transition(name, current.status, &health);
                    *current = health;
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(health);
            }
        }
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Mark startup as finished (or not)
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.started = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        HealthResponse::from_components(components)
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        if !state.started {
            return ReadinessResponse {
                ready: false,
                reason: Some("Collector not yet initialized".to_string()),
            };
        }

        let failing = state
            .components
            .iter()
            .find(|(_, c)| c.status == ComponentStatus::Unhealthy);

        match failing {
            Some((name, component)) => ReadinessResponse {
                ready: false,
                reason: Some(match &component.message {
                    Some(message) => format!("{} unhealthy: {}", name, message),
                    None => format!("{} unhealthy", name),
                }),
            },
            None => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }
}

fn log_transition(name: &str, from: ComponentStatus, to: &ComponentHealth) {
    let message = to.message.as_deref().unwrap_or("");
    if to.status > from {
        warn!(
            component = %name,
            ?from,
            to = ?to.status,
            message = %message,
            "Component health worsened"
        );
    } else {
        info!(component = %name, ?from, to = ?to.status, "Component health recovered");
    }
}
