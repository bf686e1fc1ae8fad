//! Collector configuration
//!
//! Values come from an optional config file, overridden by `COLLECTOR_*`
//! environment variables (e.g. `COLLECTOR_EMS_HOSTNAME`).

use anyhow::{bail, Context, Result};
use collector_lib::{
    events::EventCatcherConfig, metrics::MetricsConfig, session::SessionConfig,
};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Collector configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Source system identifier stamped on every payload
    #[serde(default)]
    pub ems_id: u64,

    /// Management endpoint host (optionally `host:port`)
    #[serde(default)]
    pub ems_hostname: String,

    #[serde(default)]
    pub ems_user: String,

    #[serde(default)]
    pub ems_password: String,

    /// VI/JSON API release in the endpoint path
    #[serde(default = "default_api_release")]
    pub ems_api_release: String,

    /// Accept self-signed endpoint certificates
    #[serde(default = "default_insecure")]
    pub ems_insecure: bool,

    /// Base URL of the message broker's HTTP ingress
    #[serde(default)]
    pub publisher_endpoint: String,

    #[serde(default = "default_client_ref")]
    pub publisher_client_ref: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Pause between metrics runs in seconds
    #[serde(default = "default_collect_interval")]
    pub collect_interval_secs: u64,

    /// Targets per counter query
    #[serde(default = "default_perf_query_size")]
    pub perf_query_size: usize,

    /// Provider capture interval id
    #[serde(default = "default_capture_interval")]
    pub capture_interval: String,

    /// How far back the first metrics run reaches, in seconds
    #[serde(default = "default_initial_backfill")]
    pub initial_backfill_secs: u64,

    #[serde(default = "default_event_page_size")]
    pub event_page_size: u32,

    /// Server-side wait per event poll in seconds
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

fn default_api_release() -> String {
    "8.0.1.0".to_string()
}

fn default_insecure() -> bool {
    true
}

fn default_client_ref() -> String {
    collector_lib::publish::DEFAULT_CLIENT_REF.to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_collect_interval() -> u64 {
    60
}

fn default_perf_query_size() -> usize {
    250
}

fn default_capture_interval() -> String {
    "20".to_string()
}

fn default_initial_backfill() -> u64 {
    300
}

fn default_event_page_size() -> u32 {
    20
}

fn default_max_wait() -> u64 {
    60
}

fn default_reconnect_delay() -> u64 {
    10
}

impl CollectorConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("COLLECTOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.ems_hostname.is_empty() {
            bail!("ems_hostname is required");
        }
        if self.publisher_endpoint.is_empty() {
            bail!("publisher_endpoint is required");
        }
        if self.perf_query_size == 0 {
            bail!("perf_query_size must be at least 1");
        }
        self.capture_interval_id()?;
        Ok(())
    }

    pub fn capture_interval_id(&self) -> Result<i32> {
        self.capture_interval
            .trim()
            .parse()
            .with_context(|| format!("Invalid capture_interval: {}", self.capture_interval))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            host: self.ems_hostname.clone(),
            user: self.ems_user.clone(),
            password: self.ems_password.clone(),
            api_release: self.ems_api_release.clone(),
            insecure: self.ems_insecure,
            ..SessionConfig::default()
        }
    }

    pub fn event_catcher_config(&self) -> EventCatcherConfig {
        EventCatcherConfig {
            ems_id: self.ems_id,
            page_size: self.event_page_size,
            max_wait: Duration::from_secs(self.max_wait_secs),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
        }
    }

    pub fn metrics_config(&self) -> Result<MetricsConfig> {
        Ok(MetricsConfig {
            ems_id: self.ems_id,
            collect_interval: Duration::from_secs(self.collect_interval_secs),
            query_size: self.perf_query_size,
            capture_interval: self.capture_interval_id()?,
            initial_backfill: Duration::from_secs(self.initial_backfill_secs),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            ..MetricsConfig::default()
        })
    }
}
