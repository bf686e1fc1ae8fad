//! Outbound publishing of canonical payloads
//!
//! This module provides:
//! - the `Publisher` seam used by both collectors
//! - `HttpPublisher`, which posts envelopes to a broker's HTTP endpoint
//! - `ChannelPublisher`, which hands envelopes to an in-process channel
//!
//! Delivery is at-most-once: a failed publish is reported to the caller and
//! never buffered or retried here.

use crate::error::{CollectorError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

/// Default client reference sent with every envelope
pub const DEFAULT_CLIENT_REF: &str = "collector";

/// Destination of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Events,
    Metrics,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Events => "events",
            Topic::Metrics => "metrics",
        }
    }

    /// Message name understood by the consumers of this topic
    pub fn message(&self) -> &'static str {
        match self {
            Topic::Events => "event",
            Topic::Metrics => "save_metrics",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire envelope around a payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub service: String,
    pub message: String,
    pub client_ref: String,
    pub payload: Value,
}

impl Envelope {
    pub fn new(topic: Topic, client_ref: &str, payload: Value) -> Self {
        Self {
            service: topic.as_str().to_string(),
            message: topic.message().to_string(),
            client_ref: client_ref.to_string(),
            payload,
        }
    }
}

/// Accepts canonical payloads for delivery to the broker
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: Topic, payload: Value) -> Result<()>;
}

/// Posts envelopes as JSON to `{endpoint}/{topic}`
pub struct HttpPublisher {
    client: reqwest::Client,
    endpoint: Url,
    client_ref: String,
}

impl HttpPublisher {
    pub fn new(endpoint: &str, client_ref: impl Into<String>, timeout: Duration) -> Result<Self> {
        // Trailing slash so topic names join under the endpoint path
        let normalized = format!("{}/", endpoint.trim_end_matches('/'));
        let endpoint = Url::parse(&normalized).map_err(|e| CollectorError::Config {
            reason: format!("invalid publisher endpoint {}: {}", endpoint, e),
        })?;

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            client_ref: client_ref.into(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, topic: Topic, payload: Value) -> Result<()> {
        let url = self
            .endpoint
            .join(topic.as_str())
            .map_err(|e| CollectorError::publish(topic.as_str(), e.to_string()))?;
        let envelope = Envelope::new(topic, &self.client_ref, payload);

        let response = self
            .client
            .post(url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| CollectorError::publish(topic.as_str(), e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CollectorError::publish(
                topic.as_str(),
                format!("broker returned {}: {}", status, body),
            ));
        }

        debug!(topic = %topic, "Published payload");
        Ok(())
    }
}

/// Message handed to an in-process consumer
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: Topic,
    pub envelope: Envelope,
}

/// Publishes into a bounded channel (backpressure when the consumer lags)
pub struct ChannelPublisher {
    sender: mpsc::Sender<Published>,
    client_ref: String,
}

impl ChannelPublisher {
    pub fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Published>) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let publisher = Self {
            sender,
            client_ref: DEFAULT_CLIENT_REF.to_string(),
        };
        (publisher, receiver)
    }
}

#[async_trait]
impl Publisher for ChannelPublisher {
    async fn publish(&self, topic: Topic, payload: Value) -> Result<()> {
        let envelope = Envelope::new(topic, &self.client_ref, payload);

        self.sender
            .send(Published { topic, envelope })
            .await
            .map_err(|_| CollectorError::publish(topic.as_str(), "channel closed"))
    }
}
