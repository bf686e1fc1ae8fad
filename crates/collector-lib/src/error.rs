//! Error types for the collectors
//!
//! Errors are split by how the owning loop must react: connection-level
//! failures tear down the session, everything else is recovered locally.

use thiserror::Error;

/// Result type alias for collector operations
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Main error type for the collectors
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Management endpoint unreachable or the session was dropped
    #[error("Connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    /// Credentials rejected by the management endpoint
    #[error("Authentication as {user} failed: {reason}")]
    Auth { user: String, reason: String },

    /// HTTP or IO failure while talking to a remote endpoint
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A remote response lacked a field the protocol requires
    #[error("Protocol mismatch: {reason}")]
    ProtocolMismatch { reason: String },

    /// A sampled counter id is not in the run's counter catalog
    #[error("Counter {counter_id} not present in the counter catalog")]
    UnknownCounter { counter_id: i32 },

    /// Outbound publish was rejected or could not be delivered
    #[error("Failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CollectorError {
    pub fn connection(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            host: host.into(),
            reason: reason.into(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::ProtocolMismatch {
            reason: reason.into(),
        }
    }

    pub fn publish(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Publish {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the session must be torn down and re-established
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            CollectorError::Connection { .. }
                | CollectorError::Auth { .. }
                | CollectorError::Transport(_)
        )
    }
}
