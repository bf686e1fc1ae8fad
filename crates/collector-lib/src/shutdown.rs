//! Cooperative cancellation helpers
//!
//! Collectors check their `CancellationToken` only between blocking calls;
//! in-flight remote calls are never aborted.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleep for `duration` unless cancelled first
///
/// Returns `false` if the token was cancelled before the sleep completed.
pub async fn sleep_unless_cancelled(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
