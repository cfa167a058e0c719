//! Overall serving status.
//!
//! # States
//! - Unknown: endpoint not yet accepting requests
//! - Serving: endpoint accepting requests
//! - NotServing: shutdown initiated
//!
//! # State Transitions
//! ```text
//! Unknown → Serving: endpoint begins serving
//! Serving → NotServing: shutdown initiation
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::observability::metrics;

/// Overall serving status reported to pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServingStatus {
    Unknown,
    Serving,
    NotServing,
}

impl ServingStatus {
    pub fn is_serving(&self) -> bool {
        matches!(self, ServingStatus::Serving)
    }
}

/// Shared handle to the overall serving flag. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct HealthReporter {
    tx: Arc<watch::Sender<ServingStatus>>,
}

impl HealthReporter {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ServingStatus::Unknown);
        Self { tx: Arc::new(tx) }
    }

    pub fn set_serving(&self) {
        self.set(ServingStatus::Serving);
    }

    pub fn set_not_serving(&self) {
        self.set(ServingStatus::NotServing);
    }

    pub fn status(&self) -> ServingStatus {
        *self.tx.borrow()
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<ServingStatus> {
        self.tx.subscribe()
    }

    fn set(&self, status: ServingStatus) {
        let previous = self.tx.send_replace(status);
        if previous != status {
            tracing::info!(from = ?previous, to = ?status, "Serving status changed");
            metrics::set_serving(status.is_serving());
        }
    }
}

impl Default for HealthReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unknown_and_flips() {
        let health = HealthReporter::new();
        assert_eq!(health.status(), ServingStatus::Unknown);

        health.set_serving();
        assert!(health.status().is_serving());

        let observer = health.clone();
        health.set_not_serving();
        assert_eq!(observer.status(), ServingStatus::NotServing);
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let health = HealthReporter::new();
        let mut rx = health.subscribe();

        health.set_serving();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ServingStatus::Serving);
    }

    #[test]
    fn serializes_like_grpc_health() {
        let json = serde_json::to_string(&ServingStatus::NotServing).unwrap();
        assert_eq!(json, "\"NOT_SERVING\"");
    }
}
