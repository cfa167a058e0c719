//! Registry of subsystems attached to the endpoint.
//!
//! # Responsibilities
//! - Hold every subsystem registered at startup
//! - Merge their routes into the endpoint's router
//! - Run every shutdown hook exactly once, each on its own task
//!
//! # Design Decisions
//! - Registration needs `&mut self`; sharing the registry freezes it
//! - Hooks are fire-and-forget: a slow, failing or panicking hook never holds
//!   up another hook or the endpoint stop
//! - Outcomes are fanned in only for reporting

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::Router;
use tokio::task::{JoinHandle, JoinSet};

use crate::observability::metrics;

/// Error returned by a subsystem's shutdown hook.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Error type for registration.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("subsystem {0:?} is already registered")]
    Duplicate(String),
}

/// A subsystem attached to the endpoint.
///
/// `shutdown` must be idempotent and should not block indefinitely.
#[async_trait]
pub trait Subsystem: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Routes this subsystem serves on the endpoint.
    fn routes(&self) -> Router {
        Router::new()
    }

    /// Release the subsystem's own resources.
    async fn shutdown(&self) -> Result<(), HookError>;
}

/// How a single hook ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookStatus {
    Completed,
    Failed(String),
    Panicked(String),
}

impl HookStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, HookStatus::Completed)
    }

    fn label(&self) -> &'static str {
        match self {
            HookStatus::Completed => "completed",
            HookStatus::Failed(_) => "failed",
            HookStatus::Panicked(_) => "panicked",
        }
    }
}

/// Outcome of one subsystem's shutdown hook.
#[derive(Debug, Clone)]
pub struct HookOutcome {
    pub name: String,
    pub status: HookStatus,
    /// Time from `shutdown_all` to hook completion.
    pub elapsed: Duration,
}

/// Fan-in handle for hook outcomes.
///
/// Dropping the report does not cancel any hook.
#[derive(Debug)]
pub struct HookReport {
    collector: Option<JoinHandle<Vec<HookOutcome>>>,
}

impl HookReport {
    fn empty() -> Self {
        Self { collector: None }
    }

    /// Whether every hook has finished.
    pub fn is_finished(&self) -> bool {
        self.collector.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for every hook and return the outcomes in completion order.
    pub async fn collect(self) -> Vec<HookOutcome> {
        match self.collector {
            Some(collector) => collector.await.unwrap_or_default(),
            None => Vec::new(),
        }
    }
}

/// Holds the subsystems attached to the endpoint.
#[derive(Default)]
pub struct ServiceRegistry {
    services: Vec<Arc<dyn Subsystem>>,
    names: HashSet<String>,
    shutdown_started: AtomicBool,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a subsystem. Startup only.
    pub fn register(&mut self, service: Arc<dyn Subsystem>) -> Result<(), RegistryError> {
        let name = service.name().to_string();
        if !self.names.insert(name.clone()) {
            return Err(RegistryError::Duplicate(name));
        }
        tracing::info!(service = %name, "Subsystem registered");
        self.services.push(service);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|service| service.name())
    }

    /// Routes of every registered subsystem, merged.
    pub fn router(&self) -> Router {
        self.services
            .iter()
            .fold(Router::new(), |router, service| router.merge(service.routes()))
    }

    /// Invoke every shutdown hook, each on an independent task.
    ///
    /// Only the first call starts hooks; later calls return an empty report.
    pub fn shutdown_all(&self) -> HookReport {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Subsystem shutdown already started");
            return HookReport::empty();
        }

        let started = Instant::now();
        let mut watchers = JoinSet::new();

        for service in &self.services {
            let name = service.name().to_string();
            let service = Arc::clone(service);
            let hook = tokio::spawn(async move { service.shutdown().await });

            watchers.spawn(async move {
                let status = match hook.await {
                    Ok(Ok(())) => HookStatus::Completed,
                    Ok(Err(e)) => HookStatus::Failed(e.to_string()),
                    Err(e) => HookStatus::Panicked(e.to_string()),
                };
                let elapsed = started.elapsed();

                match &status {
                    HookStatus::Completed => {
                        tracing::info!(service = %name, elapsed_ms = elapsed.as_millis() as u64, "Subsystem shut down");
                    }
                    HookStatus::Failed(error) | HookStatus::Panicked(error) => {
                        tracing::warn!(service = %name, elapsed_ms = elapsed.as_millis() as u64, error = %error, "Subsystem shutdown hook failed");
                    }
                }
                metrics::record_hook_outcome(&name, status.label());

                HookOutcome {
                    name,
                    status,
                    elapsed,
                }
            });
        }

        tracing::info!(hooks = self.services.len(), "Subsystem shutdown hooks started");

        let collector = tokio::spawn(async move {
            let mut outcomes = Vec::new();
            while let Some(joined) = watchers.join_next().await {
                if let Ok(outcome) = joined {
                    outcomes.push(outcome);
                }
            }
            outcomes
        });

        HookReport {
            collector: Some(collector),
        }
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names().collect::<Vec<_>>())
            .field("shutdown_started", &self.shutdown_started.load(Ordering::SeqCst))
            .finish()
    }
}
