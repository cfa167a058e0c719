//! Shutdown coordination for the agent.
//!
//! # State Machine
//! ```text
//! Running ──signal──▶ Stopping ──graceful stop done──▶ StoppedGraceful
//!                        │
//!                        └──────deadline elapsed──────▶ StoppedForced
//! ```
//!
//! On entry to `Stopping` the endpoint's graceful stop and the subsystem
//! hooks start concurrently, along with the deadline timer. Only the
//! endpoint's graceful stop is raced against the deadline; hooks are
//! best-effort and never gate the transition.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::health::HealthReporter;
use crate::lifecycle::registry::{HookOutcome, HookReport, ServiceRegistry};
use crate::observability::metrics;

/// Default time budget for a graceful stop.
pub const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Stop operations the coordinator drives.
#[async_trait]
pub trait Stoppable: Send + Sync + 'static {
    /// Drain in-flight work, then release resources. May take unbounded time.
    async fn graceful_stop(&self);

    /// Abort in-flight work and release resources. Must complete quickly,
    /// including while `graceful_stop` is still running.
    async fn forced_stop(&self);
}

/// Fixed time budget after which a graceful stop is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownDeadline(Duration);

impl ShutdownDeadline {
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn duration(&self) -> Duration {
        self.0
    }
}

impl Default for ShutdownDeadline {
    fn default() -> Self {
        Self(DEFAULT_SHUTDOWN_DEADLINE)
    }
}

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Stopping,
    StoppedGraceful,
    StoppedForced,
}

impl ShutdownState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ShutdownState::StoppedGraceful | ShutdownState::StoppedForced)
    }
}

/// Result of a completed shutdown.
#[derive(Debug)]
pub struct ShutdownOutcome {
    /// Terminal state reached.
    pub state: ShutdownState,
    /// Time from shutdown initiation to the terminal state.
    pub elapsed: Duration,
    /// Subsystem hook outcomes, possibly still arriving.
    pub hooks: HookReport,
    /// Instant the deadline expires, measured from shutdown initiation.
    hooks_deadline: tokio::time::Instant,
}

impl ShutdownOutcome {
    /// Wait for hooks that are still running, but not past the deadline.
    ///
    /// Hooks still running at the deadline are abandoned and reported as `None`.
    pub async fn settle(self) -> SettledShutdown {
        let hooks = match tokio::time::timeout_at(self.hooks_deadline, self.hooks.collect()).await {
            Ok(outcomes) => {
                tracing::info!(hooks = outcomes.len(), "Subsystem shutdown hooks finished");
                Some(outcomes)
            }
            Err(_) => {
                tracing::warn!("Abandoning subsystem shutdown hooks still running at deadline");
                None
            }
        };

        SettledShutdown {
            state: self.state,
            elapsed: self.elapsed,
            hooks,
        }
    }
}

/// Shutdown result once hooks have finished or been abandoned.
#[derive(Debug)]
pub struct SettledShutdown {
    pub state: ShutdownState,
    /// Time from shutdown initiation to the terminal state.
    pub elapsed: Duration,
    /// Hook outcomes, or `None` if some hook outlived the deadline.
    pub hooks: Option<Vec<HookOutcome>>,
}

/// Orchestrates teardown once a termination notification arrives.
pub struct ShutdownCoordinator<E: Stoppable> {
    endpoint: Arc<E>,
    registry: Arc<ServiceRegistry>,
    health: HealthReporter,
    deadline: ShutdownDeadline,
    state: watch::Sender<ShutdownState>,
}

impl<E: Stoppable> ShutdownCoordinator<E> {
    pub fn new(
        endpoint: Arc<E>,
        registry: Arc<ServiceRegistry>,
        health: HealthReporter,
        deadline: ShutdownDeadline,
    ) -> Self {
        Self {
            endpoint,
            registry,
            health,
            deadline,
            state: watch::channel(ShutdownState::Running).0,
        }
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// Wait for `termination`, then tear everything down.
    ///
    /// Consumes the coordinator: a shutdown sequence runs at most once.
    pub async fn run<F>(self, termination: F) -> ShutdownOutcome
    where
        F: Future<Output = ()>,
    {
        termination.await;

        let hooks_deadline = tokio::time::Instant::now() + self.deadline.duration();
        let deadline = tokio::time::sleep_until(hooks_deadline);
        let started = Instant::now();
        self.state.send_replace(ShutdownState::Stopping);
        tracing::info!(
            deadline_ms = self.deadline.duration().as_millis() as u64,
            "Starting graceful shutdown"
        );

        self.health.set_not_serving();

        let endpoint = Arc::clone(&self.endpoint);
        let mut graceful = tokio::spawn(async move { endpoint.graceful_stop().await });
        let hooks = self.registry.shutdown_all();

        let state = tokio::select! {
            joined = &mut graceful => match joined {
                Ok(()) => {
                    tracing::info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Completed graceful shutdown"
                    );
                    ShutdownState::StoppedGraceful
                }
                Err(e) => {
                    tracing::error!(error = %e, "Graceful stop failed, shutting down forcefully");
                    self.endpoint.forced_stop().await;
                    ShutdownState::StoppedForced
                }
            },
            () = deadline => {
                tracing::error!(
                    deadline_ms = self.deadline.duration().as_millis() as u64,
                    "Exceeded deadline, shutting down forcefully"
                );
                self.endpoint.forced_stop().await;
                ShutdownState::StoppedForced
            }
        };

        metrics::record_shutdown(match state {
            ShutdownState::StoppedGraceful => "graceful",
            _ => "forced",
        });
        self.state.send_replace(state);

        ShutdownOutcome {
            state,
            elapsed: started.elapsed(),
            hooks,
            hooks_deadline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ServingStatus;
    use crate::lifecycle::registry::{HookError, HookStatus, Subsystem};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Endpoint double whose graceful stop takes a fixed time.
    struct FakeEndpoint {
        graceful_delay: Duration,
        graceful_calls: AtomicUsize,
        forced_calls: AtomicUsize,
        forced_at: Mutex<Option<Instant>>,
    }

    impl FakeEndpoint {
        fn new(graceful_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                graceful_delay,
                graceful_calls: AtomicUsize::new(0),
                forced_calls: AtomicUsize::new(0),
                forced_at: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl Stoppable for FakeEndpoint {
        async fn graceful_stop(&self) {
            self.graceful_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.graceful_delay).await;
        }

        async fn forced_stop(&self) {
            self.forced_calls.fetch_add(1, Ordering::SeqCst);
            *self.forced_at.lock().unwrap() = Some(Instant::now());
        }
    }

    struct SlowHook {
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl Subsystem for SlowHook {
        fn name(&self) -> &str {
            "slow-hook"
        }

        async fn shutdown(&self) -> Result<(), HookError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                Err(HookError::Failed("cleanup failed".into()))
            } else {
                Ok(())
            }
        }
    }

    fn coordinator(
        endpoint: Arc<FakeEndpoint>,
        registry: ServiceRegistry,
        deadline: Duration,
    ) -> (ShutdownCoordinator<FakeEndpoint>, HealthReporter) {
        let health = HealthReporter::new();
        health.set_serving();
        let coordinator = ShutdownCoordinator::new(
            endpoint,
            Arc::new(registry),
            health.clone(),
            ShutdownDeadline::new(deadline),
        );
        (coordinator, health)
    }

    #[tokio::test]
    async fn graceful_before_deadline() {
        let endpoint = FakeEndpoint::new(Duration::from_millis(50));
        let mut registry = ServiceRegistry::new();
        registry
            .register(Arc::new(SlowHook {
                delay: Duration::from_millis(500),
                fail: true,
            }))
            .unwrap();
        let (coordinator, health) =
            coordinator(Arc::clone(&endpoint), registry, Duration::from_millis(200));

        let outcome = coordinator.run(async {}).await;

        assert_eq!(outcome.state, ShutdownState::StoppedGraceful);
        assert!(outcome.elapsed < Duration::from_millis(200));
        assert_eq!(endpoint.graceful_calls.load(Ordering::SeqCst), 1);
        assert_eq!(endpoint.forced_calls.load(Ordering::SeqCst), 0);
        assert_eq!(health.status(), ServingStatus::NotServing);

        // The slow hook finishes after the transition; its error is recorded.
        assert!(!outcome.hooks.is_finished());
        let hooks = outcome.hooks.collect().await;
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].status, HookStatus::Failed("cleanup failed".into()));
        assert!(hooks[0].elapsed >= Duration::from_millis(500));

        // Still no forced stop once the hook is done.
        assert_eq!(endpoint.forced_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn forced_after_deadline() {
        let endpoint = FakeEndpoint::new(Duration::from_millis(500));
        let (coordinator, _health) =
            coordinator(Arc::clone(&endpoint), ServiceRegistry::new(), Duration::from_millis(200));

        let started = Instant::now();
        let outcome = coordinator.run(async {}).await;

        assert_eq!(outcome.state, ShutdownState::StoppedForced);
        assert_eq!(endpoint.forced_calls.load(Ordering::SeqCst), 1);

        let forced_after = endpoint.forced_at.lock().unwrap().unwrap() - started;
        assert!(forced_after >= Duration::from_millis(200));
        assert!(forced_after < Duration::from_millis(450));

        // The abandoned graceful stop finishing later changes nothing.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(endpoint.forced_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn waits_for_termination_before_stopping() {
        let endpoint = FakeEndpoint::new(Duration::ZERO);
        let (coordinator, health) =
            coordinator(Arc::clone(&endpoint), ServiceRegistry::new(), Duration::from_secs(1));
        let mut state = coordinator.state();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let running = tokio::spawn(coordinator.run(async {
            let _ = rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*state.borrow(), ShutdownState::Running);
        assert_eq!(health.status(), ServingStatus::Serving);
        assert_eq!(endpoint.graceful_calls.load(Ordering::SeqCst), 0);

        tx.send(()).unwrap();
        let outcome = running.await.unwrap();
        assert_eq!(outcome.state, ShutdownState::StoppedGraceful);

        state
            .wait_for(|s| s.is_terminal())
            .await
            .expect("terminal state published");
        assert_eq!(*state.borrow(), ShutdownState::StoppedGraceful);
    }

    #[tokio::test]
    async fn hook_failure_is_not_fatal() {
        let endpoint = FakeEndpoint::new(Duration::ZERO);
        let mut registry = ServiceRegistry::new();
        registry
            .register(Arc::new(SlowHook {
                delay: Duration::ZERO,
                fail: true,
            }))
            .unwrap();
        let (coordinator, _health) =
            coordinator(Arc::clone(&endpoint), registry, Duration::from_secs(1));

        let outcome = coordinator.run(async {}).await;
        let hooks = outcome.hooks.collect().await;

        assert_eq!(outcome.state, ShutdownState::StoppedGraceful);
        assert!(!hooks[0].status.is_success());
        assert_eq!(endpoint.forced_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn settle_waits_for_running_hooks() {
        let endpoint = FakeEndpoint::new(Duration::ZERO);
        let mut registry = ServiceRegistry::new();
        registry
            .register(Arc::new(SlowHook {
                delay: Duration::from_millis(20),
                fail: false,
            }))
            .unwrap();
        let (coordinator, _health) =
            coordinator(Arc::clone(&endpoint), registry, Duration::from_secs(30));

        let outcome = coordinator.run(async {}).await;
        assert!(!outcome.hooks.is_finished());

        let settled = outcome.settle().await;
        assert_eq!(settled.state, ShutdownState::StoppedGraceful);
        let hooks = settled.hooks.expect("hook finished before the deadline");
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].status, HookStatus::Completed);
    }

    #[tokio::test]
    async fn settle_abandons_hooks_at_deadline() {
        let endpoint = FakeEndpoint::new(Duration::ZERO);
        let mut registry = ServiceRegistry::new();
        registry
            .register(Arc::new(SlowHook {
                delay: Duration::from_secs(10),
                fail: false,
            }))
            .unwrap();
        let (coordinator, _health) =
            coordinator(Arc::clone(&endpoint), registry, Duration::from_millis(200));

        let started = Instant::now();
        let settled = coordinator.run(async {}).await.settle().await;
        let waited = started.elapsed();

        assert_eq!(settled.state, ShutdownState::StoppedGraceful);
        assert!(settled.hooks.is_none());
        assert!(waited >= Duration::from_millis(200));
        assert!(waited < Duration::from_millis(450), "settled after {waited:?}");
    }

    #[tokio::test]
    async fn settle_after_forced_stop_does_not_wait_further() {
        let endpoint = FakeEndpoint::new(Duration::from_secs(10));
        let mut registry = ServiceRegistry::new();
        registry
            .register(Arc::new(SlowHook {
                delay: Duration::from_secs(10),
                fail: false,
            }))
            .unwrap();
        let (coordinator, _health) =
            coordinator(Arc::clone(&endpoint), registry, Duration::from_millis(100));

        let started = Instant::now();
        let settled = coordinator.run(async {}).await.settle().await;

        assert_eq!(settled.state, ShutdownState::StoppedForced);
        assert!(settled.hooks.is_none());
        assert!(started.elapsed() < Duration::from_millis(350));
    }

    #[test]
    fn default_deadline_is_thirty_seconds() {
        assert_eq!(ShutdownDeadline::default().duration(), Duration::from_secs(30));
        assert!(!ShutdownState::Stopping.is_terminal());
        assert!(ShutdownState::StoppedForced.is_terminal());
    }
}
