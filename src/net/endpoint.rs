//! Request-serving endpoint lifecycle.
//!
//! # Responsibilities
//! - Own the bound listener exclusively
//! - Run the accept loop on its own task
//! - Graceful stop: stop accepting, drain in-flight connections, release the socket
//! - Forced stop: release the socket and abort in-flight connections
//!
//! # State Transitions
//! ```text
//! Idle → Serving → Stopping → Stopped
//! Idle ──────────→ Stopping → Stopped   (stopped before serving)
//! ```
//!
//! Stop requests are monotonic (`Running → Graceful → Forced`), so a forced
//! stop may overtake a graceful one already in progress. The listener is
//! released exactly once and every stop caller resolves when `Stopped` is
//! reached.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::lifecycle::shutdown::Stoppable;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};

/// Pause before accepting again after a listener-level accept error.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Error type for endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// The listening socket could not be bound. Fatal at startup.
    #[error(transparent)]
    Bind(#[from] ListenerError),
    /// `serve` was called a second time.
    #[error("endpoint is already serving")]
    AlreadyServing,
    /// `serve` was called after a stop was requested.
    #[error("endpoint has been stopped")]
    Stopped,
}

/// Endpoint run state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle = 0,
    Serving = 1,
    Stopping = 2,
    Stopped = 3,
}

impl From<u8> for RunState {
    fn from(val: u8) -> Self {
        match val {
            0 => RunState::Idle,
            1 => RunState::Serving,
            2 => RunState::Stopping,
            _ => RunState::Stopped,
        }
    }
}

/// Requested stop mode. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StopMode {
    Running,
    Graceful,
    Forced,
}

/// A bound listener plus its request-serving loop.
#[derive(Debug)]
pub struct Endpoint {
    local_addr: SocketAddr,
    /// Present until `serve` takes it, or a stop releases it unserved.
    listener: Mutex<Option<Listener>>,
    state: AtomicU8,
    stop_tx: watch::Sender<StopMode>,
    stopped_tx: watch::Sender<bool>,
    /// Single-use latch around the physical close of the listener.
    released: AtomicBool,
    connections: ConnectionTracker,
}

impl Endpoint {
    /// Bind the listening socket. A bind failure is fatal; there is no retry.
    pub async fn bind(address: &str, max_connections: usize) -> Result<Self, EndpointError> {
        let listener = Listener::bind(address, max_connections).await?;
        let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
            address: address.to_string(),
            source,
        })?;

        Ok(Self {
            local_addr,
            listener: Mutex::new(Some(listener)),
            state: AtomicU8::new(RunState::Idle as u8),
            stop_tx: watch::channel(StopMode::Running).0,
            stopped_tx: watch::channel(false).0,
            released: AtomicBool::new(false),
            connections: ConnectionTracker::new(),
        })
    }

    /// The address the socket is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn run_state(&self) -> RunState {
        RunState::from(self.state.load(Ordering::SeqCst))
    }

    /// Number of connections currently being served.
    pub fn in_flight(&self) -> u64 {
        self.connections.active_count()
    }

    /// Whether the listening socket has been closed.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Start the accept loop on its own task.
    ///
    /// `Serving` is entered at most once; the call never blocks the caller.
    pub fn serve(self: &Arc<Self>, router: Router) -> Result<JoinHandle<()>, EndpointError> {
        if let Err(current) = self.state.compare_exchange(
            RunState::Idle as u8,
            RunState::Serving as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            return Err(match RunState::from(current) {
                RunState::Serving => EndpointError::AlreadyServing,
                _ => EndpointError::Stopped,
            });
        }

        let Some(listener) = self.take_listener() else {
            // A stop won the race for the listener.
            return Err(EndpointError::Stopped);
        };

        tracing::info!(address = %self.local_addr, "Endpoint serving");
        let endpoint = Arc::clone(self);
        Ok(tokio::spawn(async move {
            endpoint.accept_loop(listener, router).await;
        }))
    }

    /// Stop accepting, wait for in-flight connections to finish, then return.
    ///
    /// May take as long as the slowest in-flight request.
    pub async fn graceful_stop(&self) {
        self.request_stop(StopMode::Graceful).await;
    }

    /// Release the socket and abort in-flight connections.
    ///
    /// Safe to call while a graceful stop is in progress; both calls resolve.
    pub async fn forced_stop(&self) {
        self.request_stop(StopMode::Forced).await;
    }

    async fn request_stop(&self, mode: StopMode) {
        let escalated = self.stop_tx.send_if_modified(|current| {
            if mode > *current {
                *current = mode;
                true
            } else {
                false
            }
        });
        if escalated {
            tracing::info!(?mode, address = %self.local_addr, "Endpoint stop requested");
        }

        for from in [RunState::Idle, RunState::Serving] {
            if self
                .state
                .compare_exchange(
                    from as u8,
                    RunState::Stopping as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                break;
            }
        }

        // Never served: nothing to drain.
        if let Some(listener) = self.take_listener() {
            self.release(listener);
            self.finish();
        }

        let mut stopped = self.stopped_tx.subscribe();
        let _ = stopped.wait_for(|stopped| *stopped).await;
    }

    async fn accept_loop(self: Arc<Self>, listener: Listener, router: Router) {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut connections = JoinSet::new();
        let builder = Builder::new(TokioExecutor::new());

        loop {
            tokio::select! {
                biased;
                () = wait_for_mode(&mut stop_rx, |mode| *mode != StopMode::Running) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr, permit)) => {
                        let guard = self.connections.track();
                        let builder = builder.clone();
                        let service = TowerToHyperService::new(router.clone());
                        let mut conn_stop = stop_rx.clone();

                        connections.spawn(async move {
                            let _permit = permit;
                            let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
                            tokio::pin!(conn);

                            let finished = tokio::select! {
                                result = conn.as_mut() => Some(result),
                                () = wait_for_mode(&mut conn_stop, |mode| *mode != StopMode::Running) => None,
                            };
                            let result = match finished {
                                Some(result) => result,
                                None => {
                                    conn.as_mut().graceful_shutdown();
                                    conn.await
                                }
                            };
                            if let Err(e) = result {
                                tracing::debug!(connection_id = %guard.id(), peer_addr = %peer_addr, error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        if backoff_after_accept_error(&mut stop_rx, &e).await {
                            break;
                        }
                    }
                },
            }
        }

        self.release(listener);

        let forced_now = *stop_rx.borrow() == StopMode::Forced;
        let forced = forced_now
            || tokio::select! {
                () = drain(&mut connections) => false,
                () = wait_for_mode(&mut stop_rx, |mode| *mode == StopMode::Forced) => true,
            };
        if forced {
            tracing::warn!(
                in_flight = connections.len(),
                "Aborting in-flight connections"
            );
            connections.abort_all();
            drain(&mut connections).await;
        }

        self.finish();
    }

    fn take_listener(&self) -> Option<Listener> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn release(&self, listener: Listener) {
        drop(listener);
        if self
            .released
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::info!(address = %self.local_addr, "Listener released");
        }
    }

    fn finish(&self) {
        self.state.store(RunState::Stopped as u8, Ordering::SeqCst);
        if !self.stopped_tx.send_replace(true) {
            tracing::info!(address = %self.local_addr, "Endpoint stopped");
        }
    }
}

#[async_trait]
impl Stoppable for Endpoint {
    async fn graceful_stop(&self) {
        Endpoint::graceful_stop(self).await;
    }

    async fn forced_stop(&self) {
        Endpoint::forced_stop(self).await;
    }
}

async fn wait_for_mode(rx: &mut watch::Receiver<StopMode>, f: impl FnMut(&StopMode) -> bool) {
    // The sender lives as long as the endpoint; an error can only mean teardown.
    let _ = rx.wait_for(f).await;
}

/// Pause after an accept error that is not specific to one connection,
/// such as running out of file descriptors. Returns `true` if a stop was
/// requested meanwhile.
async fn backoff_after_accept_error(
    stop_rx: &mut watch::Receiver<StopMode>,
    error: &ListenerError,
) -> bool {
    if error.is_connection_error() {
        tracing::debug!(error = %error, "Connection failed during accept");
        return false;
    }

    tracing::warn!(error = %error, backoff_ms = ACCEPT_ERROR_BACKOFF.as_millis() as u64, "Accept failed");
    tokio::select! {
        biased;
        () = wait_for_mode(stop_rx, |mode| *mode != StopMode::Running) => true,
        () = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => false,
    }
}

async fn drain(connections: &mut JoinSet<()>) {
    while connections.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use std::time::Duration;
    use tokio::net::TcpStream;

    async fn bound() -> Arc<Endpoint> {
        Arc::new(Endpoint::bind("127.0.0.1:0", 16).await.unwrap())
    }

    fn router() -> Router {
        Router::new().route("/", get(|| async { "ok" }))
    }

    #[tokio::test]
    async fn accept_error_backoff_yields_to_stop() {
        let (tx, mut rx) = watch::channel(StopMode::Running);
        let exhausted = ListenerError::Accept(std::io::Error::other("too many open files"));

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send_replace(StopMode::Graceful);
            tx
        });

        let started = std::time::Instant::now();
        assert!(backoff_after_accept_error(&mut rx, &exhausted).await);
        assert!(started.elapsed() < ACCEPT_ERROR_BACKOFF);
        drop(stopper.await.unwrap());
    }

    #[tokio::test]
    async fn accept_error_backoff_pauses_before_retry() {
        let (_tx, mut rx) = watch::channel(StopMode::Running);

        let reset = ListenerError::Accept(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        let started = std::time::Instant::now();
        assert!(!backoff_after_accept_error(&mut rx, &reset).await);
        assert!(started.elapsed() < Duration::from_millis(100));

        let exhausted = ListenerError::Accept(std::io::Error::other("too many open files"));
        let started = std::time::Instant::now();
        assert!(!backoff_after_accept_error(&mut rx, &exhausted).await);
        assert!(started.elapsed() >= ACCEPT_ERROR_BACKOFF);
    }

    #[tokio::test]
    async fn serve_enters_serving_once() {
        let endpoint = bound().await;
        assert_eq!(endpoint.run_state(), RunState::Idle);

        endpoint.serve(router()).unwrap();
        assert_eq!(endpoint.run_state(), RunState::Serving);

        assert!(matches!(endpoint.serve(router()), Err(EndpointError::AlreadyServing)));

        endpoint.graceful_stop().await;
        assert_eq!(endpoint.run_state(), RunState::Stopped);
        assert!(matches!(endpoint.serve(router()), Err(EndpointError::Stopped)));
    }

    #[tokio::test]
    async fn stop_before_serve_releases_listener() {
        let endpoint = bound().await;
        let addr = endpoint.local_addr();

        endpoint.forced_stop().await;
        assert!(endpoint.is_released());
        assert_eq!(endpoint.run_state(), RunState::Stopped);

        // Socket is free again.
        let rebound = Endpoint::bind(&addr.to_string(), 1).await;
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn concurrent_stops_both_resolve() {
        let endpoint = bound().await;
        endpoint.serve(router()).unwrap();

        // Hold a connection open so the graceful path has something to drain.
        let _client = TcpStream::connect(endpoint.local_addr()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let graceful = {
            let endpoint = Arc::clone(&endpoint);
            tokio::spawn(async move { endpoint.graceful_stop().await })
        };
        let forced = {
            let endpoint = Arc::clone(&endpoint);
            tokio::spawn(async move { endpoint.forced_stop().await })
        };

        let (graceful, forced) = tokio::time::timeout(Duration::from_secs(5), async {
            (graceful.await, forced.await)
        })
        .await
        .expect("stops should resolve");
        assert!(graceful.is_ok());
        assert!(forced.is_ok());
        assert!(endpoint.is_released());
        assert_eq!(endpoint.run_state(), RunState::Stopped);
        assert_eq!(endpoint.in_flight(), 0);
    }

    #[tokio::test]
    async fn graceful_after_forced_is_noop() {
        let endpoint = bound().await;
        endpoint.serve(router()).unwrap();

        endpoint.forced_stop().await;
        tokio::time::timeout(Duration::from_secs(1), endpoint.graceful_stop())
            .await
            .expect("graceful stop after forced stop should return immediately");
        assert_eq!(*endpoint.stop_tx.borrow(), StopMode::Forced);
    }

    #[test]
    fn stop_modes_are_ordered() {
        assert!(StopMode::Running < StopMode::Graceful);
        assert!(StopMode::Graceful < StopMode::Forced);
    }
}
