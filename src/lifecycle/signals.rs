//! OS signal handling.
//!
//! # Responsibilities
//! - Register SIGTERM and SIGINT handlers as early as possible
//! - Coalesce every termination request into a single notification
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe, no shared state in handlers)
//! - The notification is a watch flag that only ever goes `false → true`
//! - Signals after the first are logged and otherwise ignored

use std::sync::Arc;
use tokio::sync::watch;

/// Raises the termination notification. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TerminationTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl TerminationTrigger {
    /// Raise the notification. Returns `true` only for the first call.
    pub fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    /// Whether the notification has already been raised.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Passive listener that turns termination requests into one notification.
#[derive(Debug)]
pub struct SignalWatcher {
    trigger: TerminationTrigger,
}

impl SignalWatcher {
    /// Create a watcher driven only by its [`TerminationTrigger`].
    pub fn manual() -> (Self, TerminationTrigger) {
        let (tx, _) = watch::channel(false);
        let trigger = TerminationTrigger { tx: Arc::new(tx) };
        (
            Self {
                trigger: trigger.clone(),
            },
            trigger,
        )
    }

    /// Install SIGINT and SIGTERM handlers (Ctrl-C elsewhere).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn install() -> std::io::Result<Self> {
        let (watcher, trigger) = Self::manual();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigterm = signal(SignalKind::terminate())?;

            tokio::spawn(async move {
                loop {
                    let name = tokio::select! {
                        Some(()) = sigint.recv() => "SIGINT",
                        Some(()) = sigterm.recv() => "SIGTERM",
                        else => break,
                    };
                    notify(&trigger, name);
                }
            });
        }

        #[cfg(not(unix))]
        {
            tokio::spawn(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    notify(&trigger, "Ctrl-C");
                }
            });
        }

        Ok(watcher)
    }

    /// Handle for raising the notification in-process.
    pub fn trigger(&self) -> TerminationTrigger {
        self.trigger.clone()
    }

    /// Suspend until a termination request is observed.
    ///
    /// Consumes the watcher, so it returns at most once.
    pub async fn wait(self) {
        let mut rx = self.trigger.tx.subscribe();
        // The watcher holds a sender, so the channel cannot close underneath us.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

fn notify(trigger: &TerminationTrigger, name: &'static str) {
    if trigger.trigger() {
        tracing::info!(signal = name, "Termination signal received");
    } else {
        tracing::warn!(signal = name, "Shutdown already in progress, ignoring signal");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn first_trigger_wins() {
        let (watcher, trigger) = SignalWatcher::manual();
        let other = watcher.trigger();

        assert!(!trigger.is_triggered());
        assert!(trigger.trigger());
        assert!(!trigger.trigger());
        assert!(!other.trigger());
        assert!(other.is_triggered());

        tokio::time::timeout(Duration::from_secs(1), watcher.wait())
            .await
            .expect("wait should resolve once triggered");
    }

    #[tokio::test]
    async fn wait_pends_until_triggered() {
        let (watcher, trigger) = SignalWatcher::manual();
        let waiting = tokio::spawn(watcher.wait());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("wait should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn burst_of_triggers_counts_once() {
        let (watcher, trigger) = SignalWatcher::manual();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let trigger = trigger.clone();
            handles.push(tokio::spawn(async move { trigger.trigger() }));
        }

        let mut firsts = 0;
        for handle in handles {
            if handle.await.unwrap() {
                firsts += 1;
            }
        }
        assert_eq!(firsts, 1);
        watcher.wait().await;
    }

    #[tokio::test]
    async fn install_registers_handlers() {
        let watcher = SignalWatcher::install().unwrap();
        assert!(!watcher.trigger().is_triggered());
    }
}
