//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Register subsystems → Bind endpoint → Serve → Report serving
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → one coalesced termination notification
//!
//! Shutdown (shutdown.rs):
//!     Notification → Not serving → graceful stop ∥ hooks ∥ deadline
//!         → StoppedGraceful | StoppedForced → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: subsystems first, listener last
//! - Graceful stop races the deadline; hooks never gate the terminal state
//! - Hooks may delay exit until the deadline, never past it
//! - Shutdown has timeout: forced stop after deadline

pub mod registry;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use registry::{HookError, HookOutcome, HookReport, HookStatus, ServiceRegistry, Subsystem};
pub use shutdown::{
    SettledShutdown, ShutdownCoordinator, ShutdownDeadline, ShutdownOutcome, ShutdownState,
    Stoppable,
};
pub use signals::{SignalWatcher, TerminationTrigger};
pub use startup::{Agent, AgentSettings, StartupError};
