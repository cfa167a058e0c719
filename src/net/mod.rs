//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection limits)
//!     → connection.rs (identity, in-flight tracking)
//!     → endpoint.rs (hyper connection driving the axum router)
//!
//! Endpoint States:
//!     Idle → Serving → Stopping → Stopped
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked so a graceful stop can drain it
//! - The listener is released exactly once, whichever stop path gets there first

pub mod connection;
pub mod endpoint;
pub mod listener;

pub use endpoint::{Endpoint, EndpointError, RunState};
pub use listener::{normalize_address, ListenerError};
