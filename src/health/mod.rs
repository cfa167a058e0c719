//! Health reporting subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (lifecycle::startup):
//!     Endpoint serving → set_serving()
//!
//! Shutdown (lifecycle::shutdown):
//!     Stopping entered → set_not_serving()
//!
//! Pollers:
//!     GET /healthz → 200 SERVING | 503 NOT_SERVING/UNKNOWN
//! ```
//!
//! # Design Decisions
//! - One overall flag, no per-service status
//! - Clones share state through a watch channel

pub mod handlers;
pub mod state;

pub use handlers::{health_router, HEALTH_PATH};
pub use state::{HealthReporter, ServingStatus};

impl HealthReporter {
    /// Routes exposing this reporter on the endpoint.
    pub fn router(&self) -> axum::Router {
        health_router(self.clone())
    }
}
