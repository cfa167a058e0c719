//! Cluster agent library.

pub mod cluster;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod services;

pub use config::AgentConfig;
pub use lifecycle::{Agent, ShutdownCoordinator, SignalWatcher};
pub use net::Endpoint;
