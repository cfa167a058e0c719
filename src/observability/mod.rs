//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!     → tracing.rs (spans, exported over OTLP)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON)
//!     → Metrics endpoint (Prometheus scrape, optional)
//!     → Trace collector (OTLP/HTTP, optional)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - A forced shutdown logs at error level and is counted separately
//!   from a graceful one

pub mod logging;
pub mod metrics;
pub mod tracing;
