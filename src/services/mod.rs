//! Subsystems registered with the endpoint.
//!
//! # Data Flow
//! ```text
//! GET /v1/log-metadata → log_metadata.rs (container log files on this node)
//! GET /v1/log-records  → log_records.rs (tail of one log file)
//! ```
//!
//! # Design Decisions
//! - Each service owns its state and exposes it only through its routes
//! - Shutdown hooks flip a closed flag; later requests get 503

pub mod log_metadata;
pub mod log_records;

pub use log_metadata::LogMetadataService;
pub use log_records::LogRecordsService;
