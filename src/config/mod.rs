//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse into a table)
//!     → loader.rs (apply key:value overrides from the command line)
//!     → validation.rs (semantic checks)
//!     → AgentConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AgentConfig, ClusterAgentConfig, LogFormat, LoggingConfig, MetricsConfig, OtelConfig,
};
pub use validation::ValidationError;
