//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber from configuration
//! - Select JSON (production) or pretty (development) output
//! - Attach the span exporter when trace export is enabled
//!
//! # Design Decisions
//! - `RUST_LOG` overrides the configured level when set
//! - The configured level is a ceiling for dependencies too
//! - With logging and export both disabled no subscriber is installed

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogFormat, LoggingConfig, OtelConfig};
use crate::observability::tracing::{otel_layer, OtelError};

/// Level value that turns logging off.
pub const DISABLED_LEVEL: &str = "disabled";

/// Error type for subscriber setup.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error(transparent)]
    Init(#[from] TryInitError),
    #[error(transparent)]
    Otel(#[from] OtelError),
}

/// Install the global subscriber described by `logging` and `otel`.
pub fn init_logging(logging: &LoggingConfig, otel: &OtelConfig) -> Result<(), LoggingError> {
    let log_enabled = logging.enabled && logging.level != DISABLED_LEVEL;
    if !log_enabled && !otel.enabled {
        return Ok(());
    }

    let registry = tracing_subscriber::registry().with(otel_layer(otel)?);
    if !log_enabled {
        return Ok(registry.try_init()?);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&logging.level)));

    match logging.format {
        LogFormat::Json => registry.with(fmt::layer().json().with_filter(filter)).try_init()?,
        LogFormat::Pretty => registry.with(fmt::layer().pretty().with_filter(filter)).try_init()?,
    }
    Ok(())
}

fn default_directive(level: &str) -> String {
    format!(
        "cluster_agent={level},tower_http={level},{}",
        dependency_level(level)
    )
}

/// The more restrictive of `level` and `warn`.
fn dependency_level(level: &str) -> &str {
    match level {
        "error" => "error",
        _ => "warn",
    }
}
