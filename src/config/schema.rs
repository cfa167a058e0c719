//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the agent.
//! All types derive Serde traits for deserialization from config files.
//! Keys are kebab-case, e.g.
//!
//! ```toml
//! [cluster-agent]
//! addr = ":50051"
//! container-logs-dir = "/var/log/containers"
//!
//! [cluster-agent.logging]
//! level = "debug"
//! format = "pretty"
//!
//! [cluster-agent.otel]
//! enabled = true
//! endpoint = "http://otel-collector:4318/v1/traces"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lifecycle::shutdown::ShutdownDeadline;
use crate::net::normalize_address;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct AgentConfig {
    pub cluster_agent: ClusterAgentConfig,
}

/// Cluster agent settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClusterAgentConfig {
    /// Bind address (e.g., ":50051" or "127.0.0.1:50051").
    pub addr: String,

    /// Directory holding the node's container log files.
    pub container_logs_dir: PathBuf,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Time budget for a graceful stop before it is forced, in seconds.
    pub shutdown_timeout_secs: u64,

    pub logging: LoggingConfig,

    pub metrics: MetricsConfig,

    pub otel: OtelConfig,
}

impl ClusterAgentConfig {
    /// Bind address with the `:port` shorthand expanded.
    pub fn bind_address(&self) -> String {
        normalize_address(&self.addr)
    }

    pub fn shutdown_deadline(&self) -> ShutdownDeadline {
        ShutdownDeadline::new(Duration::from_secs(self.shutdown_timeout_secs))
    }
}

impl Default for ClusterAgentConfig {
    fn default() -> Self {
        Self {
            addr: ":50051".to_string(),
            container_logs_dir: PathBuf::from("/var/log/containers"),
            max_connections: 10_000,
            shutdown_timeout_secs: 30,
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            otel: OtelConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Logger configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggingConfig {
    pub enabled: bool,

    /// Log level (trace, debug, info, warn, error, disabled).
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Metrics exporter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MetricsConfig {
    /// Enable the Prometheus scrape endpoint.
    pub enabled: bool,

    /// Scrape endpoint bind address.
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// OpenTelemetry trace export configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OtelConfig {
    pub enabled: bool,

    /// Export debug-level spans as well as info-level ones.
    pub debug: bool,

    /// OTLP/HTTP traces endpoint.
    pub endpoint: String,

    pub service_name: String,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debug: false,
            endpoint: "http://localhost:4318/v1/traces".to_string(),
            service_name: "cluster-agent".to_string(),
        }
    }
}
