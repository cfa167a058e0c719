//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (deadline > 0, ports valid)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AgentConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use url::Url;

use crate::config::schema::AgentConfig;

const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "disabled"];

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &AgentConfig) -> Result<(), Vec<ValidationError>> {
    let agent = &config.cluster_agent;
    let mut errors = Vec::new();

    if let Err(message) = check_host_port(&agent.bind_address()) {
        errors.push(ValidationError::new("cluster-agent.addr", message));
    }

    if agent.container_logs_dir.as_os_str().is_empty() {
        errors.push(ValidationError::new(
            "cluster-agent.container-logs-dir",
            "must not be empty",
        ));
    }

    if agent.max_connections == 0 {
        errors.push(ValidationError::new(
            "cluster-agent.max-connections",
            "must be greater than 0",
        ));
    }

    if agent.shutdown_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "cluster-agent.shutdown-timeout-secs",
            "must be greater than 0",
        ));
    }

    if !LEVELS.contains(&agent.logging.level.as_str()) {
        errors.push(ValidationError::new(
            "cluster-agent.logging.level",
            format!(
                "unknown level {:?}, expected one of {}",
                agent.logging.level,
                LEVELS.join(", ")
            ),
        ));
    }

    if agent.metrics.enabled && agent.metrics.address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "cluster-agent.metrics.address",
            format!("{:?} is not a socket address", agent.metrics.address),
        ));
    }

    if agent.otel.enabled {
        if !is_http_url(&agent.otel.endpoint) {
            errors.push(ValidationError::new(
                "cluster-agent.otel.endpoint",
                format!("{:?} is not an http(s) URL", agent.otel.endpoint),
            ));
        }
        if agent.otel.service_name.trim().is_empty() {
            errors.push(ValidationError::new(
                "cluster-agent.otel.service-name",
                "must not be empty",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_http_url(raw: &str) -> bool {
    Url::parse(raw).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

/// `host:port` with a non-empty host and a numeric port.
fn check_host_port(addr: &str) -> Result<(), String> {
    let Some((host, port)) = addr.rsplit_once(':') else {
        return Err(format!("{addr:?} is missing a port"));
    };
    if host.is_empty() {
        return Err(format!("{addr:?} is missing a host"));
    }
    if port.parse::<u16>().is_err() {
        return Err(format!("{addr:?} has an invalid port"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&AgentConfig::default()).is_ok());
    }

    #[test]
    fn host_port_forms() {
        assert!(check_host_port("0.0.0.0:50051").is_ok());
        assert!(check_host_port("localhost:80").is_ok());
        assert!(check_host_port("[::1]:8080").is_ok());
        assert!(check_host_port("localhost").is_err());
        assert!(check_host_port("host:http").is_err());
        assert!(check_host_port(":").is_err());
    }

    #[test]
    fn otel_checked_only_when_enabled() {
        let mut config = AgentConfig::default();
        config.cluster_agent.otel.endpoint = "collector:4318".into();
        config.cluster_agent.otel.service_name = String::new();
        assert!(validate_config(&config).is_ok());

        config.cluster_agent.otel.enabled = true;
        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["cluster-agent.otel.endpoint", "cluster-agent.otel.service-name"]
        );

        config.cluster_agent.otel.endpoint = "https://collector:4318/v1/traces".into();
        config.cluster_agent.otel.service_name = "agent".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn reports_every_error() {
        let mut config = AgentConfig::default();
        config.cluster_agent.addr = "nope".into();
        config.cluster_agent.shutdown_timeout_secs = 0;
        config.cluster_agent.max_connections = 0;
        config.cluster_agent.logging.level = "loud".into();
        config.cluster_agent.metrics.enabled = true;
        config.cluster_agent.metrics.address = "metrics".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "cluster-agent.addr",
                "cluster-agent.max-connections",
                "cluster-agent.shutdown-timeout-secs",
                "cluster-agent.logging.level",
                "cluster-agent.metrics.address",
            ]
        );
    }
}
