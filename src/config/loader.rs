//! Configuration loading from disk and command-line overrides.
//!
//! Precedence, lowest first: defaults, config file, `key:value` overrides.

use std::fs;
use std::path::{Path, PathBuf};

use toml::{Table, Value};

use crate::config::schema::AgentConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid override {0:?}: expected key:value")]
    Override(String),
    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, override and validate configuration.
///
/// `overrides` are `dotted.key:value` pairs, e.g. `cluster-agent.logging.level:debug`.
pub fn load_config(path: Option<&Path>, overrides: &[String]) -> Result<AgentConfig, ConfigError> {
    let mut table = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str::<Table>(&content)?
        }
        None => Table::new(),
    };

    for raw in overrides {
        let (key, value) = raw
            .split_once(':')
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| ConfigError::Override(raw.clone()))?;
        apply_override(&mut table, key, value).map_err(|()| ConfigError::Override(raw.clone()))?;
    }

    let config: AgentConfig = Value::Table(table).try_into()?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    if let Some(path) = path {
        tracing::debug!(path = %path.display(), overrides = overrides.len(), "Configuration loaded");
    }
    Ok(config)
}

/// Set `key` (dotted path) to `raw`, creating intermediate tables.
///
/// Fails if a path segment names an existing non-table value.
fn apply_override(table: &mut Table, key: &str, raw: &str) -> Result<(), ()> {
    let segments: Vec<String> = key.split('.').map(|s| s.trim().replace('_', "-")).collect();
    let Some((leaf, parents)) = segments.split_last() else {
        return Err(());
    };

    let mut current = table;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert(Value::Table(Table::new()));
        current = entry.as_table_mut().ok_or(())?;
    }
    current.insert(leaf.clone(), parse_scalar(raw));
    Ok(())
}

/// Interpret `raw` as a TOML scalar when it is one, otherwise as a string.
fn parse_scalar(raw: &str) -> Value {
    toml::from_str::<Table>(&format!("v = {raw}"))
        .ok()
        .and_then(|mut parsed| parsed.remove("v"))
        .filter(|value| !value.is_table())
        .unwrap_or_else(|| Value::String(raw.to_string()))
}
