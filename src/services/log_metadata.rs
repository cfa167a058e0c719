//! Node-local log metadata provider.
//!
//! Lists the container log files present on this node. Files follow the
//! kubelet naming convention `<pod>_<namespace>_<container>-<container id>.log`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::cluster::ClusterClient;
use crate::lifecycle::registry::{HookError, Subsystem};

pub const LOG_METADATA_PATH: &str = "/v1/log-metadata";

/// Identity of a container log file, parsed from its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogFileName {
    pub pod: String,
    pub namespace: String,
    pub container: String,
    pub container_id: String,
}

/// Parse `<pod>_<namespace>_<container>-<container id>.log`.
pub fn parse_log_file_name(file_name: &str) -> Option<LogFileName> {
    let stem = file_name.strip_suffix(".log")?;
    let mut parts = stem.splitn(3, '_');
    let pod = parts.next()?;
    let namespace = parts.next()?;
    let (container, container_id) = parts.next()?.rsplit_once('-')?;

    if [pod, namespace, container, container_id]
        .iter()
        .any(|part| part.is_empty())
    {
        return None;
    }

    Some(LogFileName {
        pod: pod.to_string(),
        namespace: namespace.to_string(),
        container: container.to_string(),
        container_id: container_id.to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct LogFileInfo {
    pub file: String,
    #[serde(flatten)]
    pub name: LogFileName,
    pub size: u64,
    pub last_modified_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct LogMetadataResponse {
    pub node_name: String,
    pub files: Vec<LogFileInfo>,
}

struct MetadataInner {
    node_name: String,
    logs_dir: PathBuf,
    closed: AtomicBool,
}

/// Node-local metadata provider.
#[derive(Clone)]
pub struct LogMetadataService {
    inner: Arc<MetadataInner>,
}

impl LogMetadataService {
    pub fn new(cluster: &ClusterClient, node_name: impl Into<String>, logs_dir: impl Into<PathBuf>) -> Self {
        let inner = MetadataInner {
            node_name: node_name.into(),
            logs_dir: logs_dir.into(),
            closed: AtomicBool::new(false),
        };
        tracing::info!(
            node_name = %inner.node_name,
            logs_dir = %inner.logs_dir.display(),
            api_server = %cluster.api_server(),
            namespace = cluster.namespace().unwrap_or_default(),
            "Log metadata service initialized"
        );
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Container log files currently on this node, sorted by file name.
    pub async fn list(&self) -> std::io::Result<Vec<LogFileInfo>> {
        list_log_files(&self.inner.logs_dir).await
    }
}

async fn list_log_files(dir: &Path) -> std::io::Result<Vec<LogFileInfo>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let file = entry.file_name().to_string_lossy().into_owned();
        let Some(name) = parse_log_file_name(&file) else {
            continue;
        };

        // Entries are usually symlinks into the pod log tree; follow them.
        let metadata = match tokio::fs::metadata(entry.path()).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(file = %file, error = %e, "Skipping unreadable log file");
                continue;
            }
        };
        let last_modified_secs = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());

        files.push(LogFileInfo {
            file,
            name,
            size: metadata.len(),
            last_modified_secs,
        });
    }

    files.sort_by(|a, b| a.file.cmp(&b.file));
    Ok(files)
}

#[async_trait]
impl Subsystem for LogMetadataService {
    fn name(&self) -> &str {
        "log-metadata"
    }

    fn routes(&self) -> Router {
        Router::new()
            .route(LOG_METADATA_PATH, get(get_log_metadata))
            .with_state(self.clone())
    }

    async fn shutdown(&self) -> Result<(), HookError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Log metadata service already shut down");
        } else {
            tracing::info!("Log metadata service shut down");
        }
        Ok(())
    }
}

async fn get_log_metadata(State(service): State<LogMetadataService>) -> Response {
    if service.is_closed() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "service is shutting down" })),
        )
            .into_response();
    }

    match service.list().await {
        Ok(files) => Json(LogMetadataResponse {
            node_name: service.inner.node_name.clone(),
            files,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, logs_dir = %service.inner.logs_dir.display(), "Failed to list log files");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "failed to list log files" })),
            )
                .into_response()
        }
    }
}
