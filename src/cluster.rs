//! In-cluster API client settings.
//!
//! # Responsibilities
//! - Resolve the API server address from the pod environment
//! - Check the service account token and load the namespace
//!
//! # Design Decisions
//! - Resolution happens once at startup; any missing input is fatal
//! - The token is checked for presence, never retained

use std::path::{Path, PathBuf};

use url::Url;

/// Standard mount point of the pod's service account.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

const HOST_ENV: &str = "KUBERNETES_SERVICE_HOST";
const PORT_ENV: &str = "KUBERNETES_SERVICE_PORT";

/// Error type for cluster client construction.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("not running in a cluster: {0} is not set")]
    MissingEnv(&'static str),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("service account token at {0} is empty")]
    EmptyToken(PathBuf),
    #[error("invalid api server address: {0}")]
    Url(#[from] url::ParseError),
}

/// Handle to the cluster API, as seen from inside a pod.
#[derive(Debug, Clone)]
pub struct ClusterClient {
    api_server: Url,
    namespace: Option<String>,
}

impl ClusterClient {
    /// Resolve the client from the pod environment.
    pub fn in_cluster() -> Result<Self, ClusterError> {
        Self::from_environment(
            std::env::var(HOST_ENV).ok(),
            std::env::var(PORT_ENV).ok(),
            Path::new(SERVICE_ACCOUNT_DIR),
        )
    }

    /// Resolve the client from explicit environment values and a service account directory.
    pub fn from_environment(
        host: Option<String>,
        port: Option<String>,
        service_account_dir: &Path,
    ) -> Result<Self, ClusterError> {
        let host = host
            .filter(|h| !h.is_empty())
            .ok_or(ClusterError::MissingEnv(HOST_ENV))?;
        let port = port
            .filter(|p| !p.is_empty())
            .ok_or(ClusterError::MissingEnv(PORT_ENV))?;

        // IPv6 service hosts need brackets in a URL.
        let authority = if host.contains(':') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        let api_server = Url::parse(&format!("https://{authority}"))?;

        let token_path = service_account_dir.join("token");
        let token = read_trimmed(&token_path)?;
        if token.is_empty() {
            return Err(ClusterError::EmptyToken(token_path));
        }

        let namespace = read_trimmed(&service_account_dir.join("namespace"))
            .ok()
            .filter(|ns| !ns.is_empty());

        Ok(Self {
            api_server,
            namespace,
        })
    }

    pub fn from_parts(api_server: Url, namespace: Option<String>) -> Self {
        Self {
            api_server,
            namespace,
        }
    }

    pub fn api_server(&self) -> &Url {
        &self.api_server
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

fn read_trimmed(path: &Path) -> Result<String, ClusterError> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|source| ClusterError::Io {
            path: path.to_path_buf(),
            source,
        })
}
