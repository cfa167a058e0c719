//! Startup orchestration.
//!
//! # Responsibilities
//! - Register subsystems with the registry
//! - Bind the endpoint and begin serving
//! - Report the agent as serving
//! - Hand control to the shutdown coordinator and wait for hooks to settle
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal, nothing is retried
//! - Subsystems register before the endpoint serves
//! - Health flips to serving only once requests are being accepted

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tower_http::trace::TraceLayer;

use crate::cluster::ClusterClient;
use crate::config::ClusterAgentConfig;
use crate::health::HealthReporter;
use crate::lifecycle::registry::{RegistryError, ServiceRegistry};
use crate::lifecycle::shutdown::{SettledShutdown, ShutdownCoordinator, ShutdownDeadline};
use crate::net::{Endpoint, EndpointError};
use crate::services::{LogMetadataService, LogRecordsService};

/// Fatal startup errors.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("node name is required (set NODE_NAME or --node-name)")]
    MissingNodeName,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

/// Resolved inputs for startup.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub addr: String,
    pub max_connections: usize,
    pub container_logs_dir: PathBuf,
    pub deadline: ShutdownDeadline,
    pub node_name: String,
    pub cluster: ClusterClient,
}

impl AgentSettings {
    pub fn from_config(config: &ClusterAgentConfig, node_name: String, cluster: ClusterClient) -> Self {
        Self {
            addr: config.addr.clone(),
            max_connections: config.max_connections,
            container_logs_dir: config.container_logs_dir.clone(),
            deadline: config.shutdown_deadline(),
            node_name,
            cluster,
        }
    }
}

/// A serving agent, ready to be shut down.
#[derive(Debug)]
pub struct Agent {
    endpoint: Arc<Endpoint>,
    registry: Arc<ServiceRegistry>,
    health: HealthReporter,
    deadline: ShutdownDeadline,
}

impl Agent {
    /// Build every component and start serving.
    pub async fn bootstrap(settings: AgentSettings) -> Result<Self, StartupError> {
        if settings.node_name.trim().is_empty() {
            return Err(StartupError::MissingNodeName);
        }

        let health = HealthReporter::new();

        let mut registry = ServiceRegistry::new();
        registry.register(Arc::new(LogMetadataService::new(
            &settings.cluster,
            settings.node_name.clone(),
            settings.container_logs_dir.clone(),
        )))?;
        registry.register(Arc::new(LogRecordsService::new(
            settings.container_logs_dir.clone(),
        )))?;
        let registry = Arc::new(registry);

        let endpoint = Arc::new(Endpoint::bind(&settings.addr, settings.max_connections).await?);

        let router = registry
            .router()
            .merge(health.router())
            .layer(TraceLayer::new_for_http());

        tracing::info!(address = %endpoint.local_addr(), "Starting cluster-agent");
        endpoint.serve(router)?;
        health.set_serving();

        Ok(Self {
            endpoint,
            registry,
            health,
            deadline: settings.deadline,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn health(&self) -> &HealthReporter {
        &self.health
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// Serve until `termination` resolves, then shut down.
    ///
    /// Returns once the endpoint is stopped and the subsystem hooks have
    /// finished, or the deadline has passed, whichever comes first.
    pub async fn run_until<F>(self, termination: F) -> SettledShutdown
    where
        F: Future<Output = ()>,
    {
        ShutdownCoordinator::new(self.endpoint, self.registry, self.health, self.deadline)
            .run(termination)
            .await
            .settle()
            .await
    }
}
