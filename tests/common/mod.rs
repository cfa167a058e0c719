//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use url::Url;

use cluster_agent::cluster::ClusterClient;
use cluster_agent::lifecycle::{AgentSettings, ShutdownDeadline};
use cluster_agent::net::Endpoint;

/// Router with a `/slow` route that takes `delay` and a `/fast` route.
pub fn slow_router(delay: Duration) -> Router {
    Router::new()
        .route(
            "/slow",
            get(move || async move {
                tokio::time::sleep(delay).await;
                "slow"
            }),
        )
        .route("/fast", get(|| async { "fast" }))
}

/// Bind an endpoint on an ephemeral port and start serving `router`.
pub async fn start_endpoint(router: Router) -> Arc<Endpoint> {
    let endpoint = Arc::new(Endpoint::bind("127.0.0.1:0", 64).await.unwrap());
    endpoint.serve(router).unwrap();
    endpoint
}

/// HTTP client that never goes through a proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Issue `GET path` on a background task so the caller can stop the endpoint meanwhile.
#[allow(dead_code)]
pub fn spawn_get(
    addr: SocketAddr,
    path: &'static str,
) -> tokio::task::JoinHandle<Result<String, reqwest::Error>> {
    tokio::spawn(async move {
        client()
            .get(format!("http://{addr}{path}"))
            .send()
            .await?
            .text()
            .await
    })
}

/// Settings for an agent bound to an ephemeral local port.
#[allow(dead_code)]
pub fn agent_settings(logs_dir: &Path, deadline: Duration) -> AgentSettings {
    AgentSettings {
        addr: "127.0.0.1:0".to_string(),
        max_connections: 64,
        container_logs_dir: logs_dir.to_path_buf(),
        deadline: ShutdownDeadline::new(deadline),
        node_name: "node-a".to_string(),
        cluster: ClusterClient::from_parts(Url::parse("https://10.96.0.1").unwrap(), None),
    }
}
