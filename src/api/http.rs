//! HTTP API Server
//!
//! Read-only REST endpoints for health checks, node status, counters and
//! placement lookups.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::{ApiConfig, PlacementSalt};
use crate::error::{Error, Result};
use crate::node::{NodeContext, ShutdownSignal};
use crate::store::validate_filename;

/// Shared application state
pub struct AppState {
    pub ctx: Arc<NodeContext>,
    pub started: Instant,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server for a node
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        let config = ctx.config.api.clone();
        let state = Arc::new(AppState {
            ctx,
            started: Instant::now(),
        });

        Self { config, state }
    }

    /// Create the router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(handle_health))
            .route("/status", get(handle_status))
            .route("/metrics", get(handle_metrics))
            .route("/placement/:filename", get(handle_placement))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state))
    }

    /// Bind the configured address and serve until shutdown
    pub async fn start(&self, shutdown: ShutdownSignal) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let listener = TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener, mut shutdown: ShutdownSignal) -> Result<()> {
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Response Types ============

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub node_id: String,
}

/// Status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub node_id: String,
    pub bind_address: String,
    pub members: Vec<String>,
    pub replication_factor: usize,
    pub placement_salt: PlacementSalt,
    pub file_count: usize,
    pub cache_entries: usize,
    pub uptime_seconds: u64,
}

/// Placement lookup response
#[derive(Debug, Serialize, Deserialize)]
pub struct PlacementResponse {
    pub filename: String,
    pub primary: String,
    pub responsible: Vec<String>,
    pub held_locally: bool,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// ============ Handlers ============

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        node_id: state.ctx.node_id().to_string(),
    })
}

async fn handle_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ctx = &state.ctx;

    let file_count = match ctx.store.list_files().await {
        Ok(files) => files.len(),
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                    code: "STORE_UNAVAILABLE".to_string(),
                }),
            )
                .into_response();
        }
    };

    Json(StatusResponse {
        node_id: ctx.node_id().to_string(),
        bind_address: ctx.config.node.bind_address.clone(),
        members: ctx.placement.members().to_vec(),
        replication_factor: ctx.placement.replication_factor(),
        placement_salt: ctx.config.cluster.placement_salt,
        file_count,
        cache_entries: ctx.checksums.len(),
        uptime_seconds: state.started.elapsed().as_secs(),
    })
    .into_response()
}

async fn handle_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.ctx.metrics.snapshot())
}

async fn handle_placement(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = validate_filename(&filename) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.to_string(),
                code: "INVALID_FILENAME".to_string(),
            }),
        )
            .into_response();
    }

    let responsible = state.ctx.responsible(&filename);
    Json(PlacementResponse {
        primary: responsible[0].clone(),
        held_locally: state.ctx.store.exists(&filename).await,
        responsible,
        filename,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::shutdown_channel;
    use crate::testing::start_cluster;

    async fn serve(ctx: Arc<NodeContext>) -> (String, tokio::sync::watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (tx, signal) = shutdown_channel();
        tokio::spawn(async move { HttpServer::new(ctx).serve(listener, signal).await });
        (base, tx)
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let cluster = start_cluster(&["node1", "node2", "node3"], 2).await;
        cluster[0].write("a.txt", b"a");
        cluster[0].write("b.txt", b"b");
        let (base, _shutdown) = serve(Arc::clone(&cluster[0].ctx)).await;

        let health: HealthResponse = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(health.healthy);
        assert_eq!(health.node_id, "node1");

        let status: StatusResponse = reqwest::get(format!("{}/status", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status.members, vec!["node1", "node2", "node3"]);
        assert_eq!(status.replication_factor, 2);
        assert_eq!(status.file_count, 2);
        assert_eq!(status.placement_salt, PlacementSalt::Shared);
    }

    #[tokio::test]
    async fn test_placement_lookup() {
        let cluster = start_cluster(&["node1", "node2", "node3", "node4"], 2).await;
        cluster[0].write("report.csv", b"x");
        let (base, _shutdown) = serve(Arc::clone(&cluster[0].ctx)).await;

        let placement: PlacementResponse = reqwest::get(format!("{}/placement/report.csv", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(placement.responsible, cluster[0].ctx.responsible("report.csv"));
        assert_eq!(placement.primary, placement.responsible[0]);
        assert!(placement.held_locally);

        let response = reqwest::get(format!("{}/placement/.hidden", base)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: ErrorResponse = response.json().await.unwrap();
        assert_eq!(body.code, "INVALID_FILENAME");
    }

    #[tokio::test]
    async fn test_metrics_snapshot() {
        let cluster = start_cluster(&["node1", "node2"], 2).await;
        cluster[1].write("x.bin", b"payload");
        cluster[0].client().request_file("node2", "x.bin").await.unwrap();
        let (base, _shutdown) = serve(Arc::clone(&cluster[0].ctx)).await;

        let metrics: serde_json::Value = reqwest::get(format!("{}/metrics", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(metrics["files_fetched"], 1);
    }
}
