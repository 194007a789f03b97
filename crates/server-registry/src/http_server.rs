//! HTTP server for the Prometheus metrics and status endpoints.

use crate::metrics::MetricsRegistry;
use crate::poller::DiscoveryPoller;
use crate::queue::TaskQueue;
use crate::store::RegistryStore;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use prometheus_client::encoding::text::encode;
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<MetricsRegistry>,
    pub store: Arc<dyn RegistryStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub poller: Arc<DiscoveryPoller>,
}

/// Body of `GET /status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub last_successful_discovery: Option<DateTime<Utc>>,
    pub online: u64,
    pub offline: u64,
    pub queue_pending: usize,
}

/// Serves `/metrics` and `/status`
pub struct MetricsServer {
    state: AppState,
    listen_addr: String,
}

impl MetricsServer {
    /// Create a new metrics server
    pub fn new(state: AppState, listen_addr: String) -> Self {
        Self { state, listen_addr }
    }

    /// Bind and serve until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) -> std::io::Result<()> {
        info!(listen_addr = %self.listen_addr, "Starting metrics HTTP server");

        let app = router(self.state);

        let listener = TcpListener::bind(&self.listen_addr).await?;
        info!(listen_addr = %self.listen_addr, "Metrics server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Metrics server stopped");
        Ok(())
    }
}

/// Build the endpoint router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/status", get(status_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Handler for /metrics endpoint
async fn metrics_handler(State(state): State<AppState>) -> Response {
    // Gauges derived from the store are refreshed on scrape
    match state.store.count_by_status().await {
        Ok(counts) => state.registry.update_records_by_status(counts),
        Err(e) => warn!(error = %e, "Failed to count records for metrics"),
    }
    state.registry.update_queue_pending(state.queue.pending());

    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &state.registry.registry) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}

/// Handler for /status endpoint
async fn status_handler(State(state): State<AppState>) -> Response {
    match state.store.count_by_status().await {
        Ok(counts) => Json(StatusResponse {
            last_successful_discovery: state.poller.last_success(),
            online: counts.online,
            offline: counts.offline,
            queue_pending: state.queue.pending(),
        })
        .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to read store status");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Store unavailable: {}", e),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MockMasterDirectory;
    use crate::dispatcher::DispatchBatcher;
    use crate::queue::ChannelQueue;
    use crate::store::MemoryStore;
    use crate::store::test_support::record;
    use crate::types::{RetryPolicy, Status};
    use axum::body::to_bytes;

    async fn state() -> AppState {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert(&record("10.0.0.1:27015", Status::Online))
            .await
            .unwrap();
        store
            .upsert(&record("10.0.0.2:27015", Status::Offline))
            .await
            .unwrap();

        let queue = Arc::new(ChannelQueue::new(10));
        let dispatcher = Arc::new(DispatchBatcher::new(
            queue.clone(),
            100,
            RetryPolicy::default(),
            None,
        ));
        let poller = Arc::new(DiscoveryPoller::new(
            Arc::new(MockMasterDirectory::new()),
            dispatcher,
            "\\appid\\730".to_string(),
            None,
        ));

        AppState {
            registry: Arc::new(MetricsRegistry::new()),
            store,
            queue,
            poller,
        }
    }

    #[tokio::test]
    async fn test_metrics_handler() {
        let response = metrics_handler(State(state().await)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("registry_records_by_status{status=\"online\"} 1"));
        assert!(text.contains("registry_records_by_status{status=\"offline\"} 1"));
    }

    #[tokio::test]
    async fn test_status_handler() {
        let response = status_handler(State(state().await)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["online"], 1);
        assert_eq!(json["offline"], 1);
        assert!(json["last_successful_discovery"].is_null());
    }

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let server = MetricsServer::new(state().await, "127.0.0.1:0".to_string());
        assert_eq!(server.listen_addr, "127.0.0.1:0");
    }
}
