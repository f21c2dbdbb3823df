//! Admin HTTP surface: `GET /health` and `GET /metrics`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::health::HealthReport;
use crate::switchyard::Switchyard;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The router being observed.
    pub switchyard: Arc<Switchyard>,
    /// Prometheus handle, absent when no recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// HTTP server exposing router health and metrics.
pub struct AdminServer {
    state: AppState,
}

impl AdminServer {
    /// Server over `switchyard`.
    pub fn new(switchyard: Arc<Switchyard>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            state: AppState {
                switchyard,
                metrics,
            },
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
    }

    /// Bind `addr` and serve until `cancel` fires.
    pub async fn serve(&self, addr: SocketAddr, cancel: CancellationToken) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "admin server listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.switchyard.health())
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
