//! Metrics HTTP Server
//!
//! Endpoints:
//! - `GET /metrics`: Prometheus text exposition of the response-time gauge
//! - `GET /health`: liveness
//! - `GET /status`: progress of the measurement scheduler as JSON

use crate::metrics::MetricSink;
use crate::scheduler::SchedulerStatus;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use anyhow::Context;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub struct MetricsServerState {
    pub sink: MetricSink,
    pub status: Arc<RwLock<SchedulerStatus>>,
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn get_metrics(State(state): State<Arc<MetricsServerState>>) -> impl IntoResponse {
    match state.sink.gather() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub async fn get_status(State(state): State<Arc<MetricsServerState>>) -> Json<SchedulerStatus> {
    Json(state.status.read().clone())
}

pub fn router(state: Arc<MetricsServerState>) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the metrics listener. Fails when the address is unavailable.
pub async fn bind_metrics_listener(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics endpoint on {}", addr))
}

/// Serve the metrics endpoint until the process exits
pub async fn run_metrics_server(
    listener: TcpListener,
    sink: MetricSink,
    status: Arc<RwLock<SchedulerStatus>>,
) -> anyhow::Result<()> {
    let app = router(Arc::new(MetricsServerState { sink, status }));

    info!(
        "Prometheus metrics server started on {}",
        listener.local_addr()?
    );
    axum::serve(listener, app).await?;

    Ok(())
}
