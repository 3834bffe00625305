//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  — Prometheus text format
//!   GET /healthz  — Liveness probe (always 200 if process is running)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::encoding::{text::encode, EncodeLabelSet};
use prometheus_client::metrics::{counter::Counter, family::Family, gauge::Gauge};
use prometheus_client::registry::Registry;
use std::sync::Arc;

use distorage_core::Operation;

use crate::service::Outcome;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct RequestLabels {
    operation: &'static str,
    outcome: &'static str,
}

/// Request counters and the open-connection gauge.
#[derive(Clone, Debug, Default)]
pub struct NodeMetrics {
    requests: Family<RequestLabels, Counter>,
    open_connections: Gauge,
}

impl NodeMetrics {
    /// Create and register in `registry`.
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "distorage_node_requests",
            "Node requests by operation and outcome",
            metrics.requests.clone(),
        );
        registry.register(
            "distorage_node_open_connections",
            "WebSocket connections currently being served",
            metrics.open_connections.clone(),
        );
        metrics
    }

    pub fn record(&self, operation: Operation, outcome: Outcome) {
        self.requests
            .get_or_create(&RequestLabels {
                operation: operation.path_segment(),
                outcome: outcome.as_str(),
            })
            .inc();
    }

    pub fn requests(&self, operation: Operation, outcome: Outcome) -> u64 {
        self.requests
            .get_or_create(&RequestLabels {
                operation: operation.path_segment(),
                outcome: outcome.as_str(),
            })
            .get()
    }

    pub fn open_connections(&self) -> i64 {
        self.open_connections.get()
    }

    /// Count a connection as open until the guard drops.
    pub fn connection(&self) -> ConnectionGuard {
        self.open_connections.inc();
        ConnectionGuard {
            gauge: self.open_connections.clone(),
        }
    }
}

/// Scoped open-connection marker. Released on every exit path.
#[derive(Debug)]
pub struct ConnectionGuard {
    gauge: Gauge,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

/// Serve Prometheus metrics and health endpoints on `addr` (e.g. "127.0.0.1:9105")
pub async fn serve(addr: String, registry: Arc<Registry>) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(registry);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
