//! Health and metrics HTTP endpoints.
//!
//! - `GET /health`: liveness, 200 while the process runs
//! - `GET /ready`: readiness, 200 once the gRPC listener is bound and until
//!   shutdown begins
//! - `GET /metrics`: Prometheus text format

use axum::{extract::State, http::StatusCode, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Readiness flag shared between `main` and the probe handlers.
#[derive(Debug, Default)]
pub struct HealthState {
    ready: AtomicBool,
}

impl HealthState {
    /// New state, not yet ready.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Called when shutdown starts so load balancers stop routing new streams.
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Router with `/health` and `/ready`.
pub fn health_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(state)
}

/// Router with `/metrics`, rendering from the installed Prometheus recorder.
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(handle)
}

/// Full operational router served on the health address.
pub fn operational_router(state: Arc<HealthState>, handle: PrometheusHandle) -> Router {
    health_router(state)
        .merge(metrics_router(handle))
        .layer(TraceLayer::new_for_http())
}

async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[tracing::instrument(skip_all, name = "chat.metrics.scrape")]
async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
