use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub mod captions;
pub mod extract;
pub mod fittings;
pub mod health;
pub mod metrics;

/// Full HTTP surface with the standard middleware stack.
pub fn router(state: AppState, prometheus: Arc<PrometheusHandle>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api/v1/fittings",
            post(fittings::create_fitting).get(fittings::list_fittings),
        )
        .route(
            "/api/v1/fittings/{job_id}",
            get(fittings::get_fitting_status).delete(fittings::delete_fitting),
        )
        .route("/api/v1/captions", post(captions::caption_images))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(prometheus),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
}
