//! Admin/introspection HTTP API.
//!
//! A small axum router exposing liveness, readiness and lock-protected
//! deployment counters. This surface is read-only; deployment mutations
//! arrive through the reconciliation driver, not HTTP.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tracing::info;

use crate::config::Settings;
use crate::errors::{Error, Result};
use crate::xds::GatewayController;

pub fn admin_router(controller: Arc<GatewayController>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(controller)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

async fn status(State(controller): State<Arc<GatewayController>>) -> impl IntoResponse {
    let stats = controller.stats();
    (StatusCode::OK, Json(json!({ "deployment": stats })))
}

/// Run the admin HTTP server until the process shuts down.
pub async fn start_admin_server(
    settings: &Settings,
    controller: Arc<GatewayController>,
) -> Result<()> {
    let addr = format!("{}:{}", settings.admin.bind_address, settings.admin.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::transport(format!("failed to bind admin server on {addr}: {e}")))?;
    info!(address = %addr, "Starting admin server");
    axum::serve(listener, admin_router(controller))
        .await
        .map_err(|e| Error::transport(format!("admin server failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[tokio::test]
    async fn status_reports_deployment_counts() {
        use tower::ServiceExt;

        let controller = Arc::new(GatewayController::new(Arc::new(Settings::default())));
        let router = admin_router(controller);
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/status")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
