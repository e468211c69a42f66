//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::errors::BridgeError;
use crate::server::handlers::{
    canonical_apply_handler, clear_cache_handler, deploy_handler, deploy_status_handler,
    deployments_handler, health_handler, latest_deployment_handler, migration_apply_handler,
    migration_preview_handler, permalink_handler, preview_url_handler, redirect_handler,
    service_status_handler, version_handler,
};
use crate::server::state::ServerState;
use crate::storage::settings::ServerSettings;

/// Build the operator API router
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployments
        .route("/deploy", post(deploy_handler))
        .route("/deploy/status", get(deploy_status_handler))
        .route("/deployments", get(deployments_handler))
        .route("/deployments/latest", get(latest_deployment_handler))
        .route("/services/status", get(service_status_handler))
        .route("/cache/clear", post(clear_cache_handler))
        // Content migration
        .route("/migration/preview", post(migration_preview_handler))
        .route("/migration/apply", post(migration_apply_handler))
        .route("/migration/canonical/apply", post(canonical_apply_handler))
        // Preview and published URLs
        .route("/preview/url", get(preview_url_handler))
        .route("/preview/permalink", get(permalink_handler))
        .route("/preview/redirect", get(redirect_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    settings: &ServerSettings,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), BridgeError>>, BridgeError> {
    let app = router(state);

    let addr = format!("{}:{}", settings.host, settings.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| BridgeError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| BridgeError::ServerError(e.to_string()))
    });

    Ok(handle)
}
