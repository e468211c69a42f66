//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::errors::{BridgeError, DeployError, GatewayError, MigrationError};
use crate::http::gateway::DeployGateway;
use crate::migrate::migrator::MigrationCursor;
use crate::models::deployment::DeploymentRecord;
use crate::preview::url_map::{frontend_redirect, map_to_preview, rewrite_permalink, ContentLanguage};
use crate::rewrite::ReplacementSpec;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error returned by handlers, rendered as `{ success: false, message }`
#[derive(Debug)]
pub struct ApiError(BridgeError);

impl<E> From<E> for ApiError
where
    E: Into<BridgeError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            BridgeError::Deploy(DeployError::AlreadyDeploying)
            | BridgeError::Migration(MigrationError::AlreadyRunning) => StatusCode::CONFLICT,
            BridgeError::Deploy(DeployError::InvalidConfiguration(_))
            | BridgeError::Deploy(DeployError::NotConfigured(_))
            | BridgeError::Deploy(DeployError::Gateway(GatewayError::NotConfigured(_)))
            | BridgeError::Gateway(GatewayError::NotConfigured(_))
            | BridgeError::Migration(MigrationError::InvalidInput(_))
            | BridgeError::ValidationError(_) => StatusCode::BAD_REQUEST,
            BridgeError::Gateway(GatewayError::NoData)
            | BridgeError::Migration(MigrationError::NoPendingUpdate)
            | BridgeError::NotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::Deploy(DeployError::Gateway(_)) | BridgeError::Gateway(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected ({}): {}", status.as_u16(), self.0);
        }
        let body = ActionResponse {
            success: false,
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Outcome of an operator action
#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "vercelwp".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

// ================================= DEPLOYMENTS ================================== //

/// Trigger a build and start tracking it
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiError> {
    state.machine.request_deploy().await?;
    Ok(Json(ActionResponse {
        success: true,
        message: "Deployment triggered".to_string(),
    }))
}

/// Current tracking state for the operator UI
pub async fn deploy_status_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.machine.snapshot())
}

#[derive(Debug, Deserialize)]
pub struct DeploymentsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DeploymentsResponse {
    pub deployments: Vec<DeploymentRecord>,
    pub total: usize,
}

/// Recent deployments, newest first
pub async fn deployments_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<DeploymentsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let deployments = state.gateway.list_deployments(query.limit).await?;
    Ok(Json(DeploymentsResponse {
        total: deployments.len(),
        deployments,
    }))
}

/// Most recent deployment, straight from the provider
pub async fn latest_deployment_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.gateway.get_latest_deployment().await?))
}

/// Provider health
pub async fn service_status_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.gateway.get_service_status().await?))
}

/// Drop cached provider responses
pub async fn clear_cache_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.gateway.invalidate();
    Json(ActionResponse {
        success: true,
        message: "Cache cleared".to_string(),
    })
}

// ================================== MIGRATION =================================== //

/// Count records that would be rewritten
pub async fn migration_preview_handler(
    State(state): State<Arc<ServerState>>,
    Json(spec): Json<ReplacementSpec>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.migrator.preview(&spec).await?))
}

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    #[serde(flatten)]
    pub spec: ReplacementSpec,
    /// Cursor returned by a previous partial run
    #[serde(default)]
    pub cursor: Option<MigrationCursor>,
}

/// Rewrite matching records, one bounded run at a time
pub async fn migration_apply_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ApplyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state
        .migrator
        .apply_from(&request.spec, request.cursor)
        .await?;

    if report.total_changed > 0 {
        if let Some(file) = &state.content_file {
            state.content.save(file).await?;
        }
    }
    Ok(Json(report))
}

/// Make the recorded canonical URL change effective
pub async fn canonical_apply_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiError> {
    let applied = state.migrator.apply_pending_canonical_update().await?;
    info!("Canonical URL changed to {}", applied.new_url);
    Ok(Json(applied))
}

// =================================== PREVIEW ==================================== //

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct UrlResponse {
    pub url: String,
}

/// Preview link for an authoring URL
pub async fn preview_url_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<PreviewQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let site = state.site.load().await?;
    Ok(Json(UrlResponse {
        url: map_to_preview(&query.url, &site, state.clock.now()),
    }))
}

#[derive(Debug, Deserialize)]
pub struct PermalinkQuery {
    pub url: String,
    pub lang: Option<String>,
    pub primary_lang: Option<String>,
}

/// Published permalink for an authoring permalink
pub async fn permalink_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<PermalinkQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let site = state.site.load().await?;
    let language = match (query.lang, query.primary_lang) {
        (Some(code), Some(primary)) => Some(ContentLanguage::new(code, primary)),
        _ => None,
    };
    Ok(Json(UrlResponse {
        url: rewrite_permalink(&query.url, &site, language.as_ref()),
    }))
}

#[derive(Debug, Deserialize)]
pub struct RedirectQuery {
    pub host: String,
    #[serde(default = "default_request_uri")]
    pub uri: String,
}

fn default_request_uri() -> String {
    "/".to_string()
}

#[derive(Debug, Serialize)]
pub struct RedirectResponse {
    /// 301 target, absent when the visitor is already on it
    pub location: Option<String>,
}

/// Front-end redirect target for a visitor of the authoring host
pub async fn redirect_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<RedirectQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let site = state.site.load().await?;
    Ok(Json(RedirectResponse {
        location: frontend_redirect(&query.host, &query.uri, &site),
    }))
}
