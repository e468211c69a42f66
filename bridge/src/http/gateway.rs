//! Deployment provider gateway

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::errors::GatewayError;
use crate::http::client::HttpClient;
use crate::models::deployment::{DeploymentListResponse, DeploymentRecord};
use crate::models::status::{ServiceStatus, StatusPageResponse};
use crate::storage::secrets::{SecretKey, SecretStore};
use crate::storage::settings::GatewaySettings;
use crate::utils::Clock;

/// Status page requests give up quickly; the fallback is always available
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote provider operations used by the deployment state machine
#[async_trait]
pub trait DeployGateway: Send + Sync {
    /// POST to the configured build-trigger URL
    async fn trigger_build(&self) -> Result<(), GatewayError>;

    /// Most recent deployment of the configured project
    async fn get_latest_deployment(&self) -> Result<DeploymentRecord, GatewayError>;

    /// Deployments of the configured project, newest first
    async fn list_deployments(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<DeploymentRecord>, GatewayError>;

    /// Provider health. Implementations return a fallback instead of failing.
    async fn get_service_status(&self) -> Result<ServiceStatus, GatewayError>;
}

/// Gateway talking to the Vercel REST API and status page
pub struct VercelGateway {
    http: HttpClient,
    secrets: Arc<dyn SecretStore>,
    settings: GatewaySettings,
    clock: Arc<dyn Clock>,
}

impl VercelGateway {
    pub fn new(
        http: HttpClient,
        secrets: Arc<dyn SecretStore>,
        settings: GatewaySettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            secrets,
            settings,
            clock,
        }
    }

    async fn secret(&self, key: SecretKey) -> Result<Option<SecretString>, GatewayError> {
        self.secrets
            .get(key)
            .await
            .map_err(|e| GatewayError::NotConfigured(format!("{}: {}", key.as_str(), e)))
    }

    async fn credentials(&self) -> Result<(SecretString, SecretString), GatewayError> {
        let api_key = self.secret(SecretKey::ApiKey).await?;
        let project_id = self.secret(SecretKey::ProjectId).await?;
        match (api_key, project_id) {
            (Some(api_key), Some(project_id)) => Ok((api_key, project_id)),
            _ => Err(GatewayError::NotConfigured(
                "API key and project id are required".to_string(),
            )),
        }
    }

    /// Fetch every deployment the provider returns, newest first
    async fn fetch_deployments(&self) -> Result<Vec<DeploymentRecord>, GatewayError> {
        let (api_key, project_id) = self.credentials().await?;

        let mut url = url::Url::parse(&self.settings.deployments_url)
            .map_err(|e| GatewayError::NotConfigured(format!("deployments URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("projectId", project_id.expose_secret());

        let response: DeploymentListResponse = self
            .http
            .get_json(
                url.as_str(),
                Some(&api_key),
                Some(Duration::from_secs(self.settings.request_timeout_secs)),
            )
            .await?;

        let mut records: Vec<DeploymentRecord> = response
            .deployments
            .into_iter()
            .filter_map(|raw| match DeploymentRecord::try_from(raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping unreadable deployment: {}", e);
                    None
                }
            })
            .collect();

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

#[async_trait]
impl DeployGateway for VercelGateway {
    async fn trigger_build(&self) -> Result<(), GatewayError> {
        let webhook = self
            .secret(SecretKey::WebhookAddress)
            .await?
            .ok_or_else(|| GatewayError::NotConfigured("webhook URL".to_string()))?;

        let code = self
            .http
            .post_empty(
                webhook.expose_secret(),
                Duration::from_secs(self.settings.trigger_timeout_secs),
                &[200, 201],
            )
            .await?;

        info!("Build trigger accepted by provider (HTTP {})", code);
        Ok(())
    }

    async fn get_latest_deployment(&self) -> Result<DeploymentRecord, GatewayError> {
        let latest = self
            .fetch_deployments()
            .await?
            .into_iter()
            .next()
            .ok_or(GatewayError::NoData)?;

        debug!("Latest deployment {} is {}", latest.id, latest.state);
        Ok(latest)
    }

    async fn list_deployments(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<DeploymentRecord>, GatewayError> {
        let mut records = self.fetch_deployments().await?;
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn get_service_status(&self) -> Result<ServiceStatus, GatewayError> {
        let now = self.clock.now();
        let response: Result<StatusPageResponse, GatewayError> = self
            .http
            .get_json(&self.settings.status_url, None, Some(STATUS_TIMEOUT))
            .await;

        match response {
            Ok(page) => Ok(page.into_service_status(now)),
            Err(e) => {
                warn!("Status page unavailable, assuming operational: {}", e);
                Ok(ServiceStatus::all_operational(now))
            }
        }
    }
}
