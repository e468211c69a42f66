//! Cached view over a deployment gateway

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::cache::ttl::TtlCache;
use crate::errors::GatewayError;
use crate::http::gateway::DeployGateway;
use crate::models::deployment::DeploymentRecord;
use crate::models::status::ServiceStatus;

/// Gateway decorator caching the service status and the deployment list.
///
/// The latest-deployment lookup drives polling and always goes to the provider.
pub struct CachedGateway {
    inner: Arc<dyn DeployGateway>,
    status: TtlCache<ServiceStatus>,
    deployments: TtlCache<Vec<DeploymentRecord>>,
}

impl CachedGateway {
    pub fn new(inner: Arc<dyn DeployGateway>, ttl: std::time::Duration) -> Self {
        Self {
            inner,
            status: TtlCache::new(ttl),
            deployments: TtlCache::new(ttl),
        }
    }

    /// Drop both cached values
    pub fn invalidate(&self) {
        self.status.clear();
        self.deployments.clear();
    }
}

#[async_trait]
impl DeployGateway for CachedGateway {
    async fn trigger_build(&self) -> Result<(), GatewayError> {
        self.inner.trigger_build().await?;
        // A new build makes the cached list stale
        self.deployments.clear();
        Ok(())
    }

    async fn get_latest_deployment(&self) -> Result<DeploymentRecord, GatewayError> {
        self.inner.get_latest_deployment().await
    }

    async fn list_deployments(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<DeploymentRecord>, GatewayError> {
        let all = match self.deployments.get() {
            Some(cached) => {
                debug!("Using cached deployments data");
                cached
            }
            None => {
                let fresh = self.inner.list_deployments(None).await?;
                self.deployments.insert(fresh.clone());
                fresh
            }
        };

        Ok(match limit {
            Some(limit) => all.into_iter().take(limit).collect(),
            None => all,
        })
    }

    async fn get_service_status(&self) -> Result<ServiceStatus, GatewayError> {
        if let Some(cached) = self.status.get() {
            debug!("Using cached service status");
            return Ok(cached);
        }
        let fresh = self.inner.get_service_status().await?;
        self.status.insert(fresh.clone());
        Ok(fresh)
    }
}
