//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cache::gateway::CachedGateway;
use crate::deploy::machine::{DeploymentStateMachine, MachineOptions};
use crate::deploy::session::{FileSessionStore, PersistentSession};
use crate::errors::BridgeError;
use crate::filesys::file::File;
use crate::http::client::HttpClient;
use crate::http::gateway::VercelGateway;
use crate::migrate::datastore::MemoryDatastore;
use crate::migrate::migrator::ContentMigrator;
use crate::rewrite::UrlRewriteEngine;
use crate::storage::layout::StorageLayout;
use crate::storage::secrets::{FileSecretStore, SecretStore};
use crate::storage::settings::Settings;
use crate::storage::site::SiteSettingsStore;
use crate::utils::{Clock, SystemClock};
use crate::workers::poller::PollingPolicy;

/// Main application state
pub struct AppState {
    /// Deployment tracking
    pub machine: Arc<DeploymentStateMachine>,

    /// Provider gateway behind the response cache
    pub gateway: Arc<CachedGateway>,

    /// Content URL migration
    pub migrator: Arc<ContentMigrator>,

    /// Content records the migrator works on
    pub content: Arc<MemoryDatastore>,

    /// Snapshot file backing `content`
    pub content_file: File,

    /// Production and preview URLs
    pub site: Arc<SiteSettingsStore>,

    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(layout: &StorageLayout, settings: &Settings) -> Result<Self, BridgeError> {
        info!("Initializing application state...");

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let secrets: Arc<dyn SecretStore> =
            Arc::new(FileSecretStore::new(layout.secrets_file()));
        let site = Arc::new(SiteSettingsStore::new(layout.site_file()));

        // Provider gateway
        let http_client = HttpClient::new(Duration::from_secs(
            settings.gateway.request_timeout_secs,
        ))?;
        let provider = Arc::new(VercelGateway::new(
            http_client,
            secrets.clone(),
            settings.gateway.clone(),
            clock.clone(),
        ));
        let gateway = Arc::new(CachedGateway::new(
            provider,
            Duration::from_secs(settings.gateway.cache_ttl_secs),
        ));

        // Deployment tracking
        let session = PersistentSession::new(Arc::new(FileSessionStore::new(
            layout.session_file(),
        )));
        let machine = DeploymentStateMachine::new(
            gateway.clone(),
            secrets,
            session,
            PollingPolicy::from_settings(&settings.polling),
            clock.clone(),
            MachineOptions::from_settings(&settings.polling),
        );

        // Content migration
        let content_file = layout.content_file();
        let content = Arc::new(MemoryDatastore::load(&content_file).await?);
        let engine = if settings.migration.json_values {
            UrlRewriteEngine::with_json()
        } else {
            UrlRewriteEngine::new()
        };
        info!("Content rewrite codecs: {:?}", engine.codec_names());
        let migrator = Arc::new(ContentMigrator::new(
            content.clone(),
            engine,
            site.clone(),
            clock.clone(),
            settings.migration.clone(),
        ));

        Ok(Self {
            machine,
            gateway,
            migrator,
            content,
            content_file,
            site,
            clock,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), BridgeError> {
        info!("Shutting down application state...");
        self.machine.shutdown();
        Ok(())
    }
}
