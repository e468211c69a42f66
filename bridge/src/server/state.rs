//! Server state

use std::sync::Arc;

use crate::cache::gateway::CachedGateway;
use crate::deploy::machine::DeploymentStateMachine;
use crate::filesys::file::File;
use crate::migrate::datastore::MemoryDatastore;
use crate::migrate::migrator::ContentMigrator;
use crate::storage::site::SiteSettingsStore;
use crate::utils::Clock;

/// Server state shared across handlers
pub struct ServerState {
    pub machine: Arc<DeploymentStateMachine>,
    pub gateway: Arc<CachedGateway>,
    pub migrator: Arc<ContentMigrator>,
    pub content: Arc<MemoryDatastore>,
    /// Where migrated content is written back, `None` keeps it in memory
    pub content_file: Option<File>,
    pub site: Arc<SiteSettingsStore>,
    pub clock: Arc<dyn Clock>,
}

impl ServerState {
    pub fn new(
        machine: Arc<DeploymentStateMachine>,
        gateway: Arc<CachedGateway>,
        migrator: Arc<ContentMigrator>,
        content: Arc<MemoryDatastore>,
        content_file: Option<File>,
        site: Arc<SiteSettingsStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            machine,
            gateway,
            migrator,
            content,
            content_file,
            site,
            clock,
        }
    }
}
