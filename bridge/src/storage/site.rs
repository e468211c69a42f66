//! Site URL settings: authoring origin, production origin, preview origin

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::errors::BridgeError;
use crate::filesys::file::File;
use crate::utils::trim_url;

/// Canonical URL change waiting for operator confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCanonicalUpdate {
    pub old_url: String,
    pub new_url: String,
    pub recorded_at: DateTime<Utc>,
}

/// Site URL settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSettings {
    /// Authoring origin of the CMS install
    #[serde(default)]
    pub home_url: String,

    /// Canonical published origin
    #[serde(default)]
    pub production_url: String,

    /// Origin serving not-yet-canonical builds
    #[serde(default)]
    pub vercel_preview_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_production_url_update: Option<PendingCanonicalUpdate>,
}

impl SiteSettings {
    /// Production URL without trailing slash, `None` when unset
    pub fn production_url(&self) -> Option<&str> {
        Some(trim_url(&self.production_url)).filter(|u| !u.is_empty())
    }

    /// Preview URL without trailing slash, `None` when unset
    pub fn preview_url(&self) -> Option<&str> {
        Some(trim_url(&self.vercel_preview_url)).filter(|u| !u.is_empty())
    }

    /// Authoring URL without trailing slash, `None` when unset
    pub fn home_url(&self) -> Option<&str> {
        Some(trim_url(&self.home_url)).filter(|u| !u.is_empty())
    }
}

/// File-backed site settings with serialized read-modify-write
pub struct SiteSettingsStore {
    file: File,
    lock: Mutex<()>,
}

impl SiteSettingsStore {
    pub fn new(file: File) -> Self {
        Self {
            file,
            lock: Mutex::new(()),
        }
    }

    /// Load settings, defaults when the file does not exist
    pub async fn load(&self) -> Result<SiteSettings, BridgeError> {
        let _guard = self.lock.lock().await;
        Ok(self.file.read_json_opt().await?.unwrap_or_default())
    }

    /// Apply `f` to the stored settings and persist the result
    pub async fn update<F>(&self, f: F) -> Result<SiteSettings, BridgeError>
    where
        F: FnOnce(&mut SiteSettings),
    {
        let _guard = self.lock.lock().await;
        let mut settings: SiteSettings = self.file.read_json_opt().await?.unwrap_or_default();
        f(&mut settings);
        self.file.write_json(&settings).await?;
        Ok(settings)
    }
}
