//! On-disk layout of the bridge's state

use std::path::PathBuf;

use crate::errors::BridgeError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Every state file lives directly under `base_dir`; logs go to `base_dir/logs`
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn file(&self, name: &str) -> File {
        File::new(self.base_dir.join(name))
    }

    pub fn settings_file(&self) -> File {
        self.file("settings.json")
    }

    /// Webhook URL, API key and project id. Owner-only permissions.
    pub fn secrets_file(&self) -> File {
        self.file("secrets.json")
    }

    /// Authoring, production and preview origins
    pub fn site_file(&self) -> File {
        self.file("site.json")
    }

    pub fn session_file(&self) -> File {
        self.file("session.json")
    }

    /// Snapshot backing the in-memory content store
    pub fn content_file(&self) -> File {
        self.file("content.json")
    }

    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Create the base and log directories
    pub async fn setup(&self) -> Result<(), BridgeError> {
        Dir::new(&self.base_dir).create().await?;
        self.logs_dir().create().await
    }
}

impl Default for StorageLayout {
    /// `$XDG_DATA_HOME/vercelwp`, else `~/.local/share/vercelwp`, else `./.vercelwp`
    fn default() -> Self {
        let base_dir = std::env::var_os("XDG_DATA_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME")
                    .or_else(|| std::env::var_os("USERPROFILE"))
                    .map(|home| PathBuf::from(home).join(".local").join("share"))
            })
            .map(|data| data.join("vercelwp"))
            .unwrap_or_else(|| PathBuf::from(".vercelwp"));

        Self::new(base_dir)
    }
}
