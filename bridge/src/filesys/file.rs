//! JSON state files

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::BridgeError;

/// Path to a state file under the storage layout
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Decode the file, `None` when it does not exist yet
    pub async fn read_json_opt<T: DeserializeOwned>(&self) -> Result<Option<T>, BridgeError> {
        let contents = match fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&contents)?))
    }

    /// Replace the file contents.
    ///
    /// Written to a sibling `.tmp` file first and renamed over the target, so
    /// readers see either the old or the new document.
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), BridgeError> {
        let contents = serde_json::to_vec_pretty(value)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");
        let mut temp = fs::File::create(&temp_path).await?;
        temp.write_all(&contents).await?;
        temp.sync_all().await?;
        drop(temp);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    /// Remove the file; a missing file is not an error
    pub async fn delete(&self) -> Result<(), BridgeError> {
        match fs::remove_file(&self.path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Owner read/write only. No-op off Unix.
    pub async fn set_permissions_600(&self) -> Result<(), BridgeError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        Ok(())
    }
}
