//! Storage directories

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::BridgeError;
use crate::filesys::file::File;

#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory and any missing parents
    pub async fn create(&self) -> Result<(), BridgeError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Remove the directory tree; a missing directory is not an error
    pub async fn delete(&self) -> Result<(), BridgeError> {
        match fs::remove_dir_all(&self.path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Fresh `<prefix>-<uuid>` directory under the system temp dir
    pub async fn create_temp_dir(prefix: &str) -> Result<Dir, BridgeError> {
        let dir = Dir::new(std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4())));
        dir.create().await?;
        Ok(dir)
    }
}
