//! Sensitive configuration storage
//!
//! Encryption at rest is the concern of whatever backs the store; the file
//! store only restricts permissions to the owner.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;

use crate::errors::BridgeError;
use crate::filesys::file::File;

/// Names of the sensitive values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretKey {
    WebhookAddress,
    ApiKey,
    ProjectId,
}

impl SecretKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretKey::WebhookAddress => "webhook_address",
            SecretKey::ApiKey => "vercel_api_key",
            SecretKey::ProjectId => "vercel_site_id",
        }
    }
}

/// Opaque get/set of sensitive configuration values
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Get a value, `None` when unset or empty
    async fn get(&self, key: SecretKey) -> Result<Option<SecretString>, BridgeError>;

    /// Set or clear a value
    async fn set(&self, key: SecretKey, value: Option<SecretString>) -> Result<(), BridgeError>;
}

/// Secret store backed by a JSON file with owner-only permissions
pub struct FileSecretStore {
    file: File,
    lock: RwLock<()>,
}

impl FileSecretStore {
    pub fn new(file: File) -> Self {
        Self {
            file,
            lock: RwLock::new(()),
        }
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>, BridgeError> {
        Ok(self.file.read_json_opt().await?.unwrap_or_default())
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, key: SecretKey) -> Result<Option<SecretString>, BridgeError> {
        let _guard = self.lock.read().await;
        let values = self.read_all().await?;
        Ok(values
            .get(key.as_str())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(|v| SecretString::from(v.to_string())))
    }

    async fn set(&self, key: SecretKey, value: Option<SecretString>) -> Result<(), BridgeError> {
        let _guard = self.lock.write().await;
        let mut values = self.read_all().await?;
        match value {
            Some(secret) => {
                values.insert(key.as_str().to_string(), secret.expose_secret().to_string());
            }
            None => {
                values.remove(key.as_str());
            }
        }
        self.file.write_json(&values).await?;
        self.file.set_permissions_600().await
    }
}

/// In-memory secret store
#[derive(Default)]
pub struct MemorySecretStore {
    values: RwLock<HashMap<SecretKey, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding the given values
    pub fn with_values(values: &[(SecretKey, &str)]) -> Self {
        let map = values
            .iter()
            .map(|(key, value)| (*key, value.to_string()))
            .collect();
        Self {
            values: RwLock::new(map),
        }
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, key: SecretKey) -> Result<Option<SecretString>, BridgeError> {
        let values = self.values.read().await;
        Ok(values
            .get(&key)
            .filter(|v| !v.trim().is_empty())
            .map(|v| SecretString::from(v.trim().to_string())))
    }

    async fn set(&self, key: SecretKey, value: Option<SecretString>) -> Result<(), BridgeError> {
        let mut values = self.values.write().await;
        match value {
            Some(secret) => {
                values.insert(key, secret.expose_secret().to_string());
            }
            None => {
                values.remove(&key);
            }
        }
        Ok(())
    }
}
