//! Durable "deployment in progress" marker that survives a restart

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::errors::BridgeError;
use crate::filesys::file::File;

pub const IN_PROGRESS_KEY: &str = "deployment_in_progress";
pub const START_TIME_KEY: &str = "deployment_start_time";

/// Durable key/value storage shared across restarts.
///
/// Writes of several entries must land together.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, BridgeError>;

    async fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), BridgeError>;

    async fn remove_many(&self, keys: &[&str]) -> Result<(), BridgeError>;
}

/// Session store persisted as a JSON object
pub struct FileSessionStore {
    file: File,
    lock: RwLock<()>,
}

impl FileSessionStore {
    pub fn new(file: File) -> Self {
        Self {
            file,
            lock: RwLock::new(()),
        }
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>, BridgeError> {
        match self.file.read_json_opt().await {
            Ok(values) => Ok(values.unwrap_or_default()),
            // An unreadable file is the same as a corrupted session: start over
            Err(BridgeError::JsonError(e)) => {
                warn!("Session file is not valid JSON, ignoring it: {}", e);
                Ok(BTreeMap::new())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>, BridgeError> {
        let _guard = self.lock.read().await;
        Ok(self.read_all().await?.remove(key))
    }

    async fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), BridgeError> {
        let _guard = self.lock.write().await;
        let mut values = self.read_all().await?;
        for (key, value) in entries {
            values.insert(key.to_string(), value.to_string());
        }
        self.file.write_json(&values).await
    }

    async fn remove_many(&self, keys: &[&str]) -> Result<(), BridgeError> {
        let _guard = self.lock.write().await;
        let mut values = self.read_all().await?;
        for key in keys {
            values.remove(*key);
        }
        if values.is_empty() {
            return self.file.delete().await;
        }
        self.file.write_json(&values).await
    }
}

/// In-memory session store
#[derive(Default)]
pub struct MemorySessionStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>, BridgeError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), BridgeError> {
        let mut values = self.values.write().await;
        for (key, value) in entries {
            values.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn remove_many(&self, keys: &[&str]) -> Result<(), BridgeError> {
        let mut values = self.values.write().await;
        for key in keys {
            values.remove(*key);
        }
        Ok(())
    }
}

/// What was found in durable storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSnapshot {
    /// No deployment was being tracked
    Absent,

    /// A deployment was being tracked since `started_at`
    Active { started_at: DateTime<Utc> },

    /// The two keys are out of sync or unparsable
    Corrupted,
}

/// Persisted deployment session
#[derive(Clone)]
pub struct PersistentSession {
    store: Arc<dyn SessionStore>,
}

impl PersistentSession {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Persist an active session started at `started_at`
    pub async fn save(&self, started_at: DateTime<Utc>) -> Result<(), BridgeError> {
        let start = started_at.to_rfc3339_opts(SecondsFormat::Millis, true);
        debug!("Persisting deployment session started at {}", start);
        self.store
            .set_many(&[(IN_PROGRESS_KEY, "true"), (START_TIME_KEY, &start)])
            .await
    }

    /// Read the persisted session
    pub async fn load(&self) -> Result<SessionSnapshot, BridgeError> {
        let in_progress = self.store.get(IN_PROGRESS_KEY).await?;
        let start_time = self.store.get(START_TIME_KEY).await?;

        let snapshot = match (in_progress.as_deref(), start_time) {
            (None, None) => SessionSnapshot::Absent,
            (Some("true"), Some(start)) => match DateTime::parse_from_rfc3339(start.trim()) {
                Ok(started_at) => SessionSnapshot::Active {
                    started_at: started_at.with_timezone(&Utc),
                },
                Err(_) => SessionSnapshot::Corrupted,
            },
            _ => SessionSnapshot::Corrupted,
        };

        Ok(snapshot)
    }

    /// Remove both keys
    pub async fn clear(&self) -> Result<(), BridgeError> {
        debug!("Clearing persisted deployment session");
        self.store
            .remove_many(&[IN_PROGRESS_KEY, START_TIME_KEY])
            .await
    }

    /// A session older than `max_age` is considered abandoned
    pub fn is_stale(started_at: DateTime<Utc>, now: DateTime<Utc>, max_age: Duration) -> bool {
        match (now - started_at).to_std() {
            Ok(age) => age > max_age,
            // Start time in the future: clock skew, not stale
            Err(_) => false,
        }
    }
}
