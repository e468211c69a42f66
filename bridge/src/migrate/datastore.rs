//! Content tables the migrator scans and updates

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::{BridgeError, MigrationError};
use crate::filesys::file::File;

/// Logical content tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Posts,
    PostMeta,
    Comments,
    Options,
}

impl Table {
    /// Scan order of a migration run
    pub const ALL: [Table; 4] = [Table::Posts, Table::PostMeta, Table::Comments, Table::Options];
}

/// One row: an id, an optional name (meta key or option name) and its text columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    pub fields: BTreeMap<String, String>,
}

impl Record {
    pub fn new(id: u64, key: Option<&str>, fields: &[(&str, &str)]) -> Self {
        Self {
            id,
            key: key.map(str::to_string),
            fields: fields
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        }
    }

    pub fn key(&self) -> &str {
        self.key.as_deref().unwrap_or_default()
    }
}

/// Keyset scan over records containing any of `needles`
#[derive(Debug, Clone)]
pub struct ScanQuery {
    pub table: Table,
    /// Only records with a greater id
    pub after_id: u64,
    pub limit: usize,
    pub needles: Vec<String>,
    pub case_insensitive: bool,
}

impl ScanQuery {
    pub fn matches(&self, record: &Record) -> bool {
        record.fields.values().any(|value| {
            if self.case_insensitive {
                let value = value.to_ascii_lowercase();
                self.needles
                    .iter()
                    .any(|n| value.contains(&n.to_ascii_lowercase()))
            } else {
                self.needles.iter().any(|n| value.contains(n.as_str()))
            }
        })
    }
}

/// Storage holding the content to migrate
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Matching records ordered by ascending id
    async fn scan(&self, query: &ScanQuery) -> Result<Vec<Record>, MigrationError>;

    /// Overwrite the given columns of one record
    async fn update(
        &self,
        table: Table,
        id: u64,
        fields: BTreeMap<String, String>,
    ) -> Result<(), MigrationError>;
}

/// In-memory datastore, loadable from and savable to a JSON snapshot
#[derive(Default)]
pub struct MemoryDatastore {
    tables: RwLock<BTreeMap<Table, BTreeMap<u64, Record>>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot, empty when the file does not exist
    pub async fn load(file: &File) -> Result<Self, BridgeError> {
        let snapshot: BTreeMap<Table, Vec<Record>> = file.read_json_opt().await?.unwrap_or_default();
        let tables = snapshot
            .into_iter()
            .map(|(table, records)| (table, records.into_iter().map(|r| (r.id, r)).collect()))
            .collect();
        Ok(Self {
            tables: RwLock::new(tables),
        })
    }

    /// Write every table to a snapshot file
    pub async fn save(&self, file: &File) -> Result<(), BridgeError> {
        let snapshot: BTreeMap<Table, Vec<Record>> = self
            .tables
            .read()
            .await
            .iter()
            .map(|(table, records)| (*table, records.values().cloned().collect()))
            .collect();
        file.write_json(&snapshot).await
    }

    pub async fn insert(&self, table: Table, record: Record) {
        self.tables
            .write()
            .await
            .entry(table)
            .or_default()
            .insert(record.id, record);
    }

    pub async fn get(&self, table: Table, id: u64) -> Option<Record> {
        self.tables
            .read()
            .await
            .get(&table)
            .and_then(|records| records.get(&id))
            .cloned()
    }

    pub async fn len(&self, table: Table) -> usize {
        self.tables
            .read()
            .await
            .get(&table)
            .map_or(0, |records| records.len())
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn scan(&self, query: &ScanQuery) -> Result<Vec<Record>, MigrationError> {
        let tables = self.tables.read().await;
        let Some(records) = tables.get(&query.table) else {
            return Ok(Vec::new());
        };
        Ok(records
            .range(query.after_id.saturating_add(1)..)
            .map(|(_, record)| record)
            .filter(|record| query.matches(record))
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn update(
        &self,
        table: Table,
        id: u64,
        fields: BTreeMap<String, String>,
    ) -> Result<(), MigrationError> {
        let mut tables = self.tables.write().await;
        let record = tables
            .get_mut(&table)
            .and_then(|records| records.get_mut(&id))
            .ok_or_else(|| MigrationError::Store(format!("{:?} record {} not found", table, id)))?;
        debug!("Updating {:?} record {}", table, id);
        record.fields.extend(fields);
        Ok(())
    }
}
