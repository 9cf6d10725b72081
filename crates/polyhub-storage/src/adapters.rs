//! Adapter registry store.
//!
//! One record per configured protocol adapter. Records are never deleted
//! while the gateway runs; a disabled adapter keeps its record in
//! `inactive` status.

use crate::error::{Error, Result};
use polyhub_core::storage::StorageBackend;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const TABLE: &str = "adapters";

/// Lifecycle status of an adapter record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterRecordStatus {
    Inactive,
    Active,
    Error,
}

/// A configured protocol adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterRecord {
    /// Unique adapter name.
    pub name: String,
    /// Protocol identifier ("mqtt", "mesh", "scan", ...).
    pub protocol: String,
    pub status: AdapterRecordStatus,
    /// Adapter configuration as provided.
    pub config: Value,
    /// Last activity timestamp (unix millis).
    pub last_seen: Option<i64>,
}

impl AdapterRecord {
    pub fn new(name: impl Into<String>, protocol: impl Into<String>, config: Value) -> Self {
        Self {
            name: name.into(),
            protocol: protocol.into(),
            status: AdapterRecordStatus::Inactive,
            config,
            last_seen: None,
        }
    }
}

/// Persistent adapter record store.
pub struct AdapterStore {
    backend: Arc<dyn StorageBackend>,
}

impl AdapterStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn get_adapter_by_name(&self, name: &str) -> Result<Option<AdapterRecord>> {
        match self.backend.read(TABLE, name)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert or overwrite an adapter record.
    pub fn insert_adapter(&self, record: &AdapterRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.backend.write(TABLE, &record.name, &bytes)?;
        Ok(())
    }

    /// Apply a mutation to an existing record.
    pub fn update_adapter<F>(&self, name: &str, mutate: F) -> Result<AdapterRecord>
    where
        F: FnOnce(&mut AdapterRecord),
    {
        let mut record = self
            .get_adapter_by_name(name)?
            .ok_or_else(|| Error::NotFound(format!("adapter {}", name)))?;
        mutate(&mut record);
        self.insert_adapter(&record)?;
        Ok(record)
    }

    pub fn list_adapters(&self) -> Result<Vec<AdapterRecord>> {
        let mut adapters = Vec::new();
        for (_, bytes) in self.backend.scan(TABLE, "")? {
            adapters.push(serde_json::from_slice::<AdapterRecord>(&bytes)?);
        }
        Ok(adapters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use serde_json::json;

    fn store() -> AdapterStore {
        AdapterStore::new(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn test_insert_and_get() {
        let store = store();
        let record = AdapterRecord::new("mqtt-main", "mqtt", json!({"host": "localhost"}));
        store.insert_adapter(&record).unwrap();

        let loaded = store.get_adapter_by_name("mqtt-main").unwrap().unwrap();
        assert_eq!(loaded.protocol, "mqtt");
        assert_eq!(loaded.status, AdapterRecordStatus::Inactive);
        assert_eq!(loaded.config["host"], "localhost");
    }

    #[test]
    fn test_update_status() {
        let store = store();
        store
            .insert_adapter(&AdapterRecord::new("mesh", "mesh", json!({})))
            .unwrap();

        let updated = store
            .update_adapter("mesh", |r| {
                r.status = AdapterRecordStatus::Active;
                r.last_seen = Some(1234);
            })
            .unwrap();
        assert_eq!(updated.status, AdapterRecordStatus::Active);

        let loaded = store.get_adapter_by_name("mesh").unwrap().unwrap();
        assert_eq!(loaded.last_seen, Some(1234));
    }

    #[test]
    fn test_update_missing() {
        let store = store();
        let result = store.update_adapter("nope", |_| {});
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_list() {
        let store = store();
        store
            .insert_adapter(&AdapterRecord::new("a", "mqtt", json!({})))
            .unwrap();
        store
            .insert_adapter(&AdapterRecord::new("b", "scan", json!({})))
            .unwrap();
        assert_eq!(store.list_adapters().unwrap().len(), 2);
    }
}
