//! Device store.
//!
//! Devices are keyed by `protocol:device_id` so the same external id can
//! exist under different protocols. State updates go through a per-device
//! async mutex so concurrent partial updates merge instead of clobbering
//! each other.

use crate::error::{Error, Result};
use dashmap::DashMap;
use polyhub_core::storage::StorageBackend;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

const TABLE: &str = "devices";

/// A device known to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Internal id.
    pub id: String,
    /// Protocol-scoped external identifier.
    pub device_id: String,
    /// Protocol the device speaks ("mqtt", "mesh", "scan", ...).
    pub protocol: String,
    /// Device type ("sensor", "switch", "unknown", ...).
    pub device_type: String,
    /// Display name.
    pub name: String,
    /// Reported state, keyed by message type.
    #[serde(default)]
    pub state: Map<String, Value>,
    /// Whether the device is currently reachable.
    pub online: bool,
    /// Last time any message arrived (unix millis).
    pub last_seen: i64,
    /// Last time state actually changed (unix millis).
    pub last_update: i64,
}

impl DeviceRecord {
    pub fn new(
        protocol: impl Into<String>,
        device_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            device_id: device_id.into(),
            protocol: protocol.into(),
            device_type: "unknown".to_string(),
            name: name.into(),
            state: Map::new(),
            online: true,
            last_seen: now,
            last_update: now,
        }
    }

    /// Storage key: unique per (protocol, device_id).
    pub fn storage_key(protocol: &str, device_id: &str) -> String {
        format!("{}:{}", protocol, device_id)
    }
}

/// Result of a state update: which top-level fields changed.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub created: bool,
    pub changed_fields: Vec<String>,
}

/// Persistent device store with per-device update atomicity.
pub struct DeviceStore {
    backend: Arc<dyn StorageBackend>,
    /// One mutex per device key; taken for every read-modify-write.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DeviceStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn read_record(&self, key: &str) -> Result<Option<DeviceRecord>> {
        match self.backend.read(TABLE, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_record(&self, key: &str, record: &DeviceRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.backend.write(TABLE, key, &bytes)?;
        Ok(())
    }

    /// Look up a device by its protocol-scoped external id.
    pub fn get_device_by_external_id(
        &self,
        protocol: &str,
        device_id: &str,
    ) -> Result<Option<DeviceRecord>> {
        self.read_record(&DeviceRecord::storage_key(protocol, device_id))
    }

    /// Insert a device record, overwriting any existing record with the
    /// same (protocol, device_id).
    pub fn insert_device(&self, record: &DeviceRecord) -> Result<()> {
        let key = DeviceRecord::storage_key(&record.protocol, &record.device_id);
        self.write_record(&key, record)
    }

    /// Merge a partial state into the device's state, creating the device
    /// if it does not exist yet.
    ///
    /// The merge is last-write-wins per top-level field of `partial`;
    /// fields absent from `partial` are preserved. The whole
    /// read-modify-write is serialized per device.
    pub async fn update_device_state(
        &self,
        protocol: &str,
        device_id: &str,
        partial: Map<String, Value>,
    ) -> Result<StateUpdate> {
        let key = DeviceRecord::storage_key(protocol, device_id);
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        let now = chrono::Utc::now().timestamp_millis();
        let (mut record, created) = match self.read_record(&key)? {
            Some(r) => (r, false),
            None => (
                DeviceRecord::new(protocol, device_id, format!("{} {}", protocol, device_id)),
                true,
            ),
        };

        let mut changed_fields = Vec::new();
        for (field, value) in partial {
            let changed = record.state.get(&field) != Some(&value);
            if changed {
                changed_fields.push(field.clone());
            }
            record.state.insert(field, value);
        }

        record.online = true;
        record.last_seen = now;
        if created || !changed_fields.is_empty() {
            record.last_update = now;
        }

        self.write_record(&key, &record)?;
        Ok(StateUpdate {
            created,
            changed_fields,
        })
    }

    /// Mark a device online or offline.
    pub async fn set_online(&self, protocol: &str, device_id: &str, online: bool) -> Result<()> {
        let key = DeviceRecord::storage_key(protocol, device_id);
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        let mut record = self
            .read_record(&key)?
            .ok_or_else(|| Error::NotFound(format!("device {}", key)))?;
        record.online = online;
        if online {
            record.last_seen = chrono::Utc::now().timestamp_millis();
        }
        self.write_record(&key, &record)
    }

    /// All devices, optionally filtered by protocol.
    pub fn list_devices(&self, protocol: Option<&str>) -> Result<Vec<DeviceRecord>> {
        let prefix = match protocol {
            Some(p) => format!("{}:", p),
            None => String::new(),
        };
        let mut devices = Vec::new();
        for (_, bytes) in self.backend.scan(TABLE, &prefix)? {
            devices.push(serde_json::from_slice::<DeviceRecord>(&bytes)?);
        }
        Ok(devices)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.backend.scan(TABLE, "")?.len())
    }
}
