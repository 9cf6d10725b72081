//! Device activity log.
//!
//! Append-only record of reconciled messages, bounded to the newest N
//! entries. Retention is enforced on insert so the table never grows
//! unbounded.

use crate::error::Result;
use polyhub_core::storage::StorageBackend;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

const TABLE: &str = "activity";
const DEFAULT_RETENTION: usize = 1000;

/// One reconciled-message activity entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: String,
    pub device_id: String,
    pub protocol: String,
    /// Human-readable summary, e.g. "state updated (power, brightness)".
    pub summary: String,
    /// Top-level state fields touched by the message.
    pub fields: Vec<String>,
    /// Unix millis.
    pub timestamp: i64,
}

impl ActivityRecord {
    pub fn new(
        protocol: impl Into<String>,
        device_id: impl Into<String>,
        summary: impl Into<String>,
        fields: Vec<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            device_id: device_id.into(),
            protocol: protocol.into(),
            summary: summary.into(),
            fields,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Bounded activity store.
pub struct ActivityStore {
    backend: Arc<dyn StorageBackend>,
    retention: usize,
    /// Serializes insert + prune so concurrent inserts can't both skip
    /// the retention pass.
    insert_lock: Mutex<()>,
}

impl ActivityStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_retention(backend, DEFAULT_RETENTION)
    }

    pub fn with_retention(backend: Arc<dyn StorageBackend>, retention: usize) -> Self {
        Self {
            backend,
            retention: retention.max(1),
            insert_lock: Mutex::new(()),
        }
    }

    /// Keys sort chronologically: zero-padded millis plus the record id
    /// as a tiebreaker.
    fn make_key(record: &ActivityRecord) -> String {
        format!("{:020}:{}", record.timestamp, record.id)
    }

    /// Append a record, pruning the oldest entries past the retention cap.
    pub async fn insert_activity(&self, record: &ActivityRecord) -> Result<()> {
        let _guard = self.insert_lock.lock().await;

        let bytes = serde_json::to_vec(record)?;
        self.backend.write(TABLE, &Self::make_key(record), &bytes)?;

        let mut keys: Vec<String> = self
            .backend
            .scan(TABLE, "")?
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        if keys.len() > self.retention {
            keys.sort();
            let excess = keys.len() - self.retention;
            for key in keys.into_iter().take(excess) {
                self.backend.delete(TABLE, &key)?;
            }
        }
        Ok(())
    }

    /// Most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ActivityRecord>> {
        let mut items = self.backend.scan(TABLE, "")?;
        items.sort_by(|a, b| b.0.cmp(&a.0));

        let mut records = Vec::with_capacity(limit.min(items.len()));
        for (_, bytes) in items.into_iter().take(limit) {
            records.push(serde_json::from_slice::<ActivityRecord>(&bytes)?);
        }
        Ok(records)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.backend.scan(TABLE, "")?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;

    #[tokio::test]
    async fn test_insert_and_recent() {
        let store = ActivityStore::new(Arc::new(MemoryBackend::new()));
        for i in 0..5 {
            let mut record = ActivityRecord::new(
                "mqtt",
                format!("dev{}", i),
                "state updated",
                vec!["state".into()],
            );
            record.timestamp = 1000 + i as i64;
            store.insert_activity(&record).await.unwrap();
        }

        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].device_id, "dev4");
        assert_eq!(recent[4].device_id, "dev0");
    }

    #[tokio::test]
    async fn test_retention_bound() {
        let store = ActivityStore::with_retention(Arc::new(MemoryBackend::new()), 3);
        for i in 0..10 {
            let mut record =
                ActivityRecord::new("mqtt", "dev", "state updated", vec!["state".into()]);
            record.timestamp = 1000 + i as i64;
            store.insert_activity(&record).await.unwrap();
        }
        assert_eq!(store.count().unwrap(), 3);

        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].timestamp, 1009);
        assert_eq!(recent[2].timestamp, 1007);
    }

    #[tokio::test]
    async fn test_recent_limit() {
        let store = ActivityStore::new(Arc::new(MemoryBackend::new()));
        for i in 0..5 {
            let mut record = ActivityRecord::new("mesh", "node", "joined", vec![]);
            record.timestamp = i as i64;
            store.insert_activity(&record).await.unwrap();
        }
        assert_eq!(store.recent(2).unwrap().len(), 2);
    }
}
