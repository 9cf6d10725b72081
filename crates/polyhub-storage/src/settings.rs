//! Key-value settings store.

use crate::error::Result;
use polyhub_core::storage::StorageBackend;
use serde_json::Value;
use std::sync::Arc;

const TABLE: &str = "settings";

/// Gateway-wide settings as JSON values.
pub struct SettingsStore {
    backend: Arc<dyn StorageBackend>,
}

impl SettingsStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<Value>> {
        match self.backend.read(TABLE, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn update_setting(&self, key: &str, value: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.backend.write(TABLE, key, &bytes)?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> Result<bool> {
        Ok(self.backend.delete(TABLE, key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use serde_json::json;

    #[test]
    fn test_settings_roundtrip() {
        let store = SettingsStore::new(Arc::new(MemoryBackend::new()));
        assert_eq!(store.get_setting("ns").unwrap(), None);

        store.update_setting("ns", &json!("polyhub")).unwrap();
        assert_eq!(store.get_setting("ns").unwrap(), Some(json!("polyhub")));

        store
            .update_setting("retention", &json!({"activity": 1000}))
            .unwrap();
        assert_eq!(
            store.get_setting("retention").unwrap().unwrap()["activity"],
            1000
        );

        assert!(store.delete_setting("ns").unwrap());
        assert!(!store.delete_setting("ns").unwrap());
    }
}
