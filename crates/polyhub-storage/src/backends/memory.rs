//! In-memory storage backend.
//!
//! Volatile DashMap-backed storage, mainly for tests and ephemeral
//! deployments where nothing should survive a restart.

use dashmap::DashMap;
use polyhub_core::storage::{Result, StorageBackend};

/// Volatile in-memory storage backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    /// Namespaced "table:key" -> value.
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored entries across all tables.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn make_key(table: &str, key: &str) -> String {
        format!("{}:{}", table, key)
    }
}

impl StorageBackend for MemoryBackend {
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .insert(Self::make_key(table, key), value.to_vec());
        Ok(())
    }

    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .get(&Self::make_key(table, key))
            .map(|v| v.clone()))
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool> {
        Ok(self.entries.remove(&Self::make_key(table, key)).is_some())
    }

    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let table_prefix = format!("{}:{}", table, prefix);
        let strip = table.len() + 1;

        let mut results: Vec<(String, Vec<u8>)> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(&table_prefix))
            .map(|entry| (entry.key()[strip..].to_string(), entry.value().clone()))
            .collect();

        // DashMap iteration order is unspecified; keep scans deterministic.
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    fn write_batch(&self, table: &str, items: Vec<(String, Vec<u8>)>) -> Result<()> {
        for (key, value) in items {
            self.entries.insert(Self::make_key(table, &key), value);
        }
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let backend = MemoryBackend::new();
        backend.write("t", "k", b"hello").unwrap();
        assert_eq!(backend.read("t", "k").unwrap(), Some(b"hello".to_vec()));
        assert!(backend.delete("t", "k").unwrap());
        assert!(!backend.delete("t", "k").unwrap());
        assert_eq!(backend.read("t", "k").unwrap(), None);
    }

    #[test]
    fn test_scan_sorted() {
        let backend = MemoryBackend::new();
        backend.write("devices", "b", b"2").unwrap();
        backend.write("devices", "a", b"1").unwrap();
        backend.write("other", "a", b"x").unwrap();

        let items = backend.scan("devices", "").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].0, "a");
        assert_eq!(items[1].0, "b");
    }

    #[test]
    fn test_write_batch() {
        let backend = MemoryBackend::new();
        backend
            .write_batch(
                "t",
                vec![("a".into(), b"1".to_vec()), ("b".into(), b"2".to_vec())],
            )
            .unwrap();
        assert_eq!(backend.len(), 2);
        assert!(!backend.is_persistent());
    }
}
