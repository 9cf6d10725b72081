//! Storage seam for the gateway.
//!
//! The typed stores (devices, adapters, activity, settings) never talk to
//! a database directly; they go through [`StorageBackend`], and an engine
//! crate supplies the implementation. Values are opaque byte slices here;
//! serialization is the stores' business.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Failures surfaced by a storage engine.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io failure: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded or decoded.
    #[error("record serialization failed: {0}")]
    Serialization(String),

    #[error("no value stored under key {0}")]
    KeyNotFound(String),

    /// The engine was handed an unusable configuration (bad path, zero
    /// cache capacity, unknown backend kind).
    #[error("storage configuration rejected: {0}")]
    Configuration(String),

    /// An error raised inside the engine itself.
    #[error("storage engine failure: {0}")]
    Backend(String),

    #[error("storage failure: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Contract every storage engine implements.
///
/// The `table` argument is a logical grouping ("devices", "adapters");
/// how an engine keeps tables apart is its own concern. Engines must be
/// safe to share across the gateway's tasks.
pub trait StorageBackend: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Fetch the value under `key`, or `None` when absent.
    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove `key`. Returns whether a value was actually removed.
    fn delete(&self, table: &str, key: &str) -> Result<bool>;

    /// All `(key, value)` pairs in `table` whose key starts with `prefix`.
    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Store several values in one engine transaction where supported.
    fn write_batch(&self, table: &str, items: Vec<(String, Vec<u8>)>) -> Result<()>;

    /// Whether data written here survives a gateway restart.
    fn is_persistent(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::KeyNotFound("device:zigbee:dev1".to_string());
        assert!(err.to_string().contains("device:zigbee:dev1"));
        assert!(err.to_string().starts_with("no value stored under key"));
    }
}
