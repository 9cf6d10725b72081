//! Storage backend implementations.
//!
//! Implementations of the `StorageBackend` trait for the storage engines
//! the gateway ships with, feature-gated for conditional compilation.

use polyhub_core::storage::StorageBackend;
use serde_json::Value;
use std::sync::Arc;

#[cfg(feature = "redb")]
pub mod redb;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "redb")]
pub use redb::{RedbBackend, RedbBackendConfig};

#[cfg(feature = "memory")]
pub use memory::MemoryBackend;

/// Create a storage backend by type identifier.
pub fn create_backend(
    backend_type: &str,
    config: &Value,
) -> polyhub_core::storage::Result<Arc<dyn StorageBackend>> {
    match backend_type {
        #[cfg(feature = "redb")]
        "redb" => {
            let cfg: RedbBackendConfig = serde_json::from_value(config.clone()).map_err(|e| {
                polyhub_core::storage::StorageError::Configuration(format!(
                    "Invalid redb config: {}",
                    e
                ))
            })?;
            Ok(Arc::new(redb::RedbBackend::new(cfg)?))
        }

        #[cfg(feature = "memory")]
        "memory" => Ok(Arc::new(MemoryBackend::new())),

        _ => Err(polyhub_core::storage::StorageError::Configuration(format!(
            "Unknown backend type: {}. Available backends: {}",
            backend_type,
            available_backends().join(", ")
        ))),
    }
}

/// List of available backend types (based on enabled features).
pub fn available_backends() -> Vec<&'static str> {
    let mut backends = Vec::new();
    #[cfg(feature = "redb")]
    backends.push("redb");
    #[cfg(feature = "memory")]
    backends.push("memory");
    backends
}
