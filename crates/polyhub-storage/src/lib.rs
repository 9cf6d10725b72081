//! Persistent stores for the PolyHub gateway.
//!
//! Pluggable storage backends (redb on disk, DashMap in memory) behind the
//! `StorageBackend` trait from `polyhub-core`, plus the typed stores built
//! on top of them: devices, adapters, activity log and settings.

pub mod activity;
pub mod adapters;
pub mod backends;
pub mod devices;
pub mod error;
pub mod settings;

pub use activity::{ActivityRecord, ActivityStore};
pub use adapters::{AdapterRecord, AdapterRecordStatus, AdapterStore};
pub use backends::{available_backends, create_backend};
pub use devices::{DeviceRecord, DeviceStore, StateUpdate};
pub use error::{Error, Result};
pub use settings::SettingsStore;

#[cfg(feature = "memory")]
pub use backends::MemoryBackend;

#[cfg(feature = "redb")]
pub use backends::{RedbBackend, RedbBackendConfig};
