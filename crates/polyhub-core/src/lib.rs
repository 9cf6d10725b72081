//! Core traits and types for PolyHub.
//!
//! This crate defines the foundational abstractions shared by every part of
//! the gateway: the domain event model, the broadcast event bus, the error
//! taxonomy and the storage backend seam. It has no protocol knowledge.

pub mod error;
pub mod event;
pub mod eventbus;
pub mod storage;

// Event exports
pub use event::{EventMetadata, GatewayEvent};

// Event bus exports
pub use eventbus::{
    DEFAULT_CHANNEL_CAPACITY, EventBus, EventBusReceiver, FilterBuilder, FilteredReceiver,
    SharedEventBus,
};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::event::{EventMetadata, GatewayEvent};
    pub use crate::eventbus::{EventBus, SharedEventBus};
    pub use crate::storage::{StorageBackend, StorageError};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
