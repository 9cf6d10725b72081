//! Concrete protocol bindings.
//!
//! Each binding wires a transport into the shared supervisor, registry
//! and reconciliation pipeline. Protocol clients are feature-gated so a
//! gateway build can carry only the protocols it needs.

use polyhub_core::eventbus::SharedEventBus;
use polyhub_storage::{ActivityStore, DeviceStore};
use std::sync::Arc;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub mod mesh;

#[cfg(feature = "scan")]
pub mod netscan;

#[cfg(feature = "mqtt")]
pub use mqtt::MqttAdapter;

pub use mesh::MeshAdapter;

#[cfg(feature = "scan")]
pub use netscan::ScanAdapter;

/// Shared services every adapter needs.
#[derive(Clone)]
pub struct AdapterContext {
    pub bus: SharedEventBus,
    pub devices: Arc<DeviceStore>,
    pub activity: Arc<ActivityStore>,
}

impl AdapterContext {
    pub fn new(bus: SharedEventBus, devices: Arc<DeviceStore>, activity: Arc<ActivityStore>) -> Self {
        Self {
            bus,
            devices,
            activity,
        }
    }
}
