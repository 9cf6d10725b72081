//! Protocol adapter framework for the PolyHub gateway.
//!
//! The pieces fit together like this: an adapter owns a [`Transport`]
//! and hands it to a [`ConnectionSupervisor`], which drives the
//! connect/run/backoff lifecycle and replays the [`TopicRegistry`] on
//! every reconnect. Inbound frames flow through the [`Reconciler`] into
//! the device store and out as bus events. The [`AdapterManager`] holds
//! the registered adapters and fans lifecycle operations across them.
//!
//! [`Transport`]: resilience::Transport
//! [`ConnectionSupervisor`]: resilience::ConnectionSupervisor
//! [`TopicRegistry`]: topics::TopicRegistry
//! [`Reconciler`]: reconcile::Reconciler
//! [`AdapterManager`]: manager::AdapterManager

pub mod adapter;
pub mod adapters;
pub mod config;
pub mod manager;
pub mod reconcile;
pub mod resilience;
pub mod topics;

pub use adapter::{
    AdapterStatus, ConnectionState, DeviceControl, PermitJoin, ProtocolAdapter, ScanControl,
    StatusHandle,
};
pub use adapters::AdapterContext;
pub use config::{ConfigEffect, MeshConfig, MqttConfig, ScanConfig};
pub use manager::{AdapterManager, AdapterOutcome};
pub use reconcile::{decode_payload, parse_channel, ParsedChannel, Reconciler};
pub use resilience::{BackoffPolicy, ConnectionSupervisor, Transport, DEFAULT_MAX_ATTEMPTS};
pub use topics::{LastMessage, TopicEntry, TopicRegistry};

pub use adapters::MeshAdapter;

#[cfg(feature = "mqtt")]
pub use adapters::MqttAdapter;

#[cfg(feature = "scan")]
pub use adapters::ScanAdapter;
