//! Protocol adapter contract.
//!
//! Every protocol binding implements [`ProtocolAdapter`]. The trait is
//! object-safe so the manager can hold a heterogeneous set behind
//! `Arc<dyn ProtocolAdapter>`. Optional capabilities (device commands,
//! permit-join, scan mode) are exposed through accessor methods rather
//! than downcasting.

use crate::config::ConfigEffect;
use async_trait::async_trait;
use parking_lot::RwLock;
use polyhub_core::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Connection lifecycle of an adapter's transport link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not started, or stopped cleanly.
    Disconnected,
    /// First connection attempt in flight.
    Connecting,
    /// Link is up.
    Connected,
    /// Link lost, retry scheduled or in flight.
    Reconnecting,
    /// Reconnect attempts exhausted; only an explicit start() recovers.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

/// Non-blocking status snapshot of an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterStatus {
    pub connection: ConnectionState,
    /// Consecutive connection attempts since the last successful connect.
    pub attempt_count: u32,
    pub messages_received: u64,
    pub messages_published: u64,
    /// Unix millis of the last inbound or outbound message, if any.
    pub last_activity: Option<i64>,
}

/// Shared, lock-cheap status cell updated by the supervisor and transports
/// and snapshotted by `ProtocolAdapter::status()`.
#[derive(Clone, Default)]
pub struct StatusHandle {
    inner: Arc<StatusInner>,
}

struct StatusInner {
    connection: RwLock<ConnectionState>,
    attempts: AtomicU32,
    received: AtomicU64,
    published: AtomicU64,
    /// 0 means "never".
    last_activity: AtomicI64,
}

impl Default for StatusInner {
    fn default() -> Self {
        Self {
            connection: RwLock::new(ConnectionState::Disconnected),
            attempts: AtomicU32::new(0),
            received: AtomicU64::new(0),
            published: AtomicU64::new(0),
            last_activity: AtomicI64::new(0),
        }
    }
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> AdapterStatus {
        let last = self.inner.last_activity.load(Ordering::Relaxed);
        AdapterStatus {
            connection: *self.inner.connection.read(),
            attempt_count: self.inner.attempts.load(Ordering::Relaxed),
            messages_received: self.inner.received.load(Ordering::Relaxed),
            messages_published: self.inner.published.load(Ordering::Relaxed),
            last_activity: if last == 0 { None } else { Some(last) },
        }
    }

    pub fn connection(&self) -> ConnectionState {
        *self.inner.connection.read()
    }

    pub fn set_connection(&self, state: ConnectionState) {
        *self.inner.connection.write() = state;
    }

    /// Increment the attempt counter and return the new value.
    pub fn begin_attempt(&self) -> u32 {
        self.inner.attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn attempt_count(&self) -> u32 {
        self.inner.attempts.load(Ordering::Relaxed)
    }

    pub fn reset_attempts(&self) {
        self.inner.attempts.store(0, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.inner.received.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_published(&self) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    fn touch(&self) {
        self.inner
            .last_activity
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }
}

/// Send a protocol-level command to a device. Device ids are scoped by
/// protocol, matching the device store key.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    async fn send_command(&self, protocol: &str, device_id: &str, command: Value) -> Result<()>;
}

/// Open the network for new devices to join, mesh protocols only.
#[async_trait]
pub trait PermitJoin: Send + Sync {
    /// Open or close the join window. When enabling, a `duration` of
    /// `None` uses the adapter's configured default window length.
    async fn set_permit_join(&self, enabled: bool, duration: Option<Duration>) -> Result<()>;
}

/// Toggle active discovery on a scanning adapter.
#[async_trait]
pub trait ScanControl: Send + Sync {
    async fn set_scan_mode(&self, active: bool) -> Result<()>;
    fn scan_active(&self) -> bool;
}

/// Contract every protocol binding implements.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Unique adapter instance name.
    fn name(&self) -> &str;

    /// Protocol identifier ("mqtt", "mesh", "scan").
    fn protocol(&self) -> &str;

    /// Begin connecting. Returns once the attempt is initiated; the link
    /// comes up asynchronously. Idempotent: a second call while
    /// connecting or connected is a no-op. Fails with `Error::Startup`
    /// when a prerequisite is missing.
    async fn start(&self) -> Result<()>;

    /// Disconnect and cancel any pending reconnect. Idempotent; never
    /// errors on an adapter that is already stopped.
    async fn stop(&self) -> Result<()>;

    /// Non-blocking status snapshot.
    fn status(&self) -> AdapterStatus;

    /// Current configuration as JSON.
    async fn config(&self) -> Value;

    /// Apply a partial configuration update. Unrecognized keys are
    /// rejected with `Error::Validation` before anything is applied.
    /// Connection-affecting keys force a reconnect with a fresh attempt
    /// counter.
    async fn update_config(&self, updates: HashMap<String, Value>) -> Result<ConfigEffect>;

    fn device_control(&self) -> Option<&dyn DeviceControl> {
        None
    }

    fn permit_join(&self) -> Option<&dyn PermitJoin> {
        None
    }

    fn scan_control(&self) -> Option<&dyn ScanControl> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_snapshot_defaults() {
        let handle = StatusHandle::new();
        let status = handle.snapshot();
        assert_eq!(status.connection, ConnectionState::Disconnected);
        assert_eq!(status.attempt_count, 0);
        assert_eq!(status.last_activity, None);
    }

    #[test]
    fn test_attempt_counter() {
        let handle = StatusHandle::new();
        assert_eq!(handle.begin_attempt(), 1);
        assert_eq!(handle.begin_attempt(), 2);
        handle.reset_attempts();
        assert_eq!(handle.attempt_count(), 0);
    }

    #[test]
    fn test_counters_touch_activity() {
        let handle = StatusHandle::new();
        handle.record_received();
        handle.record_published();
        let status = handle.snapshot();
        assert_eq!(status.messages_received, 1);
        assert_eq!(status.messages_published, 1);
        assert!(status.last_activity.is_some());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_value(ConnectionState::Reconnecting).unwrap();
        assert_eq!(json, "reconnecting");
    }
}
