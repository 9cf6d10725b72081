//! Gateway domain events.
//!
//! Everything observable from the outside — adapter lifecycle, reconciled
//! telemetry, diagnostic findings — is expressed as a [`GatewayEvent`] and
//! distributed through the event bus.

use serde::{Deserialize, Serialize};

/// Metadata attached to every published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event id.
    pub id: String,
    /// Component that published the event (adapter name, "diagnostics", ...).
    pub source: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
}

impl EventMetadata {
    /// Create metadata with a fresh id and the current time.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Events emitted by adapters, the reconciliation pipeline and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// An adapter was registered with the manager.
    AdapterRegistered { adapter: String, protocol: String },

    /// An adapter's transport entered the Connected state.
    AdapterConnected { adapter: String },

    /// An adapter's transport left the Connected state unexpectedly.
    AdapterDisconnected { adapter: String, reason: String },

    /// An adapter exhausted its reconnect attempts.
    AdapterFailed { adapter: String, attempts: u32 },

    /// An inbound message was reconciled into the device store.
    MessageReconciled {
        channel: String,
        payload: serde_json::Value,
        timestamp: i64,
    },

    /// A device's state map changed.
    DeviceStateChanged {
        device_id: String,
        protocol: String,
        fields: Vec<String>,
    },

    /// A previously unknown device was created from an inbound message.
    DeviceDiscovered { device_id: String, protocol: String },

    /// A diagnostic check produced an error record.
    DiagnosticErrorReported {
        error_id: String,
        severity: String,
        category: String,
        source: String,
        message: String,
    },

    /// A diagnostic error record was resolved.
    DiagnosticErrorResolved {
        error_id: String,
        resolved_by: String,
    },

    /// Permit-join was toggled on a mesh adapter.
    PermitJoinChanged {
        adapter: String,
        enabled: bool,
        duration_secs: Option<u64>,
    },

    /// Scan mode was toggled on a scanner adapter.
    ScanModeChanged { adapter: String, active: bool },
}

impl GatewayEvent {
    /// Stable name of the variant, for logging and hook dispatch.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::AdapterRegistered { .. } => "AdapterRegistered",
            Self::AdapterConnected { .. } => "AdapterConnected",
            Self::AdapterDisconnected { .. } => "AdapterDisconnected",
            Self::AdapterFailed { .. } => "AdapterFailed",
            Self::MessageReconciled { .. } => "MessageReconciled",
            Self::DeviceStateChanged { .. } => "DeviceStateChanged",
            Self::DeviceDiscovered { .. } => "DeviceDiscovered",
            Self::DiagnosticErrorReported { .. } => "DiagnosticErrorReported",
            Self::DiagnosticErrorResolved { .. } => "DiagnosticErrorResolved",
            Self::PermitJoinChanged { .. } => "PermitJoinChanged",
            Self::ScanModeChanged { .. } => "ScanModeChanged",
        }
    }

    /// Adapter lifecycle events.
    pub fn is_adapter_event(&self) -> bool {
        matches!(
            self,
            Self::AdapterRegistered { .. }
                | Self::AdapterConnected { .. }
                | Self::AdapterDisconnected { .. }
                | Self::AdapterFailed { .. }
                | Self::PermitJoinChanged { .. }
                | Self::ScanModeChanged { .. }
        )
    }

    /// Device and telemetry events.
    pub fn is_device_event(&self) -> bool {
        matches!(
            self,
            Self::MessageReconciled { .. }
                | Self::DeviceStateChanged { .. }
                | Self::DeviceDiscovered { .. }
        )
    }

    /// Diagnostic ledger events.
    pub fn is_diagnostic_event(&self) -> bool {
        matches!(
            self,
            Self::DiagnosticErrorReported { .. } | Self::DiagnosticErrorResolved { .. }
        )
    }
}
