//! Message reconciliation pipeline.
//!
//! Turns raw inbound frames into device-store updates and bus events.
//! Channels follow the canonical `namespace/protocol/device_id/message_type`
//! form; anything outside the configured namespace is dropped. Decoded
//! payloads merge under the message-type key of the device's state map,
//! so a `state` message never clobbers earlier `telemetry` fields.
//!
//! Every failure in the pipeline is caught and logged here; nothing
//! propagates back to the transport that delivered the frame.

use polyhub_core::error::{Error, Result};
use polyhub_core::event::GatewayEvent;
use polyhub_core::eventbus::SharedEventBus;
use polyhub_storage::{ActivityRecord, ActivityStore, DeviceStore};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Parsed canonical channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedChannel {
    pub namespace: String,
    pub protocol: String,
    pub device_id: String,
    pub message_type: String,
}

/// Parse `namespace/protocol/device_id/message_type`. All four segments
/// must be present and non-empty.
pub fn parse_channel(channel: &str) -> Result<ParsedChannel> {
    let parts: Vec<&str> = channel.split('/').collect();
    if parts.len() != 4 || parts.iter().any(|p| p.is_empty()) {
        return Err(Error::Reconciliation(format!(
            "channel '{}' is not namespace/protocol/device_id/message_type",
            channel
        )));
    }
    Ok(ParsedChannel {
        namespace: parts[0].to_string(),
        protocol: parts[1].to_string(),
        device_id: parts[2].to_string(),
        message_type: parts[3].to_string(),
    })
}

/// Decode a payload as JSON; malformed bytes are wrapped instead of
/// dropped so a plain-text sensor reading still lands in the state map.
pub fn decode_payload(payload: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(payload) {
        Ok(value) => value,
        Err(_) => {
            let raw = String::from_utf8_lossy(payload).to_string();
            let mut wrapped = Map::new();
            wrapped.insert("value".to_string(), Value::String(raw));
            Value::Object(wrapped)
        }
    }
}

/// Reconciles inbound messages into the device store.
pub struct Reconciler {
    namespace: parking_lot::RwLock<String>,
    devices: Arc<DeviceStore>,
    activity: Arc<ActivityStore>,
    bus: SharedEventBus,
}

impl Reconciler {
    pub fn new(
        namespace: impl Into<String>,
        devices: Arc<DeviceStore>,
        activity: Arc<ActivityStore>,
        bus: SharedEventBus,
    ) -> Self {
        Self {
            namespace: parking_lot::RwLock::new(namespace.into()),
            devices,
            activity,
            bus,
        }
    }

    pub fn namespace(&self) -> String {
        self.namespace.read().clone()
    }

    /// Follow a runtime namespace change without rebuilding the pipeline.
    pub fn set_namespace(&self, namespace: impl Into<String>) {
        *self.namespace.write() = namespace.into();
    }

    /// Ingest one inbound frame. `source` names the adapter for event
    /// attribution. Never returns an error: failures are logged with
    /// channel context and the frame is dropped.
    pub async fn ingest(&self, source: &str, channel: &str, payload: &[u8]) {
        if let Err(e) = self.ingest_inner(source, channel, payload).await {
            let snippet: String = String::from_utf8_lossy(payload).chars().take(120).collect();
            tracing::warn!(
                adapter = source,
                channel,
                payload = %snippet,
                error = %e,
                "message dropped during reconciliation"
            );
        }
    }

    async fn ingest_inner(&self, source: &str, channel: &str, payload: &[u8]) -> Result<()> {
        let parsed = parse_channel(channel)?;
        let namespace = self.namespace();
        if parsed.namespace != namespace {
            tracing::debug!(
                adapter = source,
                channel,
                expected = %namespace,
                "foreign namespace, dropping"
            );
            return Ok(());
        }

        let decoded = decode_payload(payload);

        let existed = self
            .devices
            .get_device_by_external_id(&parsed.protocol, &parsed.device_id)
            .map_err(|e| Error::Reconciliation(e.to_string()))?
            .is_some();

        // Merge under the message-type key.
        let mut partial = Map::new();
        partial.insert(parsed.message_type.clone(), decoded.clone());
        let update = self
            .devices
            .update_device_state(&parsed.protocol, &parsed.device_id, partial)
            .await
            .map_err(|e| Error::Reconciliation(e.to_string()))?;

        if !existed {
            self.bus.publish_with_source(
                GatewayEvent::DeviceDiscovered {
                    device_id: parsed.device_id.clone(),
                    protocol: parsed.protocol.clone(),
                },
                source.to_string(),
            );
        }

        let field_names: Vec<String> = match &decoded {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => vec!["value".to_string()],
        };
        let record = ActivityRecord::new(
            &parsed.protocol,
            &parsed.device_id,
            format!("{} updated ({})", parsed.message_type, field_names.join(", ")),
            field_names,
        );
        self.activity
            .insert_activity(&record)
            .await
            .map_err(|e| Error::Reconciliation(e.to_string()))?;

        self.bus.publish_with_source(
            GatewayEvent::MessageReconciled {
                channel: channel.to_string(),
                payload: decoded,
                timestamp: record.timestamp,
            },
            source.to_string(),
        );
        if update.created || !update.changed_fields.is_empty() {
            self.bus.publish_with_source(
                GatewayEvent::DeviceStateChanged {
                    device_id: parsed.device_id,
                    protocol: parsed.protocol,
                    fields: update.changed_fields,
                },
                source.to_string(),
            );
        }
        Ok(())
    }
}
