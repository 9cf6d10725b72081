//! Adapter configuration structs.
//!
//! Each adapter kind has a closed config struct with a fixed key set.
//! `apply_updates` stages the whole update on a scratch copy and commits
//! it only when every key and value checks out; a single unrecognized
//! key or bad value rejects the entire update and leaves the live config
//! untouched. Keys that affect the connection report
//! [`ConfigEffect::Reconnect`] so the caller can cycle the link with a
//! fresh attempt counter.

use polyhub_core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// What a config update requires of the running adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigEffect {
    /// Applied in place, link untouched.
    Applied,
    /// A connection parameter changed; disconnect and reconnect.
    Reconnect,
}

fn as_str(key: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::Validation(format!("'{}' must be a string", key)))
}

fn as_opt_str(key: &str, value: &Value) -> Result<Option<String>> {
    if value.is_null() {
        return Ok(None);
    }
    as_str(key, value).map(Some)
}

fn as_u16(key: &str, value: &Value) -> Result<u16> {
    value
        .as_u64()
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| Error::Validation(format!("'{}' must be a port number", key)))
}

fn as_u64(key: &str, value: &Value) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| Error::Validation(format!("'{}' must be a non-negative integer", key)))
}

fn as_bool(key: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| Error::Validation(format!("'{}' must be a boolean", key)))
}

/// MQTT broker connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// MQTT protocol revision. Only "v4" is wired up; "v5" is rejected
    /// rather than silently downgraded.
    #[serde(default = "default_protocol_variant")]
    pub protocol_variant: String,
    /// Ask the broker to discard session state between connects. Affects
    /// reconnect behavior only; takes effect on the next connect.
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_protocol_variant() -> String {
    "v4".to_string()
}

fn default_clean_session() -> bool {
    true
}

fn default_namespace() -> String {
    "polyhub".to_string()
}

fn default_qos() -> u8 {
    1
}

fn default_keep_alive() -> u64 {
    30
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            protocol_variant: default_protocol_variant(),
            clean_session: default_clean_session(),
            namespace: default_namespace(),
            qos: default_qos(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

impl MqttConfig {
    /// Apply a partial update. The whole update is staged on a copy and
    /// committed only when every key and value is valid; on error the
    /// live config is untouched.
    pub fn apply_updates(&mut self, updates: &HashMap<String, Value>) -> Result<ConfigEffect> {
        let mut next = self.clone();
        let mut effect = ConfigEffect::Applied;
        for (key, value) in updates {
            match key.as_str() {
                "host" => {
                    next.host = as_str(key, value)?;
                    effect = ConfigEffect::Reconnect;
                }
                "port" => {
                    next.port = as_u16(key, value)?;
                    effect = ConfigEffect::Reconnect;
                }
                "username" => {
                    next.username = as_opt_str(key, value)?;
                    effect = ConfigEffect::Reconnect;
                }
                "password" => {
                    next.password = as_opt_str(key, value)?;
                    effect = ConfigEffect::Reconnect;
                }
                "protocol_variant" => {
                    let variant = as_str(key, value)?;
                    match variant.as_str() {
                        "v4" => {}
                        "v5" => {
                            return Err(Error::Validation(
                                "protocol_variant 'v5' is not supported".to_string(),
                            ))
                        }
                        other => {
                            return Err(Error::Validation(format!(
                                "protocol_variant must be 'v4' or 'v5', got '{}'",
                                other
                            )))
                        }
                    }
                    next.protocol_variant = variant;
                    effect = ConfigEffect::Reconnect;
                }
                "clean_session" => next.clean_session = as_bool(key, value)?,
                "namespace" => next.namespace = as_str(key, value)?,
                "qos" => {
                    let qos = as_u64(key, value)?;
                    if qos > 2 {
                        return Err(Error::Validation("qos must be 0, 1 or 2".to_string()));
                    }
                    next.qos = qos as u8;
                }
                "keep_alive_secs" => next.keep_alive_secs = as_u64(key, value)?,
                other => {
                    return Err(Error::Validation(format!(
                        "unrecognized mqtt config key '{}'",
                        other
                    )))
                }
            }
        }
        *self = next;
        Ok(effect)
    }
}

/// Mesh bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshConfig {
    /// TCP address of the mesh bridge, "host:port". Required to start.
    #[serde(default)]
    pub bridge_addr: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Seconds a permit-join window stays open when no duration is given.
    #[serde(default = "default_permit_join")]
    pub default_permit_join_secs: u64,
}

fn default_permit_join() -> u64 {
    60
}

impl MeshConfig {
    /// Apply a partial update, staged on a copy and committed only on
    /// full success.
    pub fn apply_updates(&mut self, updates: &HashMap<String, Value>) -> Result<ConfigEffect> {
        let mut next = self.clone();
        let mut effect = ConfigEffect::Applied;
        for (key, value) in updates {
            match key.as_str() {
                "bridge_addr" => {
                    next.bridge_addr = as_opt_str(key, value)?;
                    effect = ConfigEffect::Reconnect;
                }
                "namespace" => next.namespace = as_str(key, value)?,
                "default_permit_join_secs" => {
                    next.default_permit_join_secs = as_u64(key, value)?
                }
                other => {
                    return Err(Error::Validation(format!(
                        "unrecognized mesh config key '{}'",
                        other
                    )))
                }
            }
        }
        *self = next;
        Ok(effect)
    }
}

/// Local-network scanner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Root URL probed on connect and polled for device listings.
    pub scan_root: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_http_timeout")]
    pub request_timeout_secs: u64,
    /// Start with active scanning enabled.
    #[serde(default = "default_scan_active")]
    pub scan_active: bool,
}

fn default_poll_interval() -> u64 {
    30
}

fn default_http_timeout() -> u64 {
    10
}

fn default_scan_active() -> bool {
    true
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_root: String::new(),
            namespace: default_namespace(),
            poll_interval_secs: default_poll_interval(),
            request_timeout_secs: default_http_timeout(),
            scan_active: default_scan_active(),
        }
    }
}

impl ScanConfig {
    /// Apply a partial update, staged on a copy and committed only on
    /// full success.
    pub fn apply_updates(&mut self, updates: &HashMap<String, Value>) -> Result<ConfigEffect> {
        let mut next = self.clone();
        let mut effect = ConfigEffect::Applied;
        for (key, value) in updates {
            match key.as_str() {
                "scan_root" => {
                    next.scan_root = as_str(key, value)?;
                    effect = ConfigEffect::Reconnect;
                }
                "namespace" => next.namespace = as_str(key, value)?,
                "poll_interval_secs" => next.poll_interval_secs = as_u64(key, value)?.max(1),
                "request_timeout_secs" => next.request_timeout_secs = as_u64(key, value)?.max(1),
                "scan_active" => next.scan_active = as_bool(key, value)?,
                other => {
                    return Err(Error::Validation(format!(
                        "unrecognized scan config key '{}'",
                        other
                    )))
                }
            }
        }
        *self = next;
        Ok(effect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn updates(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_connection_key_forces_reconnect() {
        let mut config = MqttConfig::default();
        let effect = config
            .apply_updates(&updates(&[("host", json!("broker.local"))]))
            .unwrap();
        assert_eq!(effect, ConfigEffect::Reconnect);
        assert_eq!(config.host, "broker.local");
    }

    #[test]
    fn test_soft_key_applies_in_place() {
        let mut config = MqttConfig::default();
        let effect = config
            .apply_updates(&updates(&[("qos", json!(2))]))
            .unwrap();
        assert_eq!(effect, ConfigEffect::Applied);
        assert_eq!(config.qos, 2);
    }

    #[test]
    fn test_unrecognized_key_rejects_whole_update() {
        let mut config = MqttConfig::default();
        let result = config.apply_updates(&updates(&[
            ("host", json!("broker.local")),
            ("bogus", json!(1)),
        ]));
        assert!(matches!(result, Err(Error::Validation(_))));
        // Nothing was applied.
        assert_eq!(config.host, "localhost");
    }

    #[test]
    fn test_invalid_qos() {
        let mut config = MqttConfig::default();
        assert!(config.apply_updates(&updates(&[("qos", json!(7))])).is_err());
    }

    #[test]
    fn test_invalid_value_leaves_config_untouched() {
        let mut config = MqttConfig::default();
        // Valid keys around one bad value: nothing may stick.
        let result = config.apply_updates(&updates(&[
            ("host", json!("broker2.local")),
            ("port", json!(8883)),
            ("keep_alive_secs", json!(60)),
            ("qos", json!(7)),
        ]));
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1883);
        assert_eq!(config.keep_alive_secs, 30);
    }

    #[test]
    fn test_protocol_variant_validation() {
        let mut config = MqttConfig::default();
        assert!(config
            .apply_updates(&updates(&[("protocol_variant", json!("v3"))]))
            .is_err());
        // v5 is recognized but not wired up, so it is refused outright.
        assert!(config
            .apply_updates(&updates(&[("protocol_variant", json!("v5"))]))
            .is_err());
        assert_eq!(config.protocol_variant, "v4");
    }

    #[test]
    fn test_clean_session_applies_in_place() {
        let mut config = MqttConfig::default();
        assert!(config.clean_session);
        let effect = config
            .apply_updates(&updates(&[("clean_session", json!(false))]))
            .unwrap();
        assert_eq!(effect, ConfigEffect::Applied);
        assert!(!config.clean_session);
    }

    #[test]
    fn test_mesh_bridge_addr_reconnects() {
        let mut config = MeshConfig::default();
        let effect = config
            .apply_updates(&updates(&[("bridge_addr", json!("10.0.0.2:8899"))]))
            .unwrap();
        assert_eq!(effect, ConfigEffect::Reconnect);
    }

    #[test]
    fn test_scan_defaults_from_json() {
        let config: ScanConfig =
            serde_json::from_value(json!({"scan_root": "http://192.168.1.1"})).unwrap();
        assert_eq!(config.poll_interval_secs, 30);
        assert!(config.scan_active);
    }
}
