//! End-to-end diagnostics over a live adapter manager.

use async_trait::async_trait;
use polyhub_adapters::adapter::{
    AdapterStatus, ConnectionState, ProtocolAdapter, StatusHandle,
};
use polyhub_adapters::config::ConfigEffect;
use polyhub_adapters::manager::AdapterManager;
use polyhub_core::error::Result;
use polyhub_core::event::GatewayEvent;
use polyhub_core::eventbus::EventBus;
use polyhub_diagnostics::{
    AdapterConnectivityCheck, DiagnosticEngine, ErrorFilter, HealthLevel, Severity,
};
use polyhub_storage::{AdapterStore, MemoryBackend};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Adapter whose link state is set directly, bypassing any transport.
struct PinnedAdapter {
    name: String,
    status: StatusHandle,
}

impl PinnedAdapter {
    fn new(name: &str, state: ConnectionState) -> Self {
        let status = StatusHandle::new();
        status.set_connection(state);
        Self {
            name: name.to_string(),
            status,
        }
    }
}

#[async_trait]
impl ProtocolAdapter for PinnedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> &str {
        "mqtt"
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn status(&self) -> AdapterStatus {
        self.status.snapshot()
    }

    async fn config(&self) -> Value {
        serde_json::json!({})
    }

    async fn update_config(&self, _updates: HashMap<String, Value>) -> Result<ConfigEffect> {
        Ok(ConfigEffect::Applied)
    }
}

#[tokio::test]
async fn connectivity_check_flags_down_adapter_and_degrades_health() {
    let bus = Arc::new(EventBus::new());
    let mut rx = bus.filter().diagnostic_events();

    let records = Arc::new(AdapterStore::new(Arc::new(MemoryBackend::new())));
    let manager = Arc::new(AdapterManager::new(bus.clone(), records));
    manager
        .register(Arc::new(PinnedAdapter::new(
            "mqtt-main",
            ConnectionState::Connected,
        )))
        .await;
    manager
        .register(Arc::new(PinnedAdapter::new(
            "mqtt-backup",
            ConnectionState::Failed,
        )))
        .await;

    let engine = DiagnosticEngine::new(bus);
    engine.register_check(Arc::new(AdapterConnectivityCheck::new(manager.clone())));
    engine.start();
    tokio::time::sleep(Duration::from_millis(80)).await;
    engine.stop().await;

    let errors = engine.get_errors(&ErrorFilter::unresolved());
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].severity, Severity::High);
    assert!(errors[0].message.contains("mqtt-backup (failed)"));
    assert!(!errors[0].message.contains("mqtt-main"));

    let (event, _) = rx.try_recv().expect("reported event");
    assert!(matches!(
        event,
        GatewayEvent::DiagnosticErrorReported { .. }
    ));

    assert_eq!(engine.system_health().level, HealthLevel::Warning);

    // Resolving the only record restores health.
    let id = errors[0].id.clone();
    engine.resolve_error(&id, "operator").unwrap();
    assert_eq!(engine.system_health().level, HealthLevel::Healthy);
}

#[tokio::test]
async fn connectivity_check_passes_when_all_adapters_up() {
    let bus = Arc::new(EventBus::new());
    let records = Arc::new(AdapterStore::new(Arc::new(MemoryBackend::new())));
    let manager = Arc::new(AdapterManager::new(bus.clone(), records));
    manager
        .register(Arc::new(PinnedAdapter::new(
            "mqtt-main",
            ConnectionState::Connected,
        )))
        .await;

    let engine = DiagnosticEngine::new(bus);
    engine.register_check(Arc::new(AdapterConnectivityCheck::new(manager)));
    engine.start();
    tokio::time::sleep(Duration::from_millis(80)).await;
    engine.stop().await;

    assert!(engine.get_errors(&ErrorFilter::default()).is_empty());
    let checks = engine.get_checks();
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].last_result, Some(true));
    assert_eq!(engine.system_health().level, HealthLevel::Healthy);
}
