//! Gateway Adapter Framework Example
//!
//! Demonstrates the adapter framework without needing a live broker:
//! 1. AdapterManager for registration and batch lifecycle
//! 2. Subscription intent queued while disconnected
//! 3. Reconciliation of raw frames into the device store
//! 4. Event bus observation of the whole pipeline

use std::collections::HashMap;
use std::sync::Arc;

use polyhub_adapters::{
    AdapterContext, AdapterManager, MeshAdapter, MeshConfig, MqttAdapter, MqttConfig, Reconciler,
};
use polyhub_core::EventBus;
use polyhub_storage::{ActivityStore, AdapterStore, DeviceStore, MemoryBackend};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("=== PolyHub Gateway Adapter Demo ===\n");

    // Initialize core components
    let bus = Arc::new(EventBus::new());
    let backend = Arc::new(MemoryBackend::new());
    let devices = Arc::new(DeviceStore::new(backend.clone()));
    let activity = Arc::new(ActivityStore::new(backend));
    let ctx = AdapterContext::new(bus.clone(), devices.clone(), activity.clone());

    let mut events = bus.subscribe();

    // === Example 1: Register Adapters ===
    println!("--- Example 1: Register Adapters ---");

    let adapter_records = Arc::new(AdapterStore::new(Arc::new(MemoryBackend::new())));
    let manager = AdapterManager::new(bus.clone(), adapter_records.clone());
    let mqtt = Arc::new(MqttAdapter::new(
        "mqtt-main",
        MqttConfig::default(),
        &ctx,
    ));
    manager.register(mqtt.clone()).await;

    // No bridge address yet: start() will fail with a startup error.
    let mesh = Arc::new(MeshAdapter::new("mesh-main", MeshConfig::default(), &ctx));
    manager.register(mesh.clone()).await;

    for adapter in manager.list().await {
        println!("  - {} ({})", adapter.name(), adapter.protocol());
    }
    println!();

    // === Example 2: Queue Subscription Intent ===
    println!("--- Example 2: Queue Subscription Intent ---");

    mqtt.subscribe("polyhub/+/+/state", 1).await?;
    mqtt.subscribe("polyhub/+/+/telemetry", 0).await?;
    for entry in mqtt.registry().entries().await {
        println!("  queued: {} (qos {})", entry.channel, entry.qos);
    }
    println!();

    // === Example 3: Batch Start With Partial Failure ===
    println!("--- Example 3: Batch Start With Partial Failure ---");

    for outcome in manager.start_all().await {
        match &outcome.result {
            Ok(()) => println!("  {} started", outcome.adapter),
            Err(e) => println!("  {} failed: {}", outcome.adapter, e),
        }
    }
    manager.stop_all().await;
    println!();

    // === Example 4: Reconcile Raw Frames ===
    println!("--- Example 4: Reconcile Raw Frames ---");

    let reconciler = Reconciler::new("polyhub", devices.clone(), activity.clone(), bus.clone());
    reconciler
        .ingest("demo", "polyhub/zigbee/dev123/state", br#"{"state": "ON"}"#)
        .await;
    reconciler
        .ingest("demo", "polyhub/zigbee/dev123/telemetry", b"23.5C ambient")
        .await;

    for device in devices.list_devices(None)? {
        println!("  device: {} ({})", device.name, device.device_type);
        println!("  state: {}", serde_json::to_string_pretty(&device.state)?);
    }
    for record in activity.recent(10)? {
        println!("  activity: {} - {}", record.device_id, record.summary);
    }
    println!();

    // === Example 5: Observe the Event Bus ===
    println!("--- Example 5: Observe the Event Bus ---");

    while let Some((event, meta)) = events.try_recv() {
        println!("  [{}] {}", meta.source, event.type_name());
    }

    // === Example 6: Runtime Config Update ===
    println!("\n--- Example 6: Runtime Config Update ---");

    let mut updates = HashMap::new();
    updates.insert("qos".to_string(), serde_json::json!(2));
    let effect = manager.update_adapter_config("mqtt-main", updates).await?;
    println!("  applied qos update, effect: {:?} ", effect);
    if let Some(record) = adapter_records.get_adapter_by_name("mqtt-main")? {
        println!("  persisted record status: {:?}", record.status);
    }

    println!("\n=== Demo Complete ===");
    Ok(())
}
