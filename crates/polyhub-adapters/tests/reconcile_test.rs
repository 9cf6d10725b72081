//! End-to-end reconciliation pipeline tests on in-memory stores.

mod common;

use common::expect_event;
use polyhub_adapters::Reconciler;
use polyhub_core::event::GatewayEvent;
use polyhub_core::eventbus::EventBus;
use polyhub_storage::{ActivityStore, DeviceStore, MemoryBackend};
use std::sync::Arc;

fn pipeline() -> (Reconciler, Arc<DeviceStore>, Arc<ActivityStore>, Arc<EventBus>) {
    let backend = Arc::new(MemoryBackend::new());
    let devices = Arc::new(DeviceStore::new(backend.clone()));
    let activity = Arc::new(ActivityStore::new(backend));
    let bus = Arc::new(EventBus::new());
    let reconciler = Reconciler::new("hub", devices.clone(), activity.clone(), bus.clone());
    (reconciler, devices, activity, bus)
}

#[tokio::test]
async fn round_trip_message_to_device_state() {
    let (reconciler, devices, activity, bus) = pipeline();
    let mut rx = bus.subscribe();

    reconciler
        .ingest("mqtt-main", "hub/zigbee/dev123/state", br#"{"state": "ON"}"#)
        .await;

    let device = devices
        .get_device_by_external_id("zigbee", "dev123")
        .unwrap()
        .expect("device created");
    assert_eq!(device.name, "zigbee dev123");
    assert_eq!(device.state["state"]["state"], "ON");
    assert!(device.online);

    let records = activity.recent(10).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].device_id, "dev123");
    assert_eq!(records[0].fields, vec!["state"]);

    expect_event(&mut rx, |e| matches!(e, GatewayEvent::DeviceDiscovered { .. })).await;
    let event = expect_event(&mut rx, |e| {
        matches!(e, GatewayEvent::MessageReconciled { .. })
    })
    .await;
    match event {
        GatewayEvent::MessageReconciled { channel, payload, .. } => {
            assert_eq!(channel, "hub/zigbee/dev123/state");
            assert_eq!(payload["state"], "ON");
        }
        _ => unreachable!(),
    }
    expect_event(&mut rx, |e| {
        matches!(e, GatewayEvent::DeviceStateChanged { .. })
    })
    .await;
}

#[tokio::test]
async fn malformed_payload_is_wrapped_not_dropped() {
    let (reconciler, devices, activity, _bus) = pipeline();

    reconciler
        .ingest("mqtt-main", "hub/zigbee/dev1/telemetry", b"23.5C ambient")
        .await;

    let device = devices
        .get_device_by_external_id("zigbee", "dev1")
        .unwrap()
        .unwrap();
    assert_eq!(device.state["telemetry"]["value"], "23.5C ambient");
    assert_eq!(activity.recent(10).unwrap().len(), 1);
}

#[tokio::test]
async fn foreign_namespace_is_dropped() {
    let (reconciler, devices, activity, _bus) = pipeline();

    reconciler
        .ingest("mqtt-main", "other/zigbee/dev1/state", br#"{"x": 1}"#)
        .await;

    assert!(devices
        .get_device_by_external_id("zigbee", "dev1")
        .unwrap()
        .is_none());
    assert!(activity.recent(10).unwrap().is_empty());
}

#[tokio::test]
async fn malformed_channel_is_dropped_quietly() {
    let (reconciler, devices, _activity, _bus) = pipeline();

    reconciler.ingest("mqtt-main", "hub/zigbee/dev1", b"{}").await;
    reconciler
        .ingest("mqtt-main", "hub/zigbee/dev1/state/extra", b"{}")
        .await;
    reconciler.ingest("mqtt-main", "", b"{}").await;

    assert_eq!(devices.count().unwrap(), 0);
}

#[tokio::test]
async fn message_types_merge_without_clobbering() {
    let (reconciler, devices, _activity, _bus) = pipeline();

    reconciler
        .ingest("mqtt-main", "hub/zigbee/dev1/state", br#"{"power": "ON"}"#)
        .await;
    reconciler
        .ingest(
            "mqtt-main",
            "hub/zigbee/dev1/telemetry",
            br#"{"temperature": 21.5}"#,
        )
        .await;
    reconciler
        .ingest("mqtt-main", "hub/zigbee/dev1/state", br#"{"power": "OFF"}"#)
        .await;

    let device = devices
        .get_device_by_external_id("zigbee", "dev1")
        .unwrap()
        .unwrap();
    assert_eq!(device.state["state"]["power"], "OFF");
    assert_eq!(device.state["telemetry"]["temperature"], 21.5);
}

#[tokio::test]
async fn second_message_does_not_rediscover_device() {
    let (reconciler, _devices, _activity, bus) = pipeline();
    let mut rx = bus.filter().custom(|e| matches!(e, GatewayEvent::DeviceDiscovered { .. }));

    reconciler
        .ingest("mqtt-main", "hub/zigbee/dev1/state", br#"{"power": "ON"}"#)
        .await;
    reconciler
        .ingest("mqtt-main", "hub/zigbee/dev1/state", br#"{"power": "OFF"}"#)
        .await;

    assert!(rx.try_recv().is_some());
    assert!(rx.try_recv().is_none());
}

#[tokio::test]
async fn namespace_can_change_at_runtime() {
    let (reconciler, devices, _activity, _bus) = pipeline();

    reconciler.set_namespace("factory");
    reconciler
        .ingest("mqtt-main", "hub/zigbee/dev1/state", br#"{"x": 1}"#)
        .await;
    assert_eq!(devices.count().unwrap(), 0);

    reconciler
        .ingest("mqtt-main", "factory/zigbee/dev1/state", br#"{"x": 1}"#)
        .await;
    assert_eq!(devices.count().unwrap(), 1);
}
