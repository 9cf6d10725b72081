//! MQTT broker binding using rumqttc.
//!
//! Announces gateway presence on `<namespace>/bridge/state` with a
//! retained last-will, replays registry subscriptions on every
//! reconnect, and feeds inbound publishes into the reconciler. MQTT
//! brokers are expected nearby, so retries use a flat 5 second delay.

use crate::adapter::{
    AdapterStatus, ConnectionState, DeviceControl, ProtocolAdapter, StatusHandle,
};
use crate::adapters::AdapterContext;
use crate::config::{ConfigEffect, MqttConfig};
use crate::reconcile::{decode_payload, Reconciler};
use crate::resilience::{BackoffPolicy, ConnectionSupervisor, Transport};
use crate::topics::TopicRegistry;
use async_trait::async_trait;
use polyhub_core::error::{Error, Result};
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Flat retry delay for broker connections.
pub const MQTT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

fn to_qos(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

fn presence_topic(namespace: &str) -> String {
    format!("{}/bridge/state", namespace)
}

struct MqttTransport {
    name: String,
    config: Arc<RwLock<MqttConfig>>,
    reconciler: Arc<Reconciler>,
    registry: Arc<TopicRegistry>,
    status: StatusHandle,
    client: Mutex<Option<AsyncClient>>,
    eventloop: Mutex<Option<EventLoop>>,
}

impl MqttTransport {
    async fn publish(&self, topic: &str, qos: u8, retain: bool, payload: Vec<u8>) -> Result<()> {
        let guard = self.client.lock().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| Error::NotConnected("mqtt client".to_string()))?;
        client
            .publish(topic, to_qos(qos), retain, payload)
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<()> {
        let config = self.config.read().await.clone();
        let client_id = format!("polyhub-{}-{}", self.name, uuid::Uuid::new_v4().simple());

        let mut opts = MqttOptions::new(client_id, &config.host, config.port);
        opts.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        opts.set_clean_session(config.clean_session);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            opts.set_credentials(user, pass);
        }
        opts.set_last_will(LastWill::new(
            presence_topic(&config.namespace),
            "offline",
            QoS::AtLeastOnce,
            true,
        ));

        let (client, mut eventloop) = AsyncClient::new(opts, 64);

        // The link is only up once the broker acknowledges the session.
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => break,
                Ok(_) => continue,
                Err(e) => return Err(Error::Transport(e.to_string())),
            }
        }

        *self.client.lock().await = Some(client);
        *self.eventloop.lock().await = Some(eventloop);
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        let mut guard = self.eventloop.lock().await;
        let eventloop = guard
            .as_mut()
            .ok_or_else(|| Error::Transport("mqtt event loop not connected".to_string()))?;

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.status.record_received();
                    let topic = publish.topic.clone();
                    self.registry
                        .record_message(&topic, decode_payload(&publish.payload))
                        .await;
                    self.reconciler
                        .ingest(&self.name, &topic, &publish.payload)
                        .await;
                }
                Ok(_) => {}
                Err(e) => return Err(Error::Transport(e.to_string())),
            }
        }
    }

    async fn disconnect(&self) {
        if let Some(client) = self.client.lock().await.take() {
            let _ = client.disconnect().await;
        }
        *self.eventloop.lock().await = None;
    }

    async fn subscribe(&self, channel: &str, qos: u8) -> Result<()> {
        let guard = self.client.lock().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| Error::NotConnected("mqtt client".to_string()))?;
        client
            .subscribe(channel, to_qos(qos))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        let guard = self.client.lock().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| Error::NotConnected("mqtt client".to_string()))?;
        client
            .unsubscribe(channel)
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn publish_presence(&self, online: bool) -> Result<()> {
        let namespace = self.config.read().await.namespace.clone();
        let payload = if online { "online" } else { "offline" };
        self.publish(
            &presence_topic(&namespace),
            1,
            true,
            payload.as_bytes().to_vec(),
        )
        .await?;
        self.status.record_published();
        Ok(())
    }
}

/// MQTT protocol adapter.
pub struct MqttAdapter {
    name: String,
    config: Arc<RwLock<MqttConfig>>,
    reconciler: Arc<Reconciler>,
    transport: Arc<MqttTransport>,
    supervisor: ConnectionSupervisor,
    status: StatusHandle,
}

impl MqttAdapter {
    pub fn new(name: impl Into<String>, config: MqttConfig, ctx: &AdapterContext) -> Self {
        let name = name.into();
        let namespace = config.namespace.clone();
        let config = Arc::new(RwLock::new(config));
        let registry = Arc::new(TopicRegistry::new());
        let status = StatusHandle::new();
        let reconciler = Arc::new(Reconciler::new(
            namespace,
            ctx.devices.clone(),
            ctx.activity.clone(),
            ctx.bus.clone(),
        ));

        let transport = Arc::new(MqttTransport {
            name: name.clone(),
            config: config.clone(),
            reconciler: reconciler.clone(),
            registry: registry.clone(),
            status: status.clone(),
            client: Mutex::new(None),
            eventloop: Mutex::new(None),
        });

        let supervisor = ConnectionSupervisor::new(
            name.clone(),
            transport.clone(),
            registry,
            BackoffPolicy::Fixed(MQTT_RECONNECT_DELAY),
            status.clone(),
            ctx.bus.clone(),
        );

        Self {
            name,
            config,
            reconciler,
            transport,
            supervisor,
            status,
        }
    }

    /// Subscribe to a broker topic. Queued while disconnected, replayed
    /// on reconnect.
    pub async fn subscribe(&self, channel: &str, qos: u8) -> Result<()> {
        self.supervisor.subscribe(channel, qos).await
    }

    pub async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.supervisor.unsubscribe(channel).await
    }

    pub fn registry(&self) -> &Arc<TopicRegistry> {
        self.supervisor.registry()
    }
}

#[async_trait]
impl ProtocolAdapter for MqttAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> &str {
        "mqtt"
    }

    async fn start(&self) -> Result<()> {
        {
            let config = self.config.read().await;
            if config.host.trim().is_empty() {
                return Err(Error::Startup("mqtt broker host is empty".to_string()));
            }
            // Only the v4 client is wired up; refuse rather than silently
            // downgrade a v5 session.
            if config.protocol_variant != "v4" {
                return Err(Error::Startup(format!(
                    "unsupported mqtt protocol variant '{}'",
                    config.protocol_variant
                )));
            }
        }
        self.supervisor.start().await
    }

    async fn stop(&self) -> Result<()> {
        self.supervisor.stop().await;
        Ok(())
    }

    fn status(&self) -> AdapterStatus {
        self.status.snapshot()
    }

    async fn config(&self) -> Value {
        serde_json::to_value(&*self.config.read().await).unwrap_or(Value::Null)
    }

    async fn update_config(&self, updates: HashMap<String, Value>) -> Result<ConfigEffect> {
        let effect = {
            let mut config = self.config.write().await;
            let effect = config.apply_updates(&updates)?;
            self.reconciler.set_namespace(config.namespace.clone());
            effect
        };
        if effect == ConfigEffect::Reconnect
            && self.status.connection() != ConnectionState::Disconnected
        {
            self.supervisor.restart().await?;
        }
        Ok(effect)
    }

    fn device_control(&self) -> Option<&dyn DeviceControl> {
        Some(self)
    }
}

#[async_trait]
impl DeviceControl for MqttAdapter {
    async fn send_command(&self, protocol: &str, device_id: &str, command: Value) -> Result<()> {
        if self.status.connection() != ConnectionState::Connected {
            return Err(Error::NotConnected(format!("adapter '{}'", self.name)));
        }
        let (namespace, qos) = {
            let config = self.config.read().await;
            (config.namespace.clone(), config.qos)
        };
        let topic = format!("{}/{}/{}/set", namespace, protocol, device_id);
        let payload = serde_json::to_vec(&command)?;
        self.transport.publish(&topic, qos, false, payload).await?;
        self.status.record_published();
        Ok(())
    }
}
