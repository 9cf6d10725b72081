//! Mesh bridge binding.
//!
//! Talks to a mesh coordinator bridge over TCP with newline-delimited
//! JSON frames. Inbound frames carry `{ "channel": ..., "payload": ... }`
//! and flow into the reconciler; outbound frames cover subscriptions,
//! presence and the permit-join window. Bridges restart slowly, so the
//! retry schedule backs off exponentially from 1 s up to 60 s.

use crate::adapter::{
    AdapterStatus, ConnectionState, PermitJoin, ProtocolAdapter, StatusHandle,
};
use crate::adapters::AdapterContext;
use crate::config::{ConfigEffect, MeshConfig};
use crate::reconcile::Reconciler;
use crate::resilience::{BackoffPolicy, ConnectionSupervisor, Transport};
use crate::topics::TopicRegistry;
use async_trait::async_trait;
use polyhub_core::error::{Error, Result};
use polyhub_core::event::GatewayEvent;
use polyhub_core::eventbus::SharedEventBus;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};

/// Retry schedule for bridge connections.
pub const MESH_BACKOFF: BackoffPolicy = BackoffPolicy::Exponential {
    base: Duration::from_secs(1),
    cap: Duration::from_secs(60),
};

/// One frame from the bridge.
#[derive(Debug, Deserialize)]
struct InboundFrame {
    channel: String,
    payload: Value,
}

struct MeshTransport {
    name: String,
    config: Arc<RwLock<MeshConfig>>,
    reconciler: Arc<Reconciler>,
    registry: Arc<TopicRegistry>,
    status: StatusHandle,
    reader: Mutex<Option<BufReader<OwnedReadHalf>>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl MeshTransport {
    async fn send_frame(&self, frame: &Value) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| Error::NotConnected("mesh bridge".to_string()))?;
        let mut line = serde_json::to_vec(frame)?;
        line.push(b'\n');
        writer
            .write_all(&line)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Transport for MeshTransport {
    async fn connect(&self) -> Result<()> {
        let addr = self
            .config
            .read()
            .await
            .bridge_addr
            .clone()
            .ok_or_else(|| Error::Transport("no bridge address configured".to_string()))?;

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| Error::Transport(format!("bridge {}: {}", addr, e)))?;
        let (read_half, write_half) = stream.into_split();

        *self.reader.lock().await = Some(BufReader::new(read_half));
        *self.writer.lock().await = Some(write_half);
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        let mut guard = self.reader.lock().await;
        let reader = guard
            .as_mut()
            .ok_or_else(|| Error::Transport("bridge reader not connected".to_string()))?;

        let mut line = String::new();
        loop {
            line.clear();
            let n = reader
                .read_line(&mut line)
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
            if n == 0 {
                return Err(Error::Transport(
                    "bridge closed the connection".to_string(),
                ));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<InboundFrame>(trimmed) {
                Ok(frame) => {
                    self.status.record_received();
                    self.registry
                        .record_message(&frame.channel, frame.payload.clone())
                        .await;
                    let payload = serde_json::to_vec(&frame.payload).unwrap_or_default();
                    self.reconciler
                        .ingest(&self.name, &frame.channel, &payload)
                        .await;
                }
                Err(e) => {
                    tracing::warn!(adapter = %self.name, error = %e, "malformed bridge frame");
                }
            }
        }
    }

    async fn disconnect(&self) {
        *self.reader.lock().await = None;
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }

    async fn subscribe(&self, channel: &str, qos: u8) -> Result<()> {
        self.send_frame(&json!({
            "type": "subscribe",
            "channel": channel,
            "qos": qos,
        }))
        .await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.send_frame(&json!({
            "type": "unsubscribe",
            "channel": channel,
        }))
        .await
    }

    async fn publish_presence(&self, online: bool) -> Result<()> {
        self.send_frame(&json!({
            "type": "bridge_state",
            "online": online,
        }))
        .await?;
        self.status.record_published();
        Ok(())
    }
}

/// Mesh network adapter speaking to a coordinator bridge.
pub struct MeshAdapter {
    name: String,
    config: Arc<RwLock<MeshConfig>>,
    reconciler: Arc<Reconciler>,
    transport: Arc<MeshTransport>,
    supervisor: ConnectionSupervisor,
    status: StatusHandle,
    bus: SharedEventBus,
}

impl MeshAdapter {
    pub fn new(name: impl Into<String>, config: MeshConfig, ctx: &AdapterContext) -> Self {
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

        let transport = Arc::new(MeshTransport {
            name: name.clone(),
            config: config.clone(),
            reconciler: reconciler.clone(),
            registry: registry.clone(),
            status: status.clone(),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        });

        let supervisor = ConnectionSupervisor::new(
            name.clone(),
            transport.clone(),
            registry,
            MESH_BACKOFF,
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
            bus: ctx.bus.clone(),
        }
    }

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
impl ProtocolAdapter for MeshAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> &str {
        "mesh"
    }

    async fn start(&self) -> Result<()> {
        match &self.config.read().await.bridge_addr {
            Some(addr) if !addr.trim().is_empty() => {}
            _ => {
                return Err(Error::Startup(
                    "mesh bridge address is not configured".to_string(),
                ))
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

    fn permit_join(&self) -> Option<&dyn PermitJoin> {
        Some(self)
    }
}

#[async_trait]
impl PermitJoin for MeshAdapter {
    async fn set_permit_join(&self, enabled: bool, duration: Option<Duration>) -> Result<()> {
        if self.status.connection() != ConnectionState::Connected {
            return Err(Error::NotConnected(format!("adapter '{}'", self.name)));
        }
        let duration_secs = if enabled {
            let secs = match duration {
                Some(d) => d.as_secs(),
                None => self.config.read().await.default_permit_join_secs,
            };
            Some(secs)
        } else {
            None
        };
        self.transport
            .send_frame(&json!({
                "type": "permit_join",
                "enabled": enabled,
                "duration_secs": duration_secs,
            }))
            .await?;
        self.status.record_published();
        self.bus.publish_with_source(
            GatewayEvent::PermitJoinChanged {
                adapter: self.name.clone(),
                enabled,
                duration_secs,
            },
            self.name.clone(),
        );
        Ok(())
    }
}
