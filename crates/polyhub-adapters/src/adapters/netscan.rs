//! Local-network scanner binding.
//!
//! Probes an HTTP scan root on connect and polls its device listing on
//! an interval, synthesizing canonical channels for the reconciler.
//! There is no broker here: subscriptions and presence are no-ops, and
//! "connection loss" means the scan root stopped answering for several
//! polls in a row.

use crate::adapter::{
    AdapterStatus, ConnectionState, ProtocolAdapter, ScanControl, StatusHandle,
};
use crate::adapters::AdapterContext;
use crate::config::{ConfigEffect, ScanConfig};
use crate::reconcile::Reconciler;
use crate::resilience::{BackoffPolicy, ConnectionSupervisor, Transport};
use crate::topics::TopicRegistry;
use async_trait::async_trait;
use polyhub_core::error::{Error, Result};
use polyhub_core::event::GatewayEvent;
use polyhub_core::eventbus::SharedEventBus;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Retry schedule when the scan root goes quiet.
pub const SCAN_BACKOFF: BackoffPolicy = BackoffPolicy::Exponential {
    base: Duration::from_secs(1),
    cap: Duration::from_secs(60),
};

/// Consecutive failed polls before the link counts as lost.
const POLL_FAILURE_LIMIT: u32 = 3;

/// Device entry in the scan root's listing.
#[derive(Debug, Deserialize)]
struct ScannedDevice {
    id: String,
    #[serde(flatten)]
    state: Map<String, Value>,
}

struct ScanTransport {
    name: String,
    config: Arc<RwLock<ScanConfig>>,
    reconciler: Arc<Reconciler>,
    status: StatusHandle,
    client: Mutex<Option<reqwest::Client>>,
    active: Arc<AtomicBool>,
}

impl ScanTransport {
    async fn poll_once(&self, client: &reqwest::Client) -> Result<()> {
        let (root, namespace) = {
            let config = self.config.read().await;
            (config.scan_root.clone(), config.namespace.clone())
        };
        let url = format!("{}/devices", root.trim_end_matches('/'));

        let devices: Vec<ScannedDevice> = client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Decode(e.to_string()))?;

        for device in devices {
            let channel = format!("{}/scan/{}/state", namespace, device.id);
            let payload = serde_json::to_vec(&device.state).unwrap_or_default();
            self.status.record_received();
            self.reconciler.ingest(&self.name, &channel, &payload).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for ScanTransport {
    async fn connect(&self) -> Result<()> {
        let config = self.config.read().await.clone();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        // Probe the root so a dead scan target fails the attempt now,
        // not on the first poll.
        client
            .get(&config.scan_root)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::Transport(format!("scan root {}: {}", config.scan_root, e)))?;

        *self.client.lock().await = Some(client);
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        let client = self
            .client
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::Transport("scan client not connected".to_string()))?;

        let mut consecutive_failures = 0u32;
        loop {
            let interval = self.config.read().await.poll_interval_secs;
            tokio::time::sleep(Duration::from_secs(interval)).await;

            if !self.active.load(Ordering::Relaxed) {
                continue;
            }

            match self.poll_once(&client).await {
                Ok(()) => consecutive_failures = 0,
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        adapter = %self.name,
                        failures = consecutive_failures,
                        error = %e,
                        "scan poll failed"
                    );
                    if consecutive_failures >= POLL_FAILURE_LIMIT {
                        return Err(Error::Transport(format!(
                            "scan root unreachable after {} polls: {}",
                            consecutive_failures, e
                        )));
                    }
                }
            }
        }
    }

    async fn disconnect(&self) {
        *self.client.lock().await = None;
    }

    async fn subscribe(&self, _channel: &str, _qos: u8) -> Result<()> {
        Ok(())
    }

    async fn unsubscribe(&self, _channel: &str) -> Result<()> {
        Ok(())
    }

    async fn publish_presence(&self, _online: bool) -> Result<()> {
        Ok(())
    }
}

/// Local-network scanning adapter.
pub struct ScanAdapter {
    name: String,
    config: Arc<RwLock<ScanConfig>>,
    reconciler: Arc<Reconciler>,
    supervisor: ConnectionSupervisor,
    status: StatusHandle,
    active: Arc<AtomicBool>,
    bus: SharedEventBus,
}

impl ScanAdapter {
    pub fn new(name: impl Into<String>, config: ScanConfig, ctx: &AdapterContext) -> Self {
        let name = name.into();
        let namespace = config.namespace.clone();
        let active = Arc::new(AtomicBool::new(config.scan_active));
        let config = Arc::new(RwLock::new(config));
        let registry = Arc::new(TopicRegistry::new());
        let status = StatusHandle::new();
        let reconciler = Arc::new(Reconciler::new(
            namespace,
            ctx.devices.clone(),
            ctx.activity.clone(),
            ctx.bus.clone(),
        ));

        let transport = Arc::new(ScanTransport {
            name: name.clone(),
            config: config.clone(),
            reconciler: reconciler.clone(),
            status: status.clone(),
            client: Mutex::new(None),
            active: active.clone(),
        });

        let supervisor = ConnectionSupervisor::new(
            name.clone(),
            transport,
            registry,
            SCAN_BACKOFF,
            status.clone(),
            ctx.bus.clone(),
        );

        Self {
            name,
            config,
            reconciler,
            supervisor,
            status,
            active,
            bus: ctx.bus.clone(),
        }
    }
}

#[async_trait]
impl ProtocolAdapter for ScanAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> &str {
        "scan"
    }

    async fn start(&self) -> Result<()> {
        if self.config.read().await.scan_root.trim().is_empty() {
            return Err(Error::Startup("scan root URL is empty".to_string()));
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
            self.active.store(config.scan_active, Ordering::Relaxed);
            effect
        };
        if effect == ConfigEffect::Reconnect
            && self.status.connection() != ConnectionState::Disconnected
        {
            self.supervisor.restart().await?;
        }
        Ok(effect)
    }

    fn scan_control(&self) -> Option<&dyn ScanControl> {
        Some(self)
    }
}

#[async_trait]
impl ScanControl for ScanAdapter {
    async fn set_scan_mode(&self, active: bool) -> Result<()> {
        let previous = self.active.swap(active, Ordering::Relaxed);
        if previous != active {
            self.bus.publish_with_source(
                GatewayEvent::ScanModeChanged {
                    adapter: self.name.clone(),
                    active,
                },
                self.name.clone(),
            );
        }
        Ok(())
    }

    fn scan_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}
