//! Adapter manager.
//!
//! Owns the set of registered protocol adapters, fans lifecycle
//! operations out concurrently, keeps the persistent adapter records in
//! step with that lifecycle, and bridges bus events to a single external
//! broadcast hook.

use crate::adapter::ProtocolAdapter;
use crate::config::ConfigEffect;
use futures::future::join_all;
use polyhub_core::error::{Error, Result};
use polyhub_core::event::GatewayEvent;
use polyhub_core::eventbus::SharedEventBus;
use polyhub_storage::{AdapterRecord, AdapterRecordStatus, AdapterStore};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-adapter result of a batch lifecycle operation.
#[derive(Debug)]
pub struct AdapterOutcome {
    pub adapter: String,
    pub result: std::result::Result<(), String>,
}

impl AdapterOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

type BroadcastHook = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Registry and lifecycle coordinator for protocol adapters.
pub struct AdapterManager {
    adapters: RwLock<HashMap<String, Arc<dyn ProtocolAdapter>>>,
    /// Registration order, for deterministic batch operations.
    order: RwLock<Vec<String>>,
    /// Persistent adapter records, kept in step with the lifecycle.
    records: Arc<AdapterStore>,
    bus: SharedEventBus,
    hook_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AdapterManager {
    pub fn new(bus: SharedEventBus, records: Arc<AdapterStore>) -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            records,
            bus,
            hook_task: parking_lot::Mutex::new(None),
        }
    }

    pub fn bus(&self) -> &SharedEventBus {
        &self.bus
    }

    pub fn records(&self) -> &Arc<AdapterStore> {
        &self.records
    }

    /// Register an adapter under its name. Re-registering an existing
    /// name replaces the old instance with a warning. The first
    /// registration creates a persistent record in `inactive` status;
    /// later registrations keep the existing record.
    pub async fn register(&self, adapter: Arc<dyn ProtocolAdapter>) {
        let name = adapter.name().to_string();
        let protocol = adapter.protocol().to_string();
        let config = adapter.config().await;

        let mut adapters = self.adapters.write().await;
        if adapters.insert(name.clone(), adapter).is_some() {
            tracing::warn!(adapter = %name, "re-registered, replacing existing instance");
        } else {
            self.order.write().await.push(name.clone());
        }
        drop(adapters);

        match self.records.get_adapter_by_name(&name) {
            Ok(Some(_)) => {}
            Ok(None) => {
                let record = AdapterRecord::new(name.clone(), protocol.clone(), config);
                if let Err(e) = self.records.insert_adapter(&record) {
                    tracing::warn!(adapter = %name, error = %e, "adapter record write failed");
                }
            }
            Err(e) => {
                tracing::warn!(adapter = %name, error = %e, "adapter record lookup failed");
            }
        }

        self.bus.publish_with_source(
            GatewayEvent::AdapterRegistered {
                adapter: name.clone(),
                protocol,
            },
            name,
        );
    }

    fn persist_status(&self, name: &str, status: AdapterRecordStatus) {
        let result = self.records.update_adapter(name, |record| {
            record.status = status;
            record.last_seen = Some(chrono::Utc::now().timestamp_millis());
        });
        if let Err(e) = result {
            tracing::warn!(adapter = %name, error = %e, "adapter record update failed");
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn ProtocolAdapter>> {
        self.adapters.read().await.get(name).cloned()
    }

    /// All adapters in registration order.
    pub async fn list(&self) -> Vec<Arc<dyn ProtocolAdapter>> {
        let adapters = self.adapters.read().await;
        self.order
            .read()
            .await
            .iter()
            .filter_map(|name| adapters.get(name).cloned())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.adapters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.adapters.read().await.is_empty()
    }

    /// Start every adapter concurrently. One adapter failing to start
    /// never aborts the others; the outcome report carries each result.
    /// Records move to `active` on success, `error` on failure.
    pub async fn start_all(&self) -> Vec<AdapterOutcome> {
        let adapters = self.list().await;
        let futures = adapters.into_iter().map(|adapter| async move {
            let name = adapter.name().to_string();
            let result = adapter.start().await.map_err(|e| e.to_string());
            if let Err(e) = &result {
                tracing::error!(adapter = %name, error = %e, "start failed");
            }
            AdapterOutcome {
                adapter: name,
                result,
            }
        });
        let outcomes = join_all(futures).await;
        for outcome in &outcomes {
            let status = if outcome.succeeded() {
                AdapterRecordStatus::Active
            } else {
                AdapterRecordStatus::Error
            };
            self.persist_status(&outcome.adapter, status);
        }
        outcomes
    }

    /// Stop every adapter concurrently. Records move to `inactive` on
    /// success, `error` on failure.
    pub async fn stop_all(&self) -> Vec<AdapterOutcome> {
        let adapters = self.list().await;
        let futures = adapters.into_iter().map(|adapter| async move {
            let name = adapter.name().to_string();
            let result = adapter.stop().await.map_err(|e| e.to_string());
            AdapterOutcome {
                adapter: name,
                result,
            }
        });
        let outcomes = join_all(futures).await;
        for outcome in &outcomes {
            let status = if outcome.succeeded() {
                AdapterRecordStatus::Inactive
            } else {
                AdapterRecordStatus::Error
            };
            self.persist_status(&outcome.adapter, status);
        }
        outcomes
    }

    /// Apply a configuration update through the manager so the persisted
    /// record stays in step with the live adapter.
    pub async fn update_adapter_config(
        &self,
        name: &str,
        updates: HashMap<String, Value>,
    ) -> Result<ConfigEffect> {
        let adapter = self
            .get(name)
            .await
            .ok_or_else(|| Error::NotFound(format!("adapter '{}'", name)))?;
        let effect = adapter.update_config(updates).await?;
        let config = adapter.config().await;
        let persisted = self.records.update_adapter(name, |record| {
            record.config = config.clone();
            record.last_seen = Some(chrono::Utc::now().timestamp_millis());
        });
        if let Err(e) = persisted {
            tracing::warn!(adapter = %name, error = %e, "adapter record update failed");
        }
        Ok(effect)
    }

    /// Install the single external broadcast hook. Every bus event is
    /// forwarded as `(type_name, serialized event)`. Installing a new
    /// hook replaces the previous one.
    pub fn set_broadcast_hook<F>(&self, hook: F)
    where
        F: Fn(&str, Value) + Send + Sync + 'static,
    {
        let hook: BroadcastHook = Arc::new(hook);
        let mut rx = self.bus.subscribe();
        let task = tokio::spawn(async move {
            while let Some((event, _meta)) = rx.recv().await {
                match serde_json::to_value(&event) {
                    Ok(value) => hook(event.type_name(), value),
                    Err(e) => {
                        tracing::debug!(error = %e, "event not serializable for hook")
                    }
                }
            }
        });

        let mut slot = self.hook_task.lock();
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }
}

impl Drop for AdapterManager {
    fn drop(&mut self) {
        if let Some(task) = self.hook_task.lock().take() {
            task.abort();
        }
    }
}
