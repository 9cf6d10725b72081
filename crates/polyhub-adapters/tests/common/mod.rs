//! Shared test fixtures: a scriptable transport and a minimal adapter
//! built on the real supervisor.

#![allow(dead_code)]

use async_trait::async_trait;
use polyhub_adapters::adapter::{AdapterStatus, ProtocolAdapter, StatusHandle};
use polyhub_adapters::config::ConfigEffect;
use polyhub_adapters::resilience::{BackoffPolicy, ConnectionSupervisor, Transport};
use polyhub_adapters::topics::TopicRegistry;
use polyhub_core::error::{Error, Result};
use polyhub_core::event::GatewayEvent;
use polyhub_core::eventbus::{EventBusReceiver, SharedEventBus};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Transport with scripted connect outcomes and an injectable link
/// failure channel.
pub struct MockTransport {
    pub connect_attempts: AtomicU32,
    fail_first: u32,
    always_fail: bool,
    pub live_subscriptions: std::sync::Mutex<Vec<(String, u8)>>,
    pub presence: std::sync::Mutex<Vec<bool>>,
    failures: Mutex<mpsc::UnboundedReceiver<Error>>,
}

pub struct MockHandle {
    pub transport: Arc<MockTransport>,
    /// Send an error to make the running link fail.
    pub fail_link: mpsc::UnboundedSender<Error>,
}

impl MockTransport {
    /// `fail_first` connect attempts fail before one succeeds;
    /// `always_fail` makes every attempt fail.
    pub fn scripted(fail_first: u32, always_fail: bool) -> MockHandle {
        let (fail_link, failures) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport {
            connect_attempts: AtomicU32::new(0),
            fail_first,
            always_fail,
            live_subscriptions: std::sync::Mutex::new(Vec::new()),
            presence: std::sync::Mutex::new(Vec::new()),
            failures: Mutex::new(failures),
        });
        MockHandle {
            transport,
            fail_link,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> Vec<(String, u8)> {
        self.live_subscriptions.lock().unwrap().clone()
    }

    pub fn clear_subscriptions(&self) {
        self.live_subscriptions.lock().unwrap().clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<()> {
        let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.always_fail || attempt <= self.fail_first {
            Err(Error::Transport(format!("scripted connect failure {}", attempt)))
        } else {
            Ok(())
        }
    }

    async fn run(&self) -> Result<()> {
        let mut failures = self.failures.lock().await;
        match failures.recv().await {
            Some(err) => Err(err),
            // Script exhausted: finish cleanly.
            None => Ok(()),
        }
    }

    async fn disconnect(&self) {}

    async fn subscribe(&self, channel: &str, qos: u8) -> Result<()> {
        self.live_subscriptions
            .lock()
            .unwrap()
            .push((channel.to_string(), qos));
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.live_subscriptions
            .lock()
            .unwrap()
            .retain(|(c, _)| c != channel);
        Ok(())
    }

    async fn publish_presence(&self, online: bool) -> Result<()> {
        self.presence.lock().unwrap().push(online);
        Ok(())
    }
}

/// Build a supervisor over a mock transport with a short fixed backoff.
pub fn supervisor(
    name: &str,
    handle: &MockHandle,
    bus: SharedEventBus,
    max_attempts: u32,
) -> ConnectionSupervisor {
    ConnectionSupervisor::new(
        name,
        handle.transport.clone(),
        Arc::new(TopicRegistry::new()),
        BackoffPolicy::Fixed(Duration::from_millis(5)),
        StatusHandle::new(),
        bus,
    )
    .with_max_attempts(max_attempts)
}

/// Minimal adapter over the real supervisor, for manager tests.
pub struct TestAdapter {
    name: String,
    supervisor: ConnectionSupervisor,
    status: StatusHandle,
    startup_error: Option<String>,
}

impl TestAdapter {
    pub fn new(name: &str, handle: &MockHandle, bus: SharedEventBus) -> Self {
        let status = StatusHandle::new();
        let supervisor = ConnectionSupervisor::new(
            name,
            handle.transport.clone(),
            Arc::new(TopicRegistry::new()),
            BackoffPolicy::Fixed(Duration::from_millis(5)),
            status.clone(),
            bus,
        );
        Self {
            name: name.to_string(),
            supervisor,
            status,
            startup_error: None,
        }
    }

    pub fn with_startup_error(mut self, message: &str) -> Self {
        self.startup_error = Some(message.to_string());
        self
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }
}

#[async_trait]
impl ProtocolAdapter for TestAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> &str {
        "test"
    }

    async fn start(&self) -> Result<()> {
        if let Some(message) = &self.startup_error {
            return Err(Error::Startup(message.clone()));
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
        serde_json::json!({})
    }

    async fn update_config(&self, updates: HashMap<String, Value>) -> Result<ConfigEffect> {
        if updates.is_empty() {
            Ok(ConfigEffect::Applied)
        } else {
            Err(Error::Validation("test adapter has no config".to_string()))
        }
    }
}

/// Wait up to two seconds for a matching event.
pub async fn expect_event<F>(rx: &mut EventBusReceiver, pred: F) -> GatewayEvent
where
    F: Fn(&GatewayEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let (event, _) = rx.recv().await.expect("event bus closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
