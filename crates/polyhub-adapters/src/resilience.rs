//! Connection resilience.
//!
//! [`ConnectionSupervisor`] drives a [`Transport`] through the connection
//! lifecycle: connect, replay subscriptions, run until the link drops,
//! back off, retry. Protocol bindings supply the transport; the supervisor
//! owns the state machine so every adapter recovers the same way.

use crate::adapter::{ConnectionState, StatusHandle};
use crate::topics::TopicRegistry;
use async_trait::async_trait;
use polyhub_core::error::{Error, Result};
use polyhub_core::event::GatewayEvent;
use polyhub_core::eventbus::SharedEventBus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Consecutive failed attempts before the supervisor gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Low-level link driven by the supervisor.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the link. Returns once the link is usable.
    async fn connect(&self) -> Result<()>;

    /// Pump the link. Blocks while the link is healthy; returns `Err` on
    /// failure, `Ok` only if the transport finished on its own terms.
    async fn run(&self) -> Result<()>;

    /// Tear the link down. Must tolerate an already-dead link.
    async fn disconnect(&self);

    /// Issue a live subscription on the link.
    async fn subscribe(&self, channel: &str, qos: u8) -> Result<()>;

    /// Remove a live subscription.
    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    /// Announce gateway presence (online/offline) where the protocol
    /// supports it. Transports without a presence concept return `Ok`.
    async fn publish_presence(&self, online: bool) -> Result<()>;
}

/// Retry delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Same delay for every attempt.
    Fixed(Duration),
    /// Delay doubles per attempt, capped.
    Exponential { base: Duration, cap: Duration },
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(d) => *d,
            Self::Exponential { base, cap } => {
                let shift = attempt.saturating_sub(1).min(16);
                let delay = base.saturating_mul(1u32 << shift);
                delay.min(*cap)
            }
        }
    }
}

/// Drives a transport through connect/run/backoff/retry cycles.
pub struct ConnectionSupervisor {
    name: String,
    transport: Arc<dyn Transport>,
    registry: Arc<TopicRegistry>,
    backoff: BackoffPolicy,
    max_attempts: u32,
    status: StatusHandle,
    bus: SharedEventBus,
    task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl ConnectionSupervisor {
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        registry: Arc<TopicRegistry>,
        backoff: BackoffPolicy,
        status: StatusHandle,
        bus: SharedEventBus,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            registry,
            backoff,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            status,
            bus,
            task: Mutex::new(None),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn status(&self) -> &StatusHandle {
        &self.status
    }

    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    /// Spawn the connection loop. A call while the loop is already
    /// running is a no-op; a call after Failed or a clean stop starts a
    /// fresh loop with a reset attempt counter.
    pub async fn start(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if let Some((_, handle)) = task.as_ref() {
            if !handle.is_finished() {
                tracing::debug!(adapter = %self.name, "start ignored, already running");
                return Ok(());
            }
        }
        *task = None;

        self.status.reset_attempts();
        self.status.set_connection(ConnectionState::Connecting);

        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = LoopCtx {
            name: self.name.clone(),
            transport: self.transport.clone(),
            registry: self.registry.clone(),
            backoff: self.backoff,
            max_attempts: self.max_attempts,
            status: self.status.clone(),
            bus: self.bus.clone(),
        };
        let handle = tokio::spawn(run_loop(ctx, stop_rx));
        *task = Some((stop_tx, handle));
        Ok(())
    }

    /// Stop the loop: cancels a pending retry immediately, or tears down
    /// the live link with an offline presence notice. Idempotent.
    pub async fn stop(&self) {
        let taken = self.task.lock().await.take();
        if let Some((stop_tx, handle)) = taken {
            let _ = stop_tx.send(true);
            let _ = handle.await;
        }
        self.status.set_connection(ConnectionState::Disconnected);
    }

    /// Stop and start with a fresh attempt counter. Used after a
    /// connection-affecting config change.
    pub async fn restart(&self) -> Result<()> {
        self.stop().await;
        self.start().await
    }

    /// Record subscription intent; issue the live call only when the
    /// link is up. While disconnected the intent is queued and replayed
    /// on reconnect.
    pub async fn subscribe(&self, channel: &str, qos: u8) -> Result<()> {
        self.registry.subscribe(channel, qos).await;
        if self.status.connection() == ConnectionState::Connected {
            self.transport
                .subscribe(channel, qos)
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
        }
        Ok(())
    }

    /// Drop subscription intent; issue the live call only when connected.
    pub async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.registry.unsubscribe(channel).await;
        if self.status.connection() == ConnectionState::Connected {
            self.transport
                .unsubscribe(channel)
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
        }
        Ok(())
    }
}

struct LoopCtx {
    name: String,
    transport: Arc<dyn Transport>,
    registry: Arc<TopicRegistry>,
    backoff: BackoffPolicy,
    max_attempts: u32,
    status: StatusHandle,
    bus: SharedEventBus,
}

async fn run_loop(ctx: LoopCtx, mut stop_rx: watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow() {
            ctx.status.set_connection(ConnectionState::Disconnected);
            return;
        }

        let attempt = ctx.status.begin_attempt();
        tracing::debug!(adapter = %ctx.name, attempt, "connecting");

        let connect = tokio::select! {
            res = ctx.transport.connect() => Some(res),
            _ = stop_rx.changed() => None,
        };

        match connect {
            None => {
                ctx.transport.disconnect().await;
                ctx.status.set_connection(ConnectionState::Disconnected);
                return;
            }
            Some(Ok(())) => {
                if let Err(e) = ctx.transport.publish_presence(true).await {
                    tracing::warn!(adapter = %ctx.name, error = %e, "presence publish failed");
                }
                // Replay subscription intent in registration order.
                for entry in ctx.registry.entries().await {
                    if let Err(e) = ctx.transport.subscribe(&entry.channel, entry.qos).await {
                        tracing::warn!(
                            adapter = %ctx.name,
                            channel = %entry.channel,
                            error = %e,
                            "subscription replay failed"
                        );
                    }
                }
                ctx.status.reset_attempts();
                ctx.status.set_connection(ConnectionState::Connected);
                tracing::info!(adapter = %ctx.name, "connected");
                ctx.bus.publish_with_source(
                    GatewayEvent::AdapterConnected {
                        adapter: ctx.name.clone(),
                    },
                    ctx.name.clone(),
                );

                let outcome = tokio::select! {
                    res = ctx.transport.run() => Some(res),
                    _ = stop_rx.changed() => None,
                };

                match outcome {
                    None => {
                        // Clean stop while connected.
                        if let Err(e) = ctx.transport.publish_presence(false).await {
                            tracing::debug!(adapter = %ctx.name, error = %e, "offline presence failed");
                        }
                        ctx.transport.disconnect().await;
                        ctx.status.set_connection(ConnectionState::Disconnected);
                        return;
                    }
                    Some(Ok(())) => {
                        ctx.status.set_connection(ConnectionState::Disconnected);
                        return;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(adapter = %ctx.name, error = %e, "connection lost");
                        ctx.transport.disconnect().await;
                        ctx.bus.publish_with_source(
                            GatewayEvent::AdapterDisconnected {
                                adapter: ctx.name.clone(),
                                reason: e.to_string(),
                            },
                            ctx.name.clone(),
                        );
                    }
                }
            }
            Some(Err(e)) => {
                tracing::debug!(adapter = %ctx.name, attempt, error = %e, "connect failed");
            }
        }

        let attempts = ctx.status.attempt_count();
        if attempts >= ctx.max_attempts {
            ctx.status.set_connection(ConnectionState::Failed);
            tracing::error!(adapter = %ctx.name, attempts, "reconnect attempts exhausted");
            ctx.bus.publish_with_source(
                GatewayEvent::AdapterFailed {
                    adapter: ctx.name.clone(),
                    attempts,
                },
                ctx.name.clone(),
            );
            return;
        }

        ctx.status.set_connection(ConnectionState::Reconnecting);
        let delay = ctx.backoff.delay(attempts.max(1));
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_rx.changed() => {
                ctx.status.set_connection(ConnectionState::Disconnected);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff() {
        let policy = BackoffPolicy::Fixed(Duration::from_secs(5));
        assert_eq!(policy.delay(1), Duration::from_secs(5));
        assert_eq!(policy.delay(9), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_backoff_doubles_and_caps() {
        let policy = BackoffPolicy::Exponential {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        };
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(7), Duration::from_secs(60));
        assert_eq!(policy.delay(30), Duration::from_secs(60));
    }
}
