//! Event bus for the gateway.
//!
//! All components communicate by publishing and subscribing to
//! [`GatewayEvent`]s. Publication is fire-and-forget: a slow subscriber can
//! lag and skip events, but can never block an adapter or the reconciler.

use crate::event::{EventMetadata, GatewayEvent};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Broadcast event bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<(GatewayEvent, EventMetadata)>,
    name: String,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the given capacity.
    ///
    /// The capacity bounds how many events are buffered for slow subscribers.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            name: "default".to_string(),
        }
    }

    /// Create a named event bus.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            tx: broadcast::channel(DEFAULT_CHANNEL_CAPACITY).0,
            name: name.into(),
        }
    }

    /// Name of this bus.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event with default metadata.
    ///
    /// Returns `true` if at least one subscriber received it.
    pub fn publish(&self, event: GatewayEvent) -> bool {
        self.publish_with_source(event, "system")
    }

    /// Publish an event attributed to a specific source.
    pub fn publish_with_source(&self, event: GatewayEvent, source: impl Into<String>) -> bool {
        let metadata = EventMetadata::new(source);
        let kind = event.type_name();
        let delivered = self.tx.send((event, metadata)).is_ok();
        if !delivered {
            trace!(bus = %self.name, event = kind, "no subscribers for event");
        }
        delivered
    }

    /// Subscribe to all events.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Subscribe to events matching a predicate.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&GatewayEvent) -> bool + Send + 'static,
    {
        FilteredReceiver::new(self.tx.subscribe(), filter)
    }

    /// Builder for common filtered subscriptions.
    pub fn filter(&self) -> FilterBuilder {
        FilterBuilder {
            tx: self.tx.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for all events.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<(GatewayEvent, EventMetadata)>,
}

impl EventBusReceiver {
    /// Receive the next event. Returns `None` when the bus is closed.
    pub async fn recv(&mut self) -> Option<(GatewayEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                // Lagged behind: events were dropped, keep receiving.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<(GatewayEvent, EventMetadata)> {
        self.rx.try_recv().ok()
    }
}

/// Receiver for events matching a predicate.
pub struct FilteredReceiver<F>
where
    F: Fn(&GatewayEvent) -> bool + Send,
{
    rx: broadcast::Receiver<(GatewayEvent, EventMetadata)>,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&GatewayEvent) -> bool + Send,
{
    fn new(rx: broadcast::Receiver<(GatewayEvent, EventMetadata)>, filter: F) -> Self {
        Self { rx, filter }
    }

    /// Receive the next matching event. Returns `None` when the bus closes.
    pub async fn recv(&mut self) -> Option<(GatewayEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok((event, meta)) => {
                    if (self.filter)(&event) {
                        return Some((event, meta));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive a matching event without blocking.
    pub fn try_recv(&mut self) -> Option<(GatewayEvent, EventMetadata)> {
        while let Ok((event, meta)) = self.rx.try_recv() {
            if (self.filter)(&event) {
                return Some((event, meta));
            }
        }
        None
    }
}

/// Builder for filtered subscriptions.
pub struct FilterBuilder {
    tx: broadcast::Sender<(GatewayEvent, EventMetadata)>,
}

impl FilterBuilder {
    /// Subscribe to adapter lifecycle events only.
    pub fn adapter_events(&self) -> FilteredReceiver<fn(&GatewayEvent) -> bool> {
        FilteredReceiver::new(self.tx.subscribe(), GatewayEvent::is_adapter_event)
    }

    /// Subscribe to device/telemetry events only.
    pub fn device_events(&self) -> FilteredReceiver<fn(&GatewayEvent) -> bool> {
        FilteredReceiver::new(self.tx.subscribe(), GatewayEvent::is_device_event)
    }

    /// Subscribe to diagnostic events only.
    pub fn diagnostic_events(&self) -> FilteredReceiver<fn(&GatewayEvent) -> bool> {
        FilteredReceiver::new(self.tx.subscribe(), GatewayEvent::is_diagnostic_event)
    }

    /// Subscribe with a custom predicate.
    pub fn custom<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&GatewayEvent) -> bool + Send + 'static,
    {
        FilteredReceiver::new(self.tx.subscribe(), filter)
    }
}

/// Shared event bus handle.
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(GatewayEvent::AdapterConnected {
            adapter: "mqtt".to_string(),
        });

        let (event, _) = rx.recv().await.unwrap();
        assert_eq!(event.type_name(), "AdapterConnected");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(GatewayEvent::AdapterConnected {
            adapter: "mqtt".to_string(),
        });

        assert_eq!(rx1.recv().await.unwrap().0.type_name(), "AdapterConnected");
        assert_eq!(rx2.recv().await.unwrap().0.type_name(), "AdapterConnected");
    }

    #[tokio::test]
    async fn test_filtered_subscription() {
        let bus = EventBus::new();
        let mut rx = bus.filter().device_events();

        bus.publish(GatewayEvent::AdapterConnected {
            adapter: "mqtt".to_string(),
        });
        bus.publish(GatewayEvent::DeviceDiscovered {
            device_id: "dev1".to_string(),
            protocol: "zigbee".to_string(),
        });

        let (event, _) = rx.recv().await.unwrap();
        assert_eq!(event.type_name(), "DeviceDiscovered");
    }

    #[tokio::test]
    async fn test_publish_with_source() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish_with_source(
            GatewayEvent::AdapterConnected {
                adapter: "mesh".to_string(),
            },
            "mesh",
        );

        let (_, meta) = rx.recv().await.unwrap();
        assert_eq!(meta.source, "mesh");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        // No receivers: event is discarded, publish reports false.
        assert!(!bus.publish(GatewayEvent::AdapterConnected {
            adapter: "mqtt".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_try_recv() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        assert!(rx.try_recv().is_none());

        bus.publish(GatewayEvent::ScanModeChanged {
            adapter: "netscan".to_string(),
            active: true,
        });

        assert_eq!(rx.try_recv().unwrap().0.type_name(), "ScanModeChanged");
    }

    #[tokio::test]
    async fn test_subscriber_count() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
    }
}
