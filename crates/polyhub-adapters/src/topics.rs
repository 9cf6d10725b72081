//! Topic registry.
//!
//! Records subscription intent independently of link state. Entries keep
//! registration order so a reconnect replays subscriptions exactly as
//! they were made. Subscribing while disconnected is not an error: the
//! intent is queued and the replay performs the live call.

use serde_json::Value;
use tokio::sync::Mutex;

/// Last message observed on a channel.
#[derive(Debug, Clone)]
pub struct LastMessage {
    pub payload: Value,
    /// Unix millis.
    pub timestamp: i64,
}

/// A subscription entry.
#[derive(Debug, Clone)]
pub struct TopicEntry {
    pub channel: String,
    pub qos: u8,
    pub last_message: Option<LastMessage>,
}

/// Ordered registry of subscription intent.
///
/// A single mutex guards the entry list; all operations are short and
/// lock-free callers are not needed at this rate of change.
#[derive(Default)]
pub struct TopicRegistry {
    entries: Mutex<Vec<TopicEntry>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record subscription intent. Returns `true` if the channel was new,
    /// `false` if an existing entry was updated in place (order kept).
    pub async fn subscribe(&self, channel: &str, qos: u8) -> bool {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.channel == channel) {
            entry.qos = qos;
            return false;
        }
        entries.push(TopicEntry {
            channel: channel.to_string(),
            qos,
            last_message: None,
        });
        true
    }

    /// Remove a channel. Returns `true` if it was present.
    pub async fn unsubscribe(&self, channel: &str) -> bool {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.channel != channel);
        entries.len() != before
    }

    /// Record the last message seen on a channel. Unknown channels are
    /// ignored (wildcard deliveries land here too).
    pub async fn record_message(&self, channel: &str, payload: Value) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.channel == channel) {
            entry.last_message = Some(LastMessage {
                payload,
                timestamp: chrono::Utc::now().timestamp_millis(),
            });
        }
    }

    /// Snapshot of all entries in registration order.
    pub async fn entries(&self) -> Vec<TopicEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn contains(&self, channel: &str) -> bool {
        self.entries
            .lock()
            .await
            .iter()
            .any(|e| e.channel == channel)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
