//! Push notifications.
//!
//! Components publish through the [`Emitter`] trait; the process-wide
//! [`EventBus`] fans every event out to all subscribers (the RPC event
//! stream, the CLI progress renderer, tests) over a tokio broadcast
//! channel. Slow subscribers lose the oldest events rather than stalling
//! the publisher.
//!
//! | Topic | Payload |
//! |-------|---------|
//! | `sync-progress` | `{type, message}` |
//! | `sync-metadata-progress` | `{type, message}` |
//! | `index-changed` | `{rev}` |
//! | `metadata-changed` | `{timestamp}` |

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

pub mod topic {
    pub const SYNC_PROGRESS: &str = "sync-progress";
    pub const SYNC_METADATA_PROGRESS: &str = "sync-metadata-progress";
    pub const INDEX_CHANGED: &str = "index-changed";
    pub const METADATA_CHANGED: &str = "metadata-changed";
}

const DEFAULT_CAPACITY: usize = 256;

/// One published event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushEvent {
    pub topic: String,
    pub payload: Value,
}

/// Sink for push events.
pub trait Emitter: Send + Sync {
    fn emit(&self, topic: &str, payload: Value);
}

/// Broadcast fan-out of [`PushEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PushEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Emitter for EventBus {
    fn emit(&self, topic: &str, payload: Value) {
        tracing::trace!(topic, "emit");
        // No subscribers is not an error.
        let _ = self.sender.send(PushEvent {
            topic: topic.to_string(),
            payload,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fans_out_to_every_subscriber() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(topic::INDEX_CHANGED, serde_json::json!({ "rev": 1 }));

        for rx in [&mut a, &mut b] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.topic, "index-changed");
            assert_eq!(event.payload["rev"], 1);
        }
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        EventBus::new().emit(topic::SYNC_PROGRESS, Value::Null);
    }
}
