//! In-process pub/sub bus feeding the WebSocket fan-out.
//!
//! One broadcast channel carries every [`WireEvent`]; each WebSocket
//! connection holds a subscription and forwards events until it lags out or
//! disconnects. Delivery is best-effort: emitting with zero subscribers is
//! not an error.

use std::sync::RwLock;

use log::trace;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{EventSink, WireEvent};

/// Hook producing the events replayed to a freshly-connected subscriber.
pub type OnConnectFn = Box<dyn Fn() -> Vec<WireEvent> + Send + Sync>;

/// The process-wide broadcast hub.
pub struct EventHub {
    tx: broadcast::Sender<WireEvent>,
    on_connect: RwLock<Option<OnConnectFn>>,
}

impl EventHub {
    /// Create a hub whose subscribers may lag by up to `capacity` events
    /// before they start losing the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            on_connect: RwLock::new(None),
        }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, channel: &str, payload: Value) {
        let event = WireEvent {
            channel: channel.to_string(),
            payload,
        };
        // A send error only means nobody is listening right now.
        if self.tx.send(event).is_err() {
            trace!("event on '{}' had no subscribers", channel);
        }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<WireEvent> {
        self.tx.subscribe()
    }

    /// Install the hook whose events are replayed on every new connection.
    pub fn set_on_connect(&self, hook: OnConnectFn) {
        *self.on_connect.write().unwrap() = Some(hook);
    }

    /// Events to hand a subscriber that just connected.
    pub fn connect_replay(&self) -> Vec<WireEvent> {
        match self.on_connect.read().unwrap().as_ref() {
            Some(hook) => hook(),
            None => Vec::new(),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Drop the on-connect hook. Subscriptions close when receivers drop.
    pub fn shutdown(&self) {
        *self.on_connect.write().unwrap() = None;
    }
}

impl EventSink for EventHub {
    fn deliver(&self, channel: &str, payload: Value) {
        self.emit(channel, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_emit_reaches_subscriber() {
        let hub = EventHub::new(16);
        let mut rx = hub.subscribe();
        hub.emit("processing.started", json!({"ok": true}));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.channel, "processing.started");
        assert_eq!(event.payload["ok"], true);
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let hub = EventHub::new(4);
        hub.emit("log", json!("nobody home"));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_connect_replay() {
        let hub = EventHub::new(4);
        assert!(hub.connect_replay().is_empty());
        hub.set_on_connect(Box::new(|| {
            vec![WireEvent {
                channel: "wasm.state.request".into(),
                payload: Value::Null,
            }]
        }));
        let replay = hub.connect_replay();
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].channel, "wasm.state.request");
    }
}
