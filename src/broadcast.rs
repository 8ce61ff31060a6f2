//! Fan-out of derived events to websocket subscribers. One channel, every
//! connected client subscribes its own receiver, and a lagging/slow client
//! just misses messages instead of slowing down the producer.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 4_096;

#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<Arc<str>>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.tx.subscribe()
    }

    /// Serialize `{type, data}` once and send to every connected client;
    /// clients filter by `data.symbol` themselves — there is no per-client
    /// filtering on the server side.
    pub fn broadcast<T: Serialize>(&self, type_: &str, data: &T) {
        let envelope = serde_json::json!({ "type": type_, "data": data });
        let text = match serde_json::to_string(&envelope) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, type_, "failed to serialize broadcast envelope");
                return;
            }
        };
        // Err(SendError) only happens with zero subscribers; not a failure.
        let _ = self.tx.send(Arc::from(text));
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_broadcast_envelope() {
        let b = Broadcaster::new();
        let mut rx = b.subscribe();
        b.broadcast("metrics", &json!({"symbol": "AAABUSDT"}));
        let msg = rx.recv().await.unwrap();
        assert!(msg.contains("\"type\":\"metrics\""));
        assert!(msg.contains("AAABUSDT"));
    }

    #[test]
    fn subscriber_count_reflects_active_receivers() {
        let b = Broadcaster::new();
        assert_eq!(b.subscriber_count(), 0);
        let _rx1 = b.subscribe();
        let _rx2 = b.subscribe();
        assert_eq!(b.subscriber_count(), 2);
    }
}
