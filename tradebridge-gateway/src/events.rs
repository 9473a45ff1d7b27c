//! Channel-backed event sink for consumers that subscribe rather than
//! implement `EventSink` themselves.

use tokio::sync::broadcast;
use tracing::trace;
use tradebridge_core::{EventSink, GatewayEvent};

/// Fans events out over a `tokio::sync::broadcast` channel. Slow subscribers
/// lag and lose the oldest events; publishing never blocks.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<GatewayEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: GatewayEvent) {
        if self.tx.send(event).is_err() {
            trace!("event dropped: no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradebridge_core::ConnectionStatus;

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        sink.publish(GatewayEvent::warning("one"));
        sink.publish(GatewayEvent::ConnectionStatusChanged {
            previous: ConnectionStatus::Disconnected,
            current: ConnectionStatus::Connecting,
            reason: None,
        });

        assert_eq!(rx.recv().await.unwrap(), GatewayEvent::warning("one"));
        assert!(matches!(
            rx.recv().await.unwrap(),
            GatewayEvent::ConnectionStatusChanged { .. }
        ));
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let sink = BroadcastSink::default();
        assert_eq!(sink.subscriber_count(), 0);
        sink.publish(GatewayEvent::error("nobody listening"));
    }
}
