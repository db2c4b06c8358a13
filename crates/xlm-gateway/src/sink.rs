// ABOUTME: Downstream sinks that relayed events are published to.
// ABOUTME: Per-connection mpsc sink and a fan-out hub shared by all push-channel subscribers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{GatewayError, Result};
use crate::events::RelayEvent;

/// Default per-subscriber buffer of the hub.
pub const DEFAULT_HUB_CAPACITY: usize = 256;

/// Where relayed events go.
///
/// `publish` resolves once the event is handed over; `GatewayError::SinkClosed`
/// means nobody downstream can receive it any more.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: RelayEvent) -> Result<()>;
}

/// Sink for a single consumer, such as one WebSocket connection.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<RelayEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<RelayEvent>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<RelayEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn publish(&self, event: RelayEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| GatewayError::SinkClosed)
    }
}

/// Fan-out to every subscribed push-channel connection.
///
/// Each subscriber has its own bounded queue and `publish` waits for room in
/// every one of them, so a slow subscriber slows the relay down instead of
/// losing events. Publishing with no subscribers reports the sink as closed.
#[derive(Debug, Clone)]
pub struct EventHub {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<RelayEvent>>>>,
    capacity: usize,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    fn senders(&self) -> MutexGuard<'_, Vec<mpsc::Sender<RelayEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> mpsc::Receiver<RelayEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.senders().push(tx);
        rx
    }

    /// Live subscribers. Dropped receivers are pruned here.
    pub fn subscribers(&self) -> usize {
        let mut senders = self.senders();
        senders.retain(|tx| !tx.is_closed());
        senders.len()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

#[async_trait]
impl EventSink for EventHub {
    async fn publish(&self, event: RelayEvent) -> Result<()> {
        let targets = self.senders().clone();

        let mut delivered = 0;
        for tx in &targets {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        if delivered < targets.len() {
            self.senders().retain(|tx| !tx.is_closed());
        }

        if delivered == 0 {
            return Err(GatewayError::SinkClosed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RequestId;

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::channel(8);
        let id = RequestId::new();
        sink.publish(RelayEvent::title(id, "a")).await.unwrap();
        sink.publish(RelayEvent::title(id, "b")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), RelayEvent::title(id, "a"));
        assert_eq!(rx.recv().await.unwrap(), RelayEvent::title(id, "b"));
    }

    #[tokio::test]
    async fn test_channel_sink_closed_when_receiver_dropped() {
        let (sink, rx) = ChannelSink::channel(1);
        drop(rx);
        assert!(sink.is_closed());

        let err = sink
            .publish(RelayEvent::title(RequestId::new(), "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::SinkClosed));
    }

    #[tokio::test]
    async fn test_hub_fans_out_to_all_subscribers() {
        let hub = EventHub::new(8);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        assert_eq!(hub.subscribers(), 2);

        let event = RelayEvent::title(RequestId::new(), "t");
        hub.publish(event.clone()).await.unwrap();

        assert_eq!(first.recv().await.unwrap(), event);
        assert_eq!(second.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_hub_drops_departed_subscribers() {
        let hub = EventHub::new(8);
        let mut staying = hub.subscribe();
        let leaving = hub.subscribe();
        drop(leaving);

        let event = RelayEvent::title(RequestId::new(), "t");
        hub.publish(event.clone()).await.unwrap();

        assert_eq!(staying.recv().await.unwrap(), event);
        assert_eq!(hub.subscribers(), 1);
    }

    #[tokio::test]
    async fn test_hub_waits_for_slow_subscriber_instead_of_dropping() {
        let hub = EventHub::new(4);
        let mut slow = hub.subscribe();
        let id = RequestId::new();

        let publisher = hub.clone();
        let publishing = tokio::spawn(async move {
            for i in 0..20 {
                publisher
                    .publish(RelayEvent::title(id, i.to_string()))
                    .await
                    .unwrap();
            }
        });

        // the publisher blocks on the full queue until we read
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!publishing.is_finished());

        for i in 0..20 {
            assert_eq!(slow.recv().await.unwrap(), RelayEvent::title(id, i.to_string()));
        }
        publishing.await.unwrap();
    }

    #[tokio::test]
    async fn test_hub_without_subscribers_is_closed() {
        let hub = EventHub::default();
        let err = hub
            .publish(RelayEvent::title(RequestId::new(), "t"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::SinkClosed));
    }
}
