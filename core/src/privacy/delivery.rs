//! Delivery notification for payloads that reach their final hop

use tokio::sync::mpsc;

/// Receives each decrypted payload exactly once
pub trait DeliveryObserver: Send + Sync {
    fn on_delivered(&self, payload: &[u8]);
}

/// Forwards delivered payloads into a channel
///
/// A dropped receiver is ignored; delivery never fails the relay.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DeliveryObserver for ChannelObserver {
    fn on_delivered(&self, payload: &[u8]) {
        let _ = self.tx.send(payload.to_vec());
    }
}

/// Discards deliveries
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl DeliveryObserver for NoopObserver {
    fn on_delivered(&self, _payload: &[u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_observer() {
        let (observer, mut rx) = ChannelObserver::new();
        observer.on_delivered(b"one");
        observer.on_delivered(b"two");
        assert_eq!(rx.try_recv().unwrap(), b"one");
        assert_eq!(rx.try_recv().unwrap(), b"two");
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.on_delivered(b"nobody listening");
    }
}
