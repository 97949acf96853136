//! Typed event bus
//!
//! Small broadcast-based fan-out used between the engine, the state
//! components and the UI layer. Subscriptions are scoped handles: dropping a
//! `Subscription` unsubscribes, so there is no manual `off()` bookkeeping to
//! leak.

use tokio::sync::broadcast;

/// Multi-consumer event channel for one event type.
pub struct EventBus<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all live subscriptions. Events published with no
    /// subscribers are dropped.
    pub fn emit(&self, event: T) {
        let _ = self.tx.send(event);
    }

    /// Open a scoped subscription. Only events emitted after this call are
    /// observed.
    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Scoped subscription handle; unsubscribes on drop.
pub struct Subscription<T> {
    rx: broadcast::Receiver<T>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    /// Receive the next event, or `None` once the bus is gone.
    ///
    /// A slow subscriber that lags behind the channel capacity skips ahead to
    /// the oldest retained event rather than failing.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("event subscription lagged, skipped {} events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive for callers polling between other work.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    tracing::warn!("event subscription lagged, skipped {} events", missed);
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus: EventBus<u32> = EventBus::new(16);
        let mut sub = bus.subscribe();

        bus.emit(7);
        assert_eq!(sub.recv().await, Some(7));
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus: EventBus<u32> = EventBus::new(16);
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_sees_only_later_events() {
        let bus: EventBus<u32> = EventBus::new(16);
        bus.emit(1);

        let mut sub = bus.subscribe();
        bus.emit(2);
        assert_eq!(sub.try_recv(), Some(2));
        assert_eq!(sub.try_recv(), None);
    }
}
