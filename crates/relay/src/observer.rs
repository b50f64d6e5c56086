//! In-process publish/subscribe used to fan events out between components.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Token identifying a subscription on its publisher.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug)]
struct Subscribers<E> {
    next_id: u64,
    subs: Vec<(SubscriptionId, mpsc::UnboundedSender<E>)>,
}

/// Multicasts events to every live subscription in registration order.
#[derive(Debug)]
pub struct Publisher<E> {
    inner: Arc<Mutex<Subscribers<E>>>,
}

impl<E> Default for Publisher<E> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                subs: Vec::new(),
            })),
        }
    }
}

impl<E: Clone> Publisher<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber. It sees every event published after this
    /// call, until the returned handle is dropped.
    pub fn subscribe(&self) -> Subscription<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subs.push((id, tx));

        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Removes a subscription by id. Returns if it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.subs.len();
        inner.subs.retain(|(sid, _)| *sid != id);
        inner.subs.len() != before
    }

    /// Delivers `event` to every subscriber, returning how many received it.
    pub fn publish(&self, event: E) -> usize {
        let mut inner = self.inner.lock();
        inner.subs.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        inner.subs.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subs.len()
    }
}

/// Receiving end of a subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription<E> {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<E>,
    registry: Weak<Mutex<Subscribers<E>>>,
}

impl<E> Subscription<E> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Waits for the next event. Returns `None` once the publisher is gone.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Returns an event if one is already queued.
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().subs.retain(|(sid, _)| *sid != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let publisher = Publisher::new();
        let mut a = publisher.subscribe();
        let mut b = publisher.subscribe();

        assert_eq!(publisher.publish(1u64), 2);
        assert_eq!(publisher.publish(2u64), 2);

        assert_eq!(a.recv().await, Some(1));
        assert_eq!(a.recv().await, Some(2));
        assert_eq!(b.recv().await, Some(1));
        assert_eq!(b.recv().await, Some(2));
    }

    #[test]
    fn dropping_the_handle_unsubscribes() {
        let publisher = Publisher::new();
        let a = publisher.subscribe();
        let mut b = publisher.subscribe();

        drop(a);
        assert_eq!(publisher.subscriber_count(), 1);
        assert_eq!(publisher.publish("x"), 1);
        assert_eq!(b.try_recv(), Some("x"));
    }

    #[test]
    fn unsubscribe_by_token() {
        let publisher = Publisher::new();
        let mut a = publisher.subscribe();

        assert!(publisher.unsubscribe(a.id()));
        assert!(!publisher.unsubscribe(a.id()));
        assert_eq!(publisher.publish(3u8), 0);
        assert_eq!(a.try_recv(), None);
    }

    #[tokio::test]
    async fn recv_ends_when_publisher_dropped() {
        let publisher = Publisher::<u8>::new();
        let mut a = publisher.subscribe();
        drop(publisher);
        assert_eq!(a.recv().await, None);
    }
}
