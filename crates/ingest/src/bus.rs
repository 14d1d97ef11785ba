//! Live update bus between the ingest pipeline and interactive consumers.
//!
//! Each topic is a rendezvous: a value goes to exactly one subscriber that
//! has registered through [`Subscriber::recv`]. A subscriber holds at most
//! one registration, so at most one value waits for it. A consumer that never
//! called `recv` misses the update and is expected to re-query the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use otelly_core::error::{OtellyError, Result};
use otelly_core::model::{Log, SpanWithResource};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::Instant;

type Slot<T> = oneshot::Sender<T>;

pub struct Topic<T> {
    slots_tx: mpsc::UnboundedSender<Slot<T>>,
    slots_rx: Arc<Mutex<mpsc::UnboundedReceiver<Slot<T>>>>,
    subscribers: Arc<AtomicUsize>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            slots_tx: self.slots_tx.clone(),
            slots_rx: Arc::clone(&self.slots_rx),
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<T: Send> Default for Topic<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Topic<T> {
    pub fn new() -> Self {
        let (slots_tx, slots_rx) = mpsc::unbounded_channel();
        Self {
            slots_tx,
            slots_rx: Arc::new(Mutex::new(slots_rx)),
            subscribers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn subscribe(&self) -> Subscriber<T> {
        self.subscribers.fetch_add(1, Ordering::SeqCst);
        Subscriber {
            slots_tx: self.slots_tx.clone(),
            pending: None,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }

    /// Hands `value` to one waiting subscriber, waiting at most `timeout` for
    /// one to show up. Concurrent publishers are served one at a time and the
    /// wait for the turn counts against `timeout`.
    pub async fn publish(&self, value: T, timeout: Duration) -> Result<()> {
        if self.subscriber_count() == 0 {
            return Err(OtellyError::BusClosed);
        }

        let deadline = Instant::now() + timeout;
        let mut slots = tokio::time::timeout_at(deadline, self.slots_rx.lock())
            .await
            .map_err(|_| OtellyError::PublishTimeout(timeout))?;

        let mut value = value;
        loop {
            let slot = match tokio::time::timeout_at(deadline, slots.recv()).await {
                Ok(Some(slot)) => slot,
                Ok(None) => return Err(OtellyError::BusClosed),
                Err(_) => {
                    return Err(if self.subscriber_count() == 0 {
                        OtellyError::BusClosed
                    } else {
                        OtellyError::PublishTimeout(timeout)
                    });
                }
            };
            // the subscriber may have been dropped since it registered
            match slot.send(value) {
                Ok(()) => return Ok(()),
                Err(returned) => value = returned,
            }
        }
    }
}

pub struct Subscriber<T> {
    slots_tx: mpsc::UnboundedSender<Slot<T>>,
    pending: Option<oneshot::Receiver<T>>,
    subscribers: Arc<AtomicUsize>,
}

impl<T> Subscriber<T> {
    /// Waits for the next published value. Cancel-safe: a dropped future
    /// keeps its registration, and a value delivered to it is returned by
    /// the next call.
    pub async fn recv(&mut self) -> Option<T> {
        if self.pending.is_none() {
            let (tx, rx) = oneshot::channel();
            self.slots_tx.send(tx).ok()?;
            self.pending = Some(rx);
        }
        let value = self.pending.as_mut()?.await.ok();
        self.pending = None;
        value
    }
}

impl<T> Drop for Subscriber<T> {
    fn drop(&mut self) {
        self.subscribers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The two update topics the pipeline publishes to.
#[derive(Clone, Default)]
pub struct Bus {
    pub spans: Topic<Vec<SpanWithResource>>,
    pub logs: Topic<Vec<Log>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_waiting_subscriber() {
        let topic = Topic::<u32>::new();
        let mut sub = topic.subscribe();

        let waiter = tokio::spawn(async move { sub.recv().await });
        topic.publish(7, Duration::from_secs(1)).await.unwrap();

        assert_eq!(waiter.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn times_out_when_nobody_is_waiting() {
        let topic = Topic::<u32>::new();
        let _idle = topic.subscribe();

        let err = topic
            .publish(1, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, OtellyError::PublishTimeout(_)));
    }

    #[tokio::test]
    async fn closed_without_subscribers() {
        let topic = Topic::<u32>::new();
        let sub = topic.subscribe();
        drop(sub);

        let err = topic
            .publish(1, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, OtellyError::BusClosed));
    }

    #[tokio::test]
    async fn abandoned_recv_keeps_its_registration() {
        let topic = Topic::<u32>::new();
        let mut sub = topic.subscribe();

        let abandoned = tokio::time::timeout(Duration::from_millis(10), sub.recv()).await;
        assert!(abandoned.is_err());

        // delivered while nobody is polling, picked up by the next call
        topic.publish(42, Duration::from_secs(1)).await.unwrap();
        assert_eq!(sub.recv().await, Some(42));
    }

    #[tokio::test]
    async fn repeated_timeouts_hold_a_single_slot() {
        let topic = Topic::<u32>::new();
        let mut sub = topic.subscribe();

        for _ in 0..1000 {
            let _ = tokio::time::timeout(Duration::from_micros(1), sub.recv()).await;
        }
        assert_eq!(topic.slots_rx.lock().await.len(), 1);

        topic.publish(5, Duration::from_secs(1)).await.unwrap();
        assert_eq!(sub.recv().await, Some(5));
        assert!(topic.slots_rx.lock().await.is_empty());
    }

    #[tokio::test]
    async fn skips_slots_of_dropped_subscribers() {
        let topic = Topic::<u32>::new();
        let mut gone = topic.subscribe();
        let _ = tokio::time::timeout(Duration::from_millis(10), gone.recv()).await;
        drop(gone);

        let mut sub = topic.subscribe();
        let waiter = tokio::spawn(async move { sub.recv().await });
        tokio::task::yield_now().await;
        topic.publish(9, Duration::from_secs(1)).await.unwrap();
        assert_eq!(waiter.await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn each_value_reaches_exactly_one_subscriber() {
        let topic = Topic::<u32>::new();
        let mut a = topic.subscribe();
        let mut b = topic.subscribe();

        let first = tokio::spawn(async move { a.recv().await });
        let second = tokio::spawn(async move { b.recv().await });

        topic.publish(1, Duration::from_secs(1)).await.unwrap();
        topic.publish(2, Duration::from_secs(1)).await.unwrap();

        let mut got = vec![first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];
        got.sort();
        assert_eq!(got, vec![1, 2]);
    }
}
