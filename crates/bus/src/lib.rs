//! Typed fan-out bus with bounded per-subscriber queues.
//!
//! Producers must never be blocked by consumers: `emit` copies the event
//! into every live subscriber queue with `try_send` and drops (with a warn
//! log) for any subscriber whose queue is full. A slow or dead subscriber
//! therefore costs itself events, never the pipeline.
//!
//! Subscriptions are scoped resources: dropping a [`Subscription`]
//! unregisters its queue, so a cancelled consumer task releases its slot
//! without any explicit cleanup call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Default per-subscriber queue capacity.
pub const DEFAULT_CAPACITY: usize = 256;

type Registry<T> = Arc<Mutex<HashMap<Uuid, mpsc::Sender<T>>>>;

/// A typed multi-subscriber fan-out channel.
pub struct Bus<T> {
    name: &'static str,
    capacity: usize,
    subscribers: Registry<T>,
    dropped: AtomicU64,
}

impl<T: Clone + Send + 'static> Bus<T> {
    /// A bus with the default queue capacity. `name` appears in drop logs.
    pub fn new(name: &'static str) -> Self {
        Self::with_capacity(name, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a fresh bounded queue and return its receiving handle.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4();
        self.subscribers.lock().insert(id, tx);
        Subscription {
            id,
            rx,
            registry: Arc::clone(&self.subscribers),
        }
    }

    /// Deliver a copy of `event` to every live subscriber.
    ///
    /// Never blocks and never fails. A full queue drops the event for that
    /// subscriber only; a closed queue (receiver dropped mid-emit) is
    /// pruned from the registry.
    pub fn emit(&self, event: T) {
        let mut closed: Vec<Uuid> = Vec::new();
        {
            let subs = self.subscribers.lock();
            for (id, tx) in subs.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::warn!(
                            bus = self.name,
                            subscriber = %id,
                            dropped_total = total,
                            "subscriber queue full, dropping event"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }
        if !closed.is_empty() {
            let mut subs = self.subscribers.lock();
            for id in closed {
                subs.remove(&id);
            }
        }
    }

    /// Remove a subscription, discarding anything still queued in it.
    /// Dropping the subscription has the same effect.
    pub fn unsubscribe(&self, sub: Subscription<T>) {
        drop(sub);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Total events dropped across all subscribers since startup.
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The receiving half of a bus subscription.
///
/// Owned by exactly one consumer; dropping it unregisters the queue and
/// discards anything still pending in it.
pub struct Subscription<T> {
    id: Uuid,
    rx: mpsc::Receiver<T>,
    registry: Registry<T>,
}

impl<T> Subscription<T> {
    /// Receive the next event in FIFO order. Returns `None` only after the
    /// subscription has been unregistered and the queue fully drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for tests and drain loops.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_delivers_to_every_subscriber() {
        let bus: Bus<u32> = Bus::new("test");
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(7);
        assert_eq!(a.recv().await, Some(7));
        assert_eq!(b.recv().await, Some(7));
    }

    #[tokio::test]
    async fn per_subscriber_fifo_order() {
        let bus: Bus<u32> = Bus::new("test");
        let mut sub = bus.subscribe();
        for i in 0..10 {
            bus.emit(i);
        }
        for i in 0..10 {
            assert_eq!(sub.recv().await, Some(i));
        }
    }

    #[tokio::test]
    async fn full_queue_drops_for_that_subscriber_only() {
        let bus: Bus<u32> = Bus::with_capacity("test", 2);
        let mut slow = bus.subscribe();
        let mut fast = bus.subscribe();

        bus.emit(1);
        bus.emit(2);
        // Fast subscriber keeps draining; slow one is full.
        assert_eq!(fast.recv().await, Some(1));
        assert_eq!(fast.recv().await, Some(2));
        bus.emit(3);

        assert_eq!(bus.dropped_total(), 1);
        assert_eq!(fast.recv().await, Some(3));
        // The slow subscriber still sees its first two, in order, and
        // never a silent gap-free 3.
        assert_eq!(slow.recv().await, Some(1));
        assert_eq!(slow.recv().await, Some(2));
        assert_eq!(slow.try_recv(), None);
    }

    #[tokio::test]
    async fn dropping_or_unsubscribing_unregisters() {
        let bus: Bus<u32> = Bus::new("test");
        let a = bus.subscribe();
        let b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        drop(a);
        bus.unsubscribe(b);
        assert_eq!(bus.subscriber_count(), 0);
        // Emitting with no subscribers is a no-op.
        bus.emit(1);
        assert_eq!(bus.dropped_total(), 0);
    }

    #[tokio::test]
    async fn cancelled_consumer_releases_its_slot() {
        let bus: Arc<Bus<u32>> = Arc::new(Bus::new("test"));
        let bus2 = Arc::clone(&bus);
        let task = tokio::spawn(async move {
            let mut sub = bus2.subscribe();
            loop {
                sub.recv().await;
            }
        });
        // Let the task register.
        tokio::task::yield_now().await;
        assert_eq!(bus.subscriber_count(), 1);

        task.abort();
        let _ = task.await;
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_emit_and_subscribe() {
        let bus: Arc<Bus<u64>> = Arc::new(Bus::new("test"));
        let emitter = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                for i in 0..500u64 {
                    bus.emit(i);
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };
        // Subscribers come and go while emission is in flight.
        for _ in 0..20 {
            let sub = bus.subscribe();
            tokio::task::yield_now().await;
            drop(sub);
        }
        emitter.await.unwrap();
        assert_eq!(bus.subscriber_count(), 0);
    }
}
