//! Typed pub/sub stream with deferred polling.
//!
//! Architecture:
//! - Subscribers register callbacks (immediate invocation) or take a
//!   crossbeam receiver
//! - emit() invokes callbacks, feeds receivers AND queues for deferred processing
//! - poll() returns queued events for batch processing in a host loop
//!
//! Callback order: FIFO (first-subscribed, first-called).
//! emit() takes no lock while a callback runs except the subscriber read lock,
//! so callbacks may emit but must not subscribe.

use crossbeam_channel::{Receiver, Sender};
use log::warn;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Default backlog before the oldest queued events are evicted
pub const MAX_QUEUE_SIZE: usize = 1000;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle returned by `subscribe()`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct StreamInner<E> {
    subscribers: RwLock<Vec<(SubscriptionId, Callback<E>)>>,
    senders: Mutex<Vec<Sender<E>>>,
    queue: Mutex<Vec<E>>,
    capacity: usize,
    next_id: AtomicU64,
}

/// Event stream for one event type.
///
/// Clones share subscribers and queue.
pub struct EventStream<E> {
    inner: Arc<StreamInner<E>>,
}

impl<E> Clone for EventStream<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Clone + Send + 'static> Default for EventStream<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventStream<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("subscribers", &self.inner.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .field("queue_len", &self.inner.queue.lock().map(|q| q.len()).unwrap_or(0))
            .finish()
    }
}

impl<E: Clone + Send + 'static> EventStream<E> {
    pub fn new() -> Self {
        Self::with_capacity(MAX_QUEUE_SIZE)
    }

    /// Stream whose poll queue holds at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                subscribers: RwLock::new(Vec::new()),
                senders: Mutex::new(Vec::new()),
                queue: Mutex::new(Vec::new()),
                capacity: capacity.max(2),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    // ========== Pub/Sub (immediate) ==========

    /// Register a callback invoked on every emit().
    ///
    /// # Example
    /// ```ignore
    /// let stream = EventStream::<PlayerEvent>::new();
    /// let id = stream.subscribe(|e| println!("{}", e.kind.name()));
    /// stream.unsubscribe(id);
    /// ```
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Unbounded receiver fed by every emit(). Dropping it unsubscribes.
    pub fn subscribe_channel(&self) -> Receiver<E> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.inner.senders.lock().unwrap_or_else(|e| e.into_inner()).push(tx);
        rx
    }

    /// Emit event: invoke callbacks, feed receivers AND queue for poll().
    pub fn emit(&self, event: E) {
        // Snapshot so callbacks run without the subscriber lock
        let callbacks: Vec<Callback<E>> = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in &callbacks {
            cb(&event);
        }

        // Disconnected receivers are pruned here
        self.inner
            .senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|tx| tx.send(event.clone()).is_ok());

        // Queue for deferred processing with eviction
        let mut queue = self.inner.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= self.inner.capacity {
            let evict_count = queue.len() / 2;
            warn!("EventStream queue full ({} events), evicting oldest {}", queue.len(), evict_count);
            queue.drain(0..evict_count);
        }
        queue.push(event);
    }

    // ========== Deferred Processing ==========

    /// Take all events queued since the last poll.
    pub fn poll(&self) -> Vec<E> {
        std::mem::take(&mut *self.inner.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn has_subscribers(&self) -> bool {
        !self.inner.subscribers.read().unwrap_or_else(|e| e.into_inner()).is_empty()
            || !self.inner.senders.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    /// Drop all subscribers, receivers and queued events
    pub fn clear(&self) {
        self.inner.subscribers.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.inner.senders.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.inner.queue.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq)]
    struct TestEvent {
        value: i32,
    }

    #[test]
    fn test_subscribe_emit_immediate() {
        let stream = EventStream::new();
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);

        stream.subscribe(move |e: &TestEvent| {
            c.fetch_add(e.value, Ordering::SeqCst);
        });

        stream.emit(TestEvent { value: 10 });
        // Callback was invoked immediately
        assert_eq!(counter.load(Ordering::SeqCst), 10);

        stream.emit(TestEvent { value: 5 });
        assert_eq!(counter.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn test_emit_queues_for_poll() {
        let stream = EventStream::new();
        stream.emit(TestEvent { value: 1 });
        stream.emit(TestEvent { value: 2 });

        let events = stream.poll();
        assert_eq!(events, vec![TestEvent { value: 1 }, TestEvent { value: 2 }]);

        // Queue is empty after poll
        assert!(stream.poll().is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let stream = EventStream::new();
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);

        let id = stream.subscribe(move |e: &TestEvent| {
            c.fetch_add(e.value, Ordering::SeqCst);
        });
        stream.emit(TestEvent { value: 10 });
        assert!(stream.unsubscribe(id));
        assert!(!stream.unsubscribe(id));

        stream.emit(TestEvent { value: 10 });
        // Counter unchanged - no subscriber
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        // But event still queued
        assert_eq!(stream.poll().len(), 2);
    }

    #[test]
    fn test_channel_subscriber() {
        let stream = EventStream::new();
        let rx = stream.subscribe_channel();
        stream.emit(TestEvent { value: 3 });
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), TestEvent { value: 3 });

        drop(rx);
        stream.emit(TestEvent { value: 4 });
        assert!(!stream.has_subscribers());
    }

    #[test]
    fn test_eviction_keeps_newest() {
        let stream = EventStream::with_capacity(10);
        for value in 0..25 {
            stream.emit(TestEvent { value });
        }
        let events = stream.poll();
        assert!(events.len() <= 10);
        assert_eq!(events.last(), Some(&TestEvent { value: 24 }));
    }
}
