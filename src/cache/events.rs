//! Change notification for bypass writes.
//!
//! A bypass write never reaches the normalized store, so the store's own
//! write path cannot tell watchers that something changed. The
//! [`ChangeNotifier`] does it instead: it asks the store to broadcast to its
//! watchers and hands a [`ChangeEvent`] to every subscribed listener.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use super::lock::{mutex_lock, rw_read, rw_write};
use super::query::QueryIdentity;
use super::store::NormalizedStore;

const SOURCE: &str = "cache::events";
const METRIC_EVENT_DROPPED: &str = "verbatim_change_event_dropped_total";

/// Monotonic epoch for ordering change events within one overlay.
pub type Epoch = u64;

/// A bypass entry was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Unique identifier (UUIDv4).
    pub id: Uuid,
    /// Position of the event among all events of the same notifier.
    pub epoch: Epoch,
    /// Identity of the query whose entry changed.
    pub identity: QueryIdentity,
    /// When the event was created.
    pub timestamp: OffsetDateTime,
}

impl ChangeEvent {
    pub fn new(identity: QueryIdentity, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            identity,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Receiver of change events.
///
/// Called synchronously from the writing thread; implementations must not
/// block on the overlay.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, event: &ChangeEvent);
}

impl<F> ChangeListener for F
where
    F: Fn(&ChangeEvent) + Send + Sync,
{
    fn on_change(&self, event: &ChangeEvent) {
        self(event)
    }
}

/// Forwards bypass writes to the store's watchers and to listeners.
pub struct ChangeNotifier {
    epoch_counter: AtomicU64,
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self {
            epoch_counter: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener for every future change event.
    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        rw_write(&self.listeners, SOURCE, "subscribe").push(listener);
    }

    pub fn listener_count(&self) -> usize {
        rw_read(&self.listeners, SOURCE, "listener_count").len()
    }

    /// Announce that the entry for `identity` changed.
    ///
    /// Runs once per bypass write. Watchers are only signalled; nothing is
    /// awaited and no result is collected.
    pub fn notify<S>(&self, store: &S, identity: &QueryIdentity) -> ChangeEvent
    where
        S: NormalizedStore + ?Sized,
    {
        let epoch = self.epoch_counter.fetch_add(1, Ordering::SeqCst);
        let event = ChangeEvent::new(identity.clone(), epoch);

        debug!(
            event_id = %event.id,
            event_epoch = event.epoch,
            identity = %event.identity,
            "Broadcasting bypass write"
        );

        store.broadcast_watches();

        // Listeners may subscribe others; call them outside the lock.
        let listeners = rw_read(&self.listeners, SOURCE, "notify").clone();
        for listener in &listeners {
            listener.on_change(&event);
        }

        event
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded buffer of change events for polling consumers.
///
/// When full, the oldest event is dropped to make room.
pub struct EventQueue {
    queue: Mutex<VecDeque<ChangeEvent>>,
    limit: usize,
    dropped: AtomicU64,
}

impl EventQueue {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(limit)),
            limit,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, event: ChangeEvent) {
        let mut queue = mutex_lock(&self.queue, SOURCE, "push");
        if queue.len() >= self.limit {
            if let Some(oldest) = queue.pop_front() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                counter!(METRIC_EVENT_DROPPED).increment(1);
                warn!(
                    event_id = %oldest.id,
                    event_epoch = oldest.epoch,
                    limit = self.limit,
                    "Change event queue full, dropping oldest event"
                );
            }
        }
        queue.push_back(event);
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<ChangeEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        queue.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
    }
}

impl ChangeListener for EventQueue {
    fn on_change(&self, event: &ChangeEvent) {
        self.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::cache::store::{MemoryStore, MemoryStoreConfig};

    fn event(epoch: Epoch) -> ChangeEvent {
        ChangeEvent::new(QueryIdentity::from("GetFeed"), epoch)
    }

    #[test]
    fn event_creation() {
        let event = event(42);
        assert_eq!(event.epoch, 42);
        assert_eq!(event.identity.as_str(), "GetFeed");
        assert!(!event.id.is_nil());
    }

    #[test]
    fn notify_broadcasts_and_reaches_listeners() {
        let store = MemoryStore::new(MemoryStoreConfig::default());
        let broadcasts = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&broadcasts);
        store.subscribe(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        let notifier = ChangeNotifier::new();
        let queue = Arc::new(EventQueue::new(8));
        notifier.subscribe(queue.clone());

        let first = notifier.notify(&store, &QueryIdentity::from("GetFeed"));
        let second = notifier.notify(&store, &QueryIdentity::from("GetFeed"));

        assert!(first.epoch < second.epoch);
        assert_eq!(broadcasts.load(Ordering::SeqCst), 2);
        let drained = queue.drain(10);
        assert_eq!(drained, vec![first, second]);
    }

    #[test]
    fn closures_are_listeners() {
        let store = MemoryStore::new(MemoryStoreConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let notifier = ChangeNotifier::new();
        notifier.subscribe(Arc::new(move |event: &ChangeEvent| {
            sink.lock()
                .expect("sink lock")
                .push(event.identity.to_string());
        }));
        assert_eq!(notifier.listener_count(), 1);

        notifier.notify(&store, &QueryIdentity::from("GetFeed"));

        assert_eq!(*seen.lock().expect("sink lock"), vec!["GetFeed".to_string()]);
    }

    #[test]
    fn full_queue_drops_oldest() {
        let queue = EventQueue::new(2);
        queue.push(event(0));
        queue.push(event(1));
        queue.push(event(2));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        let epochs: Vec<Epoch> = queue.drain(10).iter().map(|e| e.epoch).collect();
        assert_eq!(epochs, vec![1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_respects_limit() {
        let queue = EventQueue::new(8);
        for epoch in 0..3 {
            queue.push(event(epoch));
        }

        assert_eq!(queue.drain(2).len(), 2);
        assert_eq!(queue.len(), 1);
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn event_queue_recovers_from_poisoned_lock() {
        let queue = EventQueue::new(4);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = queue.queue.lock().expect("queue lock should be acquired");
            panic!("poison queue lock");
        }));

        queue.push(event(0));
        assert_eq!(queue.len(), 1);
    }
}
