//! The offline queue: a durable, priority-ordered backlog of operations
//! deferred until connectivity returns.
//!
//! Items are kept sorted by priority (FIFO within a tier), persisted on every
//! mutation, and drained by a background interval task plus opportunistic
//! drains on enqueue and on offline-to-online transitions. Draining is
//! mutually exclusive: a re-entrant call while one is in flight is a no-op.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::errors::{QueueError, QueueResult};
use super::store::{decode_snapshot, encode_snapshot, KeyValueStore};
use super::types::{Priority, QueueConfig, QueueItem, QueueStats};
use crate::time::{Clock, SystemClock};
use crate::transport::{Transport, TransportError, TransportRequest};

type Listener = Arc<dyn Fn(QueueStats) + Send + Sync>;

/// Handle returned by [`OfflineQueue::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct QueueState {
    /// Sorted by priority, FIFO within a tier.
    items: Vec<QueueItem>,
    /// Ids currently being replayed; never processed twice concurrently.
    processing: HashSet<String>,
}

impl QueueState {
    /// Insert keeping priority order: after every item of the same or higher
    /// priority, before the first strictly lower one.
    fn insert_ordered(&mut self, item: QueueItem) {
        let position = self
            .items
            .iter()
            .position(|existing| existing.priority > item.priority)
            .unwrap_or(self.items.len());
        self.items.insert(position, item);
    }

    /// Index of the eviction victim: lowest priority, oldest within that tier.
    fn eviction_index(&self) -> Option<usize> {
        let worst = self.items.iter().map(|i| i.priority).max()?;
        self.items
            .iter()
            .enumerate()
            .filter(|(_, i)| i.priority == worst)
            .min_by_key(|(_, i)| i.enqueued_at)
            .map(|(idx, _)| idx)
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            total_items: self.items.len(),
            pending_items: self.items.len().saturating_sub(self.processing.len()),
            processing_items: self.processing.len(),
            failed_items: self.items.iter().filter(|i| i.attempt > 0).count(),
            critical_items: self.items.iter().filter(|i| i.priority == Priority::Critical).count(),
            oldest_item_timestamp: self.items.iter().map(|i| i.enqueued_at).min(),
        }
    }
}

struct QueueShared<C: Clock> {
    config: QueueConfig,
    state: RwLock<QueueState>,
    online: AtomicBool,
    draining: AtomicBool,
    shutdown: AtomicBool,
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn Transport>,
    listeners: RwLock<HashMap<u64, Listener>>,
    next_subscription: AtomicU64,
    clock: Arc<C>,
}

impl<C: Clock> QueueShared<C> {
    fn read_state(&self) -> RwLockReadGuard<'_, QueueState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("queue state lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, QueueState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("queue state lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Write the current items to the backing store. Storage trouble is
    /// logged, not propagated: the in-memory queue keeps working.
    fn persist(&self) {
        let encoded = {
            let state = self.read_state();
            encode_snapshot(&state.items)
        };
        match encoded {
            Ok(raw) => {
                if let Err(e) = self.store.set(&self.config.storage_key, &raw) {
                    error!(error = %e, "failed to persist offline queue");
                }
            }
            Err(e) => error!(error = %e, "failed to encode offline queue"),
        }
    }

    fn notify_listeners(&self) {
        let stats = self.read_state().stats();
        let listeners: Vec<Listener> = match self.listeners.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        };
        for listener in listeners {
            let snapshot = stats.clone();
            if catch_unwind(AssertUnwindSafe(|| listener(snapshot))).is_err() {
                warn!("queue listener panicked; continuing");
            }
        }
    }

    fn request_for(&self, item: &QueueItem) -> TransportRequest {
        TransportRequest {
            endpoint: item.endpoint.clone(),
            method: item.method,
            headers: item.headers.clone(),
            body: item.payload.clone(),
            timeout: self.config.process_timeout,
        }
    }

    /// Drain eligible items in queue order. Mutually exclusive; a call while
    /// another drain is running (or while offline) returns immediately.
    async fn drain(shared: Arc<Self>) {
        if shared.shutdown.load(Ordering::Acquire) || !shared.online.load(Ordering::Acquire) {
            return;
        }
        if shared
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("drain already in flight");
            return;
        }

        Self::drain_batch(&shared).await;
        shared.draining.store(false, Ordering::Release);
    }

    /// One pass over the queue: each eligible item gets at most one attempt.
    async fn drain_batch(shared: &Arc<Self>) {
        let batch: Vec<String> = {
            let state = shared.read_state();
            state
                .items
                .iter()
                .filter(|i| !state.processing.contains(&i.id) && !i.exhausted())
                .map(|i| i.id.clone())
                .collect()
        };

        if batch.is_empty() {
            return;
        }
        debug!(items = batch.len(), "draining offline queue");

        for id in batch {
            if shared.shutdown.load(Ordering::Acquire) || !shared.online.load(Ordering::Acquire) {
                break;
            }
            Self::process_item(shared, &id).await;
        }
    }

    async fn process_item(shared: &Arc<Self>, id: &str) {
        // Claim the item; skip if it vanished or is already claimed.
        let item = {
            let mut state = shared.write_state();
            let Some(item) = state.items.iter().find(|i| i.id == id).cloned() else {
                return;
            };
            if item.exhausted() || !state.processing.insert(id.to_string()) {
                return;
            }
            item
        };
        shared.notify_listeners();

        let request = shared.request_for(&item);
        let outcome =
            match tokio::time::timeout(shared.config.process_timeout, shared.transport.call(&request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout { timeout: shared.config.process_timeout }),
            };

        match outcome {
            Ok(response) => {
                debug!(item = id, status = response.status, "queued request completed");
                let mut state = shared.write_state();
                state.items.retain(|i| i.id != id);
                state.processing.remove(id);
            }
            Err(error) => {
                warn!(item = id, error = %error, "queued request failed");
                let mut state = shared.write_state();
                state.processing.remove(id);
                if let Some(stored) = state.items.iter_mut().find(|i| i.id == id) {
                    stored.attempt += 1;
                    if stored.exhausted() {
                        let attempts = stored.attempt;
                        state.items.retain(|i| i.id != id);
                        warn!(item = id, attempts, "item permanently failed; removed from queue");
                    }
                }
            }
        }

        shared.persist();
        shared.notify_listeners();
    }

    /// Fire-and-forget drain, when a runtime is available to spawn on.
    fn trigger_drain(shared: &Arc<Self>) {
        match Handle::try_current() {
            Ok(handle) => {
                let shared = Arc::clone(shared);
                handle.spawn(async move {
                    Self::drain(shared).await;
                });
            }
            Err(_) => {
                debug!("no tokio runtime; drain deferred to the interval task");
            }
        }
    }
}

/// Durable, priority-ordered, bounded queue of deferred operations.
///
/// Clones share the same queue. Replays go straight to the injected
/// [`Transport`]; the queue keeps its own attempt bookkeeping, so replays do
/// not pass through the circuit breaker or retry layers.
pub struct OfflineQueue<C: Clock = SystemClock> {
    shared: Arc<QueueShared<C>>,
    drain_handle: Mutex<Option<JoinHandle<()>>>,
}

impl OfflineQueue<SystemClock> {
    pub fn new(
        config: QueueConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
    ) -> QueueResult<Self> {
        Self::with_clock(config, transport, store, SystemClock)
    }
}

impl<C: Clock> OfflineQueue<C> {
    pub fn with_clock(
        config: QueueConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
        clock: C,
    ) -> QueueResult<Self> {
        config.validate()?;

        let shared = Arc::new(QueueShared {
            config,
            state: RwLock::new(QueueState { items: Vec::new(), processing: HashSet::new() }),
            online: AtomicBool::new(true),
            draining: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            store,
            transport,
            listeners: RwLock::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            clock: Arc::new(clock),
        });

        // Restore whatever a previous process left behind.
        if let Some(raw) = shared.store.get(&shared.config.storage_key) {
            let restored = decode_snapshot(&raw, shared.clock.epoch_millis());
            if !restored.is_empty() {
                info!(items = restored.len(), "restored persisted queue items");
                let mut state = shared.write_state();
                for item in restored {
                    state.insert_ordered(item);
                }
            }
        }

        let queue = Self { shared, drain_handle: Mutex::new(None) };
        queue.start_drain_task();
        Ok(queue)
    }

    fn start_drain_task(&self) {
        let Ok(handle) = Handle::try_current() else {
            warn!("no tokio runtime; offline queue drain timer not started");
            return;
        };

        let shared = Arc::clone(&self.shared);
        let interval = shared.config.drain_interval;
        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if shared.shutdown.load(Ordering::Acquire) {
                    break;
                }
                QueueShared::drain(Arc::clone(&shared)).await;
            }
        });

        if let Ok(mut slot) = self.drain_handle.lock() {
            *slot = Some(task);
        }
    }

    /// Add an operation, stamping identity, timestamp, and attempt count.
    ///
    /// When over capacity the lowest-priority oldest item is evicted to admit
    /// the new one. Online queues kick off a fire-and-forget drain.
    #[instrument(skip(self, item), fields(endpoint = %item.endpoint, priority = %item.priority))]
    pub fn enqueue(&self, mut item: QueueItem) -> QueueResult<String> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(QueueError::ShuttingDown);
        }

        item.id = Uuid::new_v4().to_string();
        item.enqueued_at = self.shared.clock.epoch_millis();
        item.attempt = 0;
        item.max_attempts = item.max_attempts.max(1);
        let id = item.id.clone();

        {
            let mut state = self.shared.write_state();
            state.insert_ordered(item);
            if state.items.len() > self.shared.config.max_size {
                if let Some(index) = state.eviction_index() {
                    let evicted = state.items.remove(index);
                    state.processing.remove(&evicted.id);
                    warn!(
                        evicted = %evicted.id,
                        priority = %evicted.priority,
                        "queue full; evicted lowest-priority item"
                    );
                }
            }
        }

        self.shared.persist();
        self.shared.notify_listeners();

        if self.shared.online.load(Ordering::Acquire) {
            QueueShared::trigger_drain(&self.shared);
        }

        debug!(item = %id, "operation queued");
        Ok(id)
    }

    /// Drain the queue now. No-op while offline or when a drain is running.
    pub async fn process_queue(&self) {
        QueueShared::drain(Arc::clone(&self.shared)).await;
    }

    /// Flip connectivity. Going online immediately kicks off a drain; going
    /// offline halts processing but not enqueueing.
    pub fn set_online(&self, online: bool) {
        let was = self.shared.online.swap(online, Ordering::AcqRel);
        if online && !was {
            info!("connectivity restored; draining offline queue");
            QueueShared::trigger_drain(&self.shared);
        } else if !online && was {
            info!("connectivity lost; queue processing halted");
        }
    }

    pub fn is_online(&self) -> bool {
        self.shared.online.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.read_state().stats()
    }

    /// Remove a queued item by id.
    pub fn remove_item(&self, id: &str) -> QueueResult<()> {
        {
            let mut state = self.shared.write_state();
            let Some(index) = state.items.iter().position(|i| i.id == id) else {
                return Err(QueueError::ItemNotFound(id.to_string()));
            };
            state.items.remove(index);
            state.processing.remove(id);
        }
        self.shared.persist();
        self.shared.notify_listeners();
        Ok(())
    }

    /// Drop everything. Returns how many items were discarded.
    pub fn clear(&self) -> QueueResult<usize> {
        let count = {
            let mut state = self.shared.write_state();
            let count = state.items.len();
            state.items.clear();
            state.processing.clear();
            count
        };
        self.shared.persist();
        self.shared.notify_listeners();
        info!(count, "offline queue cleared");
        Ok(count)
    }

    /// Register a stats listener, called after every mutating operation.
    pub fn subscribe(
        &self,
        listener: impl Fn(QueueStats) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.shared.next_subscription.fetch_add(1, Ordering::Relaxed);
        let mut listeners = match self.shared.listeners.write() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.insert(id, Arc::new(listener));
        SubscriptionId(id)
    }

    /// Drop a listener. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = match self.shared.listeners.write() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.remove(&id.0).is_some()
    }

    /// Stop the drain task and persist a final snapshot.
    pub fn destroy(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Ok(mut slot) = self.drain_handle.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        self.shared.persist();
        info!("offline queue shut down");
    }
}

impl<C: Clock> Clone for OfflineQueue<C> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared), drain_handle: Mutex::new(None) }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::queue::store::MemoryStore;
    use crate::time::MockClock;
    use crate::transport::{Method, TransportResponse};

    /// Transport that answers from a script of failures before succeeding.
    struct ScriptedTransport {
        calls: AtomicU32,
        failures_before_success: u32,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(failures_before_success: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                failures_before_success,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn call(
            &self,
            request: &TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(request.endpoint.clone());
            }
            if n < self.failures_before_success {
                Err(TransportError::Status { status: 503, message: "unavailable".into() })
            } else {
                Ok(TransportResponse { status: 200, body: json!({ "ok": true }) })
            }
        }
    }

    fn queue_with(
        config: QueueConfig,
        transport: Arc<dyn Transport>,
    ) -> (OfflineQueue<MockClock>, Arc<MemoryStore>, MockClock) {
        let store = Arc::new(MemoryStore::new());
        let clock = MockClock::new();
        let queue = OfflineQueue::with_clock(
            config,
            transport,
            Arc::clone(&store) as Arc<dyn KeyValueStore>,
            clock.clone(),
        )
        .unwrap();
        (queue, store, clock)
    }

    fn offline_queue(
        config: QueueConfig,
        transport: Arc<dyn Transport>,
    ) -> (OfflineQueue<MockClock>, Arc<MemoryStore>, MockClock) {
        let (queue, store, clock) = queue_with(config, transport);
        queue.set_online(false);
        (queue, store, clock)
    }

    #[tokio::test]
    async fn enqueue_orders_by_priority_then_fifo() {
        let transport = ScriptedTransport::new(0);
        let (queue, _store, clock) =
            offline_queue(QueueConfig::default(), transport.clone() as Arc<dyn Transport>);

        clock.advance_millis(1);
        queue.enqueue(QueueItem::new("/low-1", Method::Post).with_priority(Priority::Low)).unwrap();
        clock.advance_millis(1);
        queue
            .enqueue(QueueItem::new("/normal-1", Method::Post).with_priority(Priority::Normal))
            .unwrap();
        clock.advance_millis(1);
        queue
            .enqueue(QueueItem::new("/critical-1", Method::Post).with_priority(Priority::Critical))
            .unwrap();
        clock.advance_millis(1);
        queue
            .enqueue(QueueItem::new("/normal-2", Method::Post).with_priority(Priority::Normal))
            .unwrap();

        // Flip the flag directly so only this drain runs; set_online would
        // also spawn one and race the ordering assertion.
        queue.shared.online.store(true, Ordering::Release);
        queue.process_queue().await;

        let seen = transport.seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["/critical-1", "/normal-1", "/normal-2", "/low-1"]);
        assert_eq!(queue.stats().total_items, 0);
    }

    #[tokio::test]
    async fn over_capacity_evicts_lowest_priority_oldest() {
        let transport = ScriptedTransport::new(u32::MAX);
        let config = QueueConfig { max_size: 3, ..QueueConfig::default() };
        let (queue, _store, clock) = offline_queue(config, transport as Arc<dyn Transport>);

        clock.advance_millis(1);
        queue.enqueue(QueueItem::new("/low-old", Method::Post).with_priority(Priority::Low)).unwrap();
        clock.advance_millis(1);
        queue.enqueue(QueueItem::new("/low-new", Method::Post).with_priority(Priority::Low)).unwrap();
        clock.advance_millis(1);
        queue.enqueue(QueueItem::new("/high", Method::Post).with_priority(Priority::High)).unwrap();
        clock.advance_millis(1);
        queue
            .enqueue(QueueItem::new("/critical", Method::Post).with_priority(Priority::Critical))
            .unwrap();

        let stats = queue.stats();
        assert_eq!(stats.total_items, 3);

        let endpoints: Vec<String> = {
            let state = queue.shared.read_state();
            state.items.iter().map(|i| i.endpoint.clone()).collect()
        };
        // The oldest low-priority item went away; order stays priority-first.
        assert_eq!(endpoints, vec!["/critical", "/high", "/low-new"]);
    }

    #[tokio::test]
    async fn failed_items_retry_and_then_exhaust() {
        let transport = ScriptedTransport::new(u32::MAX);
        let (queue, _store, _clock) =
            offline_queue(QueueConfig::default(), transport.clone() as Arc<dyn Transport>);

        queue
            .enqueue(QueueItem::new("/pets", Method::Post).with_max_attempts(3))
            .unwrap();
        // One attempt per explicit drain; avoid the extra drain set_online spawns.
        queue.shared.online.store(true, Ordering::Release);

        queue.process_queue().await;
        assert_eq!(queue.stats().total_items, 1);
        assert_eq!(queue.stats().failed_items, 1);

        queue.process_queue().await;
        assert_eq!(queue.stats().total_items, 1);

        // Third failure exhausts the item; it never reappears.
        queue.process_queue().await;
        assert_eq!(queue.stats().total_items, 0);
        assert_eq!(transport.calls(), 3);

        queue.process_queue().await;
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn offline_halts_processing_but_not_enqueueing() {
        let transport = ScriptedTransport::new(0);
        let (queue, _store, _clock) =
            offline_queue(QueueConfig::default(), transport.clone() as Arc<dyn Transport>);

        queue.enqueue(QueueItem::new("/pets", Method::Post)).unwrap();
        queue.process_queue().await;

        assert_eq!(transport.calls(), 0);
        assert_eq!(queue.stats().total_items, 1);

        queue.set_online(true);
        // The transition spawns a drain; wait for it to land.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(transport.calls(), 1);
        assert_eq!(queue.stats().total_items, 0);
    }

    #[tokio::test]
    async fn queue_survives_restart_through_store() {
        let transport: Arc<dyn Transport> = ScriptedTransport::new(u32::MAX);
        let store = Arc::new(MemoryStore::new());
        let clock = MockClock::new();

        {
            let queue = OfflineQueue::with_clock(
                QueueConfig::default(),
                Arc::clone(&transport),
                Arc::clone(&store) as Arc<dyn KeyValueStore>,
                clock.clone(),
            )
            .unwrap();
            queue.set_online(false);
            queue
                .enqueue(QueueItem::new("/pets", Method::Post).with_payload(json!({ "id": 1 })))
                .unwrap();
            queue.destroy();
        }

        let revived = OfflineQueue::with_clock(
            QueueConfig::default(),
            transport,
            store as Arc<dyn KeyValueStore>,
            clock,
        )
        .unwrap();
        let stats = revived.stats();
        assert_eq!(stats.total_items, 1);
    }

    #[tokio::test]
    async fn listeners_get_stats_and_panics_are_isolated() {
        let transport = ScriptedTransport::new(0);
        let (queue, _store, _clock) =
            offline_queue(QueueConfig::default(), transport as Arc<dyn Transport>);

        let notified = Arc::new(AtomicU32::new(0));
        let notified_clone = Arc::clone(&notified);

        queue.subscribe(|_| panic!("bad listener"));
        let subscription = queue.subscribe(move |stats| {
            assert_eq!(stats.total_items, 1);
            notified_clone.fetch_add(1, Ordering::SeqCst);
        });

        queue.enqueue(QueueItem::new("/pets", Method::Post)).unwrap();
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        assert!(queue.unsubscribe(subscription));
        assert!(!queue.unsubscribe(subscription));
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let transport = ScriptedTransport::new(0);
        let (queue, _store, _clock) =
            offline_queue(QueueConfig::default(), transport as Arc<dyn Transport>);

        let id = queue.enqueue(QueueItem::new("/a", Method::Post)).unwrap();
        queue.enqueue(QueueItem::new("/b", Method::Post)).unwrap();

        queue.remove_item(&id).unwrap();
        assert!(matches!(queue.remove_item(&id), Err(QueueError::ItemNotFound(_))));

        assert_eq!(queue.clear().unwrap(), 1);
        assert_eq!(queue.stats().total_items, 0);
    }

    #[tokio::test]
    async fn enqueue_after_destroy_is_rejected() {
        let transport = ScriptedTransport::new(0);
        let (queue, _store, _clock) =
            offline_queue(QueueConfig::default(), transport as Arc<dyn Transport>);

        queue.destroy();
        let result = queue.enqueue(QueueItem::new("/pets", Method::Post));
        assert!(matches!(result, Err(QueueError::ShuttingDown)));
    }

    #[tokio::test]
    async fn stats_track_critical_and_oldest() {
        let transport = ScriptedTransport::new(0);
        let (queue, _store, clock) =
            offline_queue(QueueConfig::default(), transport as Arc<dyn Transport>);

        clock.advance_millis(10);
        queue
            .enqueue(QueueItem::new("/a", Method::Post).with_priority(Priority::Critical))
            .unwrap();
        clock.advance_millis(10);
        queue.enqueue(QueueItem::new("/b", Method::Post)).unwrap();

        let stats = queue.stats();
        assert_eq!(stats.total_items, 2);
        assert_eq!(stats.pending_items, 2);
        assert_eq!(stats.critical_items, 1);
        assert_eq!(stats.oldest_item_timestamp, Some(10));
    }
}
