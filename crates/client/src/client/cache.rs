//! TTL cache of successful GET bodies, used for degraded fallback.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::time::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
}

/// Bounded, clock-driven TTL cache keyed by logical request.
///
/// Expired entries are dropped lazily on lookup; when full, the oldest entry
/// makes room for a new one.
#[derive(Debug)]
pub struct ResponseCache<C: Clock = SystemClock> {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
    clock: Arc<C>,
}

impl<C: Clock> ResponseCache<C> {
    pub fn with_clock(ttl: Duration, capacity: usize, clock: C) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
            clock: Arc::new(clock),
        }
    }

    fn lock_entries(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("response cache lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn insert(&self, key: &str, value: Value) {
        let now = self.clock.now();
        let mut entries = self.lock_entries();

        if entries.len() >= self.capacity && !entries.contains_key(key) {
            let oldest =
                entries.iter().min_by_key(|(_, e)| e.inserted_at).map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!(key = %oldest, "response cache full; evicting oldest entry");
                entries.remove(&oldest);
            }
        }

        entries.insert(key.to_string(), CacheEntry { value, inserted_at: now });
    }

    /// Fetch a live entry; expired ones are removed on the way out.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let mut entries = self.lock_entries();

        match entries.get(key) {
            Some(entry) if now.duration_since(entry.inserted_at) < self.ttl => {
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn clear(&self) {
        self.lock_entries().clear();
    }

    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
