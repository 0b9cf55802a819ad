use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::clock::Clock;

mod entry;
pub(crate) mod key;

pub use entry::CacheEntry;
pub use key::request_key;

/// Extension point invoked under the key's lock right after an entry is
/// chained. The policy may drop entries from the chain; whatever it returns
/// gets its backing buffer cleared by the cache.
pub trait EvictionPolicy: Send + Sync {
    fn evict(&self, key: &str, entries: &mut Vec<Arc<CacheEntry>>) -> Vec<Arc<CacheEntry>>;
}

/// Default policy: entries only leave the index by expiring.
pub struct NoEviction;

impl EvictionPolicy for NoEviction {
    fn evict(&self, _key: &str, _entries: &mut Vec<Arc<CacheEntry>>) -> Vec<Arc<CacheEntry>> {
        Vec::new()
    }
}

/// Keyed index of entry chains with a per-key single-flight lock.
///
/// Requests for different keys proceed in parallel; requests for the same
/// key serialize on the key's lock, so at most one upstream fetch per key is
/// in flight. The lock is held while `compute` runs and released only after
/// the produced entry is chained, so waiters re-entering the critical
/// section find the fresh entry and stream from its (possibly still
/// filling) body buffer.
#[derive(Clone)]
pub struct HttpCache {
    state: Arc<CacheState>,
}

struct CacheState {
    slots: Mutex<HashMap<String, Arc<KeySlot>>>,
    eviction: Box<dyn EvictionPolicy>,
    clock: Arc<dyn Clock>,
}

struct KeySlot {
    entries: tokio::sync::Mutex<Vec<Arc<CacheEntry>>>,
}

impl HttpCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_eviction(clock, Box::new(NoEviction))
    }

    pub fn with_eviction(clock: Arc<dyn Clock>, eviction: Box<dyn EvictionPolicy>) -> Self {
        Self {
            state: Arc::new(CacheState {
                slots: Mutex::new(HashMap::new()),
                eviction,
                clock,
            }),
        }
    }

    /// Serves from a matching public entry or computes a new one.
    ///
    /// `matches` encapsulates the Vary comparison for the current request.
    /// `compute` receives the selected entry (`Some` means replay it and
    /// return `Ok(None)`); when it returns a public entry, the entry is
    /// chained under the key before the lock is released. Private entries
    /// and errors are never inserted.
    pub async fn get_or_compute<M, F, Fut>(&self, key: &str, matches: M, compute: F) -> Result<()>
    where
        M: Fn(&CacheEntry) -> bool,
        F: FnOnce(Option<Arc<CacheEntry>>) -> Fut,
        Fut: Future<Output = Result<Option<Arc<CacheEntry>>>>,
    {
        let slot = self.slot(key);
        let mut entries = slot.entries.lock().await;

        self.prune_expired(&mut entries).await;

        let existing = entries
            .iter()
            .find(|entry| entry.is_public && matches(entry))
            .cloned();

        let produced = compute(existing).await?;

        if let Some(entry) = produced
            && entry.is_public
        {
            trace!(key, "chaining new cache entry");
            entries.push(entry);
            let evicted = self.state.eviction.evict(key, &mut entries);
            for entry in evicted {
                self.clear_entry_body(&entry).await;
            }
        }
        Ok(())
    }

    /// Drops a specific chained entry, used when recording its body failed
    /// after the entry became visible.
    pub(crate) async fn remove(&self, key: &str, entry: &Arc<CacheEntry>) {
        let slot = { self.state.slots.lock().get(key).cloned() };
        if let Some(slot) = slot {
            let mut entries = slot.entries.lock().await;
            entries.retain(|chained| !Arc::ptr_eq(chained, entry));
        }
    }

    /// Empties the index and clears every body buffer. Intended for
    /// shutdown; entries otherwise leave the index by expiring.
    pub async fn clear(&self) {
        let slots: Vec<Arc<KeySlot>> = {
            let mut guard = self.state.slots.lock();
            guard.drain().map(|(_, slot)| slot).collect()
        };
        for slot in slots {
            let mut entries = slot.entries.lock().await;
            for entry in entries.drain(..) {
                self.clear_entry_body(&entry).await;
            }
        }
    }

    fn slot(&self, key: &str) -> Arc<KeySlot> {
        let mut slots = self.state.slots.lock();
        slots
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(KeySlot {
                    entries: tokio::sync::Mutex::new(Vec::new()),
                })
            })
            .clone()
    }

    async fn prune_expired(&self, entries: &mut Vec<Arc<CacheEntry>>) {
        let now = self.state.clock.now();
        if entries.iter().all(|entry| entry.expires_at > now) {
            return;
        }
        let mut kept = Vec::with_capacity(entries.len());
        for entry in entries.drain(..) {
            if entry.expires_at > now {
                kept.push(entry);
                continue;
            }
            trace!("dropping expired cache entry");
            self.clear_entry_body(&entry).await;
        }
        *entries = kept;
    }

    async fn clear_entry_body(&self, entry: &Arc<CacheEntry>) {
        if let Some(body) = &entry.body
            && let Err(err) = body.clear().await
        {
            warn!(error = %err, "failed to clear cache body");
        }
    }
}
