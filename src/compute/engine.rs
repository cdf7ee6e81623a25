//! Compute Cache Engine
//!
//! Owns the key → entry map and implements retrieval and explicit
//! invalidation. Reclamation and shutdown live in [`super::reclaimer`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::config::CacheConfig;
use super::entry::{Entry, Phase};
use super::key::CacheKey;
use super::metrics::{CacheStats, StatsSnapshot};
use super::reclaimer::Reclaimer;
use super::reference::{Cached, Reclaimed};
use crate::error::{Error, Result};

// =============================================================================
// Core
// =============================================================================

/// State shared by callers and the reclamation thread. Replaced wholesale by
/// [`ComputeCache::clear`].
pub(crate) struct Core<K: CacheKey> {
    pub(crate) config: CacheConfig,
    pub(crate) map: DashMap<K, Arc<Entry<K>>>,
    /// Entries retired by the sweep whose handle still awaits its notice
    pub(crate) orphans: DashMap<u64, Arc<Entry<K>>>,
    queue_tx: Sender<Reclaimed<K>>,
    pub(crate) queue_rx: Receiver<Reclaimed<K>>,
    closed: AtomicBool,
    stats: Arc<CacheStats>,
}

impl<K: CacheKey> Core<K> {
    pub(crate) fn new(config: CacheConfig, stats: Arc<CacheStats>) -> Self {
        let (queue_tx, queue_rx) = channel::unbounded();
        Self {
            config,
            map: DashMap::new(),
            orphans: DashMap::new(),
            queue_tx,
            queue_rx,
            closed: AtomicBool::new(false),
            stats,
        }
    }

    pub(crate) fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub(crate) fn queue(&self) -> Sender<Reclaimed<K>> {
        self.queue_tx.clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark closed. Returns true if it was already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        self.closed.swap(true, Ordering::SeqCst)
    }

    /// Current entry for `key`, inserting an empty one if absent
    fn entry_for(&self, key: &K) -> Arc<Entry<K>> {
        if let Some(entry) = self.map.get(key) {
            return Arc::clone(entry.value());
        }
        let entry = self
            .map
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Entry::new(key.clone())));
        Arc::clone(entry.value())
    }

    /// Install a fresh entry in place of `retired`, unless another caller
    /// already did.
    fn replace_retired(&self, key: &K, retired: &Arc<Entry<K>>) -> Arc<Entry<K>> {
        match self.map.entry(key.clone()) {
            MapEntry::Occupied(mut occupied) => {
                if Arc::ptr_eq(occupied.get(), retired) {
                    let fresh = Arc::new(Entry::new(key.clone()));
                    occupied.insert(Arc::clone(&fresh));
                    fresh
                } else {
                    Arc::clone(occupied.get())
                }
            }
            MapEntry::Vacant(vacant) => {
                let fresh = Arc::new(Entry::new(key.clone()));
                vacant.insert(Arc::clone(&fresh));
                fresh
            }
        }
    }

    /// Remove `entry` from the map if it is still the current one for its key.
    pub(crate) fn unlink(&self, entry: &Entry<K>) {
        self.map
            .remove_if(entry.key(), |_, current| std::ptr::eq(Arc::as_ptr(current), entry));
    }

    pub(crate) fn get(&self, key: &K) -> Result<Cached<K>, K::Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let mut entry = self.entry_for(key);
        loop {
            let mut state = entry.lock();
            if state.is_retired() {
                drop(state);
                entry = self.replace_retired(key, &entry);
                continue;
            }
            // Checked under the entry lock so nothing is built after shutdown
            // has collected the entries it will close.
            if self.is_closed() {
                if !state.has_handle() {
                    state.mark_retired();
                    self.unlink(&entry);
                }
                return Err(Error::Closed);
            }
            return entry.resolve(&mut state, self);
        }
    }

    /// Retire `entry` and close its handle. No-op if already retired.
    fn retire_and_close(&self, entry: &Arc<Entry<K>>) -> bool {
        let mut state = entry.lock();
        if state.is_retired() {
            return false;
        }
        let remains = state.retire();
        self.unlink(entry);
        if let Some(remains) = remains {
            remains.close(entry.key(), &self.stats);
        }
        true
    }

    pub(crate) fn invalidate(&self, key: &K) -> bool {
        let Some(entry) = self.map.get(key).map(|e| Arc::clone(e.value())) else {
            return false;
        };
        let retired = self.retire_and_close(&entry);
        if retired {
            self.stats.record_invalidation();
            debug!(entry = entry.id(), "Invalidated cache entry");
        }
        retired
    }

    pub(crate) fn invalidate_if<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        // Snapshot first: neither entry locks nor the caller's predicate may
        // run under a map shard lock
        let matching: Vec<Arc<Entry<K>>> = self
            .entries()
            .into_iter()
            .filter(|entry| predicate(entry.key()))
            .collect();

        let mut count = 0;
        for entry in matching {
            if self.retire_and_close(&entry) {
                self.stats.record_invalidation();
                count += 1;
            }
        }
        debug!(count, "Invalidated matching cache entries");
        count
    }

    /// Snapshot of every entry currently in the map
    pub(crate) fn entries(&self) -> Vec<Arc<Entry<K>>> {
        self.map.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub(crate) fn phase(&self, key: &K) -> Option<Phase> {
        let entry = self.map.get(key).map(|e| Arc::clone(e.value()))?;
        let phase = entry.lock().phase();
        Some(phase)
    }
}

// =============================================================================
// Compute Cache
// =============================================================================

/// Concurrent memoizing cache for values derived from closeable handles
///
/// See the [module documentation](super) for the lifecycle.
pub struct ComputeCache<K: CacheKey> {
    core: RwLock<Arc<Core<K>>>,
    /// Also serializes `close` and `clear`
    reclaimer: Mutex<Option<Reclaimer>>,
    config: CacheConfig,
    stats: Arc<CacheStats>,
}

impl<K: CacheKey> ComputeCache<K> {
    /// Create a cache with default configuration
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Create a cache with custom configuration
    pub fn with_config(config: CacheConfig) -> Self {
        let stats = Arc::new(CacheStats::new());
        let core = Arc::new(Core::new(config.clone(), Arc::clone(&stats)));
        let reclaimer = Reclaimer::spawn(&core);
        Self {
            core: RwLock::new(core),
            reclaimer: Mutex::new(reclaimer),
            config,
            stats,
        }
    }

    fn current(&self) -> Arc<Core<K>> {
        Arc::clone(&self.core.read())
    }

    /// Return the value for `key`, computing it if needed.
    ///
    /// Concurrent calls for the same key share one computation. Errors from
    /// `allocate`/`generate` are returned as [`Error::Client`] and leave no
    /// entry behind, so the next call starts from scratch.
    pub fn get(&self, key: &K) -> Result<Cached<K>, K::Error> {
        loop {
            let core = self.current();
            match core.get(key) {
                // Lost a race with `clear`; retry against the new core
                Err(Error::Closed) if !Arc::ptr_eq(&core, &self.core.read()) => continue,
                result => return result,
            }
        }
    }

    /// Retire `key` and close its handle now. Returns whether an entry existed.
    pub fn invalidate(&self, key: &K) -> bool {
        self.current().invalidate(key)
    }

    /// Retire and close every entry whose key matches. Returns how many.
    ///
    /// The predicate runs on a snapshot of the keys and may call back into
    /// this cache.
    pub fn invalidate_if<F>(&self, predicate: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        self.current().invalidate_if(predicate)
    }

    /// Stop the reclamation thread and close every outstanding handle.
    ///
    /// Blocks until done. Later calls are no-ops; `get` returns
    /// [`Error::Closed`] afterwards.
    pub fn close(&self) {
        let mut reclaimer = self.reclaimer.lock();
        self.current().shutdown(reclaimer.take());
    }

    /// Close everything, then start over with an empty, usable cache.
    pub fn clear(&self) {
        let mut reclaimer = self.reclaimer.lock();
        let fresh = Arc::new(Core::new(self.config.clone(), Arc::clone(&self.stats)));
        let next = Reclaimer::spawn(&fresh);
        let old = std::mem::replace(&mut *self.core.write(), fresh);
        let previous = std::mem::replace(&mut *reclaimer, next);
        old.shutdown(previous);
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.current().is_closed()
    }

    /// Whether an entry for `key` is currently in the map
    pub fn contains(&self, key: &K) -> bool {
        self.current().map.contains_key(key)
    }

    /// Lifecycle phase of the entry for `key`, if any
    pub fn phase(&self, key: &K) -> Option<Phase> {
        self.current().phase(key)
    }

    /// Number of entries in the map
    pub fn len(&self) -> usize {
        self.current().map.len()
    }

    /// Check if the map is empty
    pub fn is_empty(&self) -> bool {
        self.current().map.is_empty()
    }

    /// Counters accumulated since construction, across `clear` calls
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Active configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl<K: CacheKey> Default for ComputeCache<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey> Drop for ComputeCache<K> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<K: CacheKey> std::fmt::Debug for ComputeCache<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeCache")
            .field("entries", &self.len())
            .field("closed", &self.is_closed())
            .field("config", &self.config)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
