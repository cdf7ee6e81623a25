//! Value References
//!
//! Two flavours of reference from an entry to its derived value:
//!
//! - **Delayed**: the entry holds a strong pointer, so the value survives even
//!   when no caller holds it. Used while the value is fresh (inside its expiry
//!   window).
//! - **Eager**: the entry holds a weak pointer, so the value is dropped as
//!   soon as the last caller releases it.
//!
//! Every value allocation carries a drop hook that posts a [`Reclaimed`]
//! notice to the engine's reclamation queue. That notice is the only signal
//! the background thread uses to close orphaned handles.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam::channel::Sender;

use super::entry::Entry;
use super::key::CacheKey;

/// Source of value generation numbers, unique per process
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Notice that a value generation became unreachable
pub(crate) struct Reclaimed<K: CacheKey> {
    pub(crate) entry: Arc<Entry<K>>,
    pub(crate) generation: u64,
}

/// A derived value plus the bookkeeping needed to report its death
pub(crate) struct Tracked<K: CacheKey> {
    value: Arc<K::Value>,
    generation: u64,
    entry: Arc<Entry<K>>,
    queue: Sender<Reclaimed<K>>,
}

impl<K: CacheKey> Tracked<K> {
    pub(crate) fn new(
        value: Arc<K::Value>,
        entry: Arc<Entry<K>>,
        queue: Sender<Reclaimed<K>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            value,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            entry,
            queue,
        })
    }

    pub(crate) fn value(&self) -> &Arc<K::Value> {
        &self.value
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

impl<K: CacheKey> Drop for Tracked<K> {
    fn drop(&mut self) {
        // The receiver is gone once the engine core has shut down
        let _ = self.queue.send(Reclaimed {
            entry: Arc::clone(&self.entry),
            generation: self.generation,
        });
    }
}

enum Strength<K: CacheKey> {
    Delayed(Arc<Tracked<K>>),
    Eager(Weak<Tracked<K>>),
}

/// Reference held by an entry to its current value generation
pub(crate) struct ValueRef<K: CacheKey> {
    generation: u64,
    strength: Strength<K>,
}

impl<K: CacheKey> ValueRef<K> {
    pub(crate) fn new(tracked: &Arc<Tracked<K>>, delayed: bool) -> Self {
        let strength = if delayed {
            Strength::Delayed(Arc::clone(tracked))
        } else {
            Strength::Eager(Arc::downgrade(tracked))
        };
        Self {
            generation: tracked.generation(),
            strength,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn is_delayed(&self) -> bool {
        matches!(self.strength, Strength::Delayed(_))
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<Tracked<K>>> {
        match &self.strength {
            Strength::Delayed(tracked) => Some(Arc::clone(tracked)),
            Strength::Eager(weak) => weak.upgrade(),
        }
    }

    /// True once the value is unreachable, even if its drop hook has not run yet
    pub(crate) fn is_reclaimed(&self) -> bool {
        match &self.strength {
            Strength::Delayed(_) => false,
            Strength::Eager(weak) => weak.strong_count() == 0,
        }
    }

    /// Switch an eager reference back to delayed. Returns whether it changed.
    pub(crate) fn promote(&mut self, tracked: &Arc<Tracked<K>>) -> bool {
        if self.is_delayed() || tracked.generation() != self.generation {
            return false;
        }
        self.strength = Strength::Delayed(Arc::clone(tracked));
        true
    }

    /// Switch a delayed reference to eager. Returns whether it changed.
    ///
    /// If no caller holds the value, it is dropped right here and its
    /// reclamation notice is queued.
    pub(crate) fn demote(&mut self) -> bool {
        let weak = match &self.strength {
            Strength::Delayed(tracked) => Arc::downgrade(tracked),
            Strength::Eager(_) => return false,
        };
        self.strength = Strength::Eager(weak);
        true
    }
}

/// A value handed out by [`ComputeCache::get`](super::ComputeCache::get)
///
/// Cheap to clone. Holding one keeps the value (but not its entry) alive.
pub struct Cached<K: CacheKey> {
    inner: Arc<Tracked<K>>,
}

impl<K: CacheKey> Cached<K> {
    pub(crate) fn new(inner: Arc<Tracked<K>>) -> Self {
        Self { inner }
    }

    /// Returns true if both point at the same value generation
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.inner, &other.inner)
    }

    /// Generation number of this value, unique per process
    pub fn generation(&self) -> u64 {
        self.inner.generation()
    }

    /// Shared pointer to the value produced by `generate`
    pub fn shared(&self) -> Arc<K::Value> {
        Arc::clone(self.inner.value())
    }
}

impl<K: CacheKey> Clone for Cached<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: CacheKey> Deref for Cached<K> {
    type Target = K::Value;

    fn deref(&self) -> &Self::Target {
        self.inner.value()
    }
}

impl<K: CacheKey> fmt::Debug for Cached<K>
where
    K::Value: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cached")
            .field("generation", &self.inner.generation())
            .field("value", &**self.inner.value())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
