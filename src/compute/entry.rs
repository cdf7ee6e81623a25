//! Cache Entry State Machine
//!
//! One entry per live key. All mutation happens under the entry's own mutex,
//! which serializes `allocate`/`generate`/`validate`/`close` for that key
//! while unrelated keys proceed in parallel.
//!
//! ```text
//!  Unconstructed ──allocate+generate──▶ Live ◀──────────────┐
//!                                        │                   │ generate
//!                                        ├─ value lost ─▶ StaleValue
//!                                        │                   ▲
//!                                        └─ handle bad ─▶ StaleHandle
//!                                                (close, allocate)
//!  any state ── failure / invalidate / reclaimed ──▶ Retired (terminal)
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use super::engine::Core;
use super::key::{is_aliased, CacheKey};
use super::metrics::CacheStats;
use super::reference::{Cached, Tracked, ValueRef};
use crate::error::{ContractViolation, Error, Result};

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Stand-in deadline offset for expiries too large to add to an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// `now + expiry`, saturating to a far-future instant on overflow
fn deadline_after(now: Instant, expiry: Duration) -> Instant {
    now.checked_add(expiry)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Observable lifecycle phase of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No handle allocated yet
    Unconstructed,
    /// Handle and value present
    Live,
    /// Handle present, value reclaimed
    StaleValue,
    /// Removed from the map; never mutated again
    Retired,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Unconstructed => write!(f, "unconstructed"),
            Phase::Live => write!(f, "live"),
            Phase::StaleValue => write!(f, "stale-value"),
            Phase::Retired => write!(f, "retired"),
        }
    }
}

/// Handle (and value, if still reachable) taken from a retired entry
pub(crate) struct Remains<K: CacheKey> {
    handle: Arc<K::Handle>,
    value: Option<Arc<K::Value>>,
}

impl<K: CacheKey> Remains<K> {
    pub(crate) fn close(self, key: &K, stats: &CacheStats) {
        close_handle(key, self.value.as_deref(), &self.handle, stats);
    }
}

/// Mutable per-key state, only reachable through [`Entry::lock`]
pub(crate) struct EntryState<K: CacheKey> {
    handle: Option<Arc<K::Handle>>,
    reference: Option<ValueRef<K>>,
    deadline: Instant,
    retired: bool,
}

impl<K: CacheKey> EntryState<K> {
    fn new() -> Self {
        Self {
            handle: None,
            reference: None,
            deadline: Instant::now(),
            retired: false,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        if self.retired {
            Phase::Retired
        } else if self.handle.is_none() {
            Phase::Unconstructed
        } else if self.reference.as_ref().map_or(true, ValueRef::is_reclaimed) {
            Phase::StaleValue
        } else {
            Phase::Live
        }
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired
    }

    pub(crate) fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn is_delayed(&self) -> bool {
        self.reference.as_ref().is_some_and(ValueRef::is_delayed)
    }

    /// Whether `generation` is the value this entry currently refers to
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.reference
            .as_ref()
            .is_some_and(|r| r.generation() == generation)
    }

    /// Value unreachable but its reclamation notice not handled yet
    pub(crate) fn is_orphaned(&self) -> bool {
        self.reference.as_ref().is_some_and(ValueRef::is_reclaimed)
    }

    /// Demote a delayed reference whose deadline has passed.
    pub(crate) fn demote_if_expired(&mut self, now: Instant) -> bool {
        if self.deadline > now {
            return false;
        }
        self.reference.as_mut().is_some_and(ValueRef::demote)
    }

    /// Mark retired without releasing the handle.
    pub(crate) fn mark_retired(&mut self) {
        self.retired = true;
    }

    /// Mark retired and take the handle for closing.
    pub(crate) fn retire(&mut self) -> Option<Remains<K>> {
        self.retired = true;
        self.take_remains()
    }

    fn take_remains(&mut self) -> Option<Remains<K>> {
        let value = self
            .reference
            .as_ref()
            .and_then(ValueRef::upgrade)
            .map(|tracked| Arc::clone(tracked.value()));
        self.reference = None;
        self.handle
            .take()
            .map(|handle| Remains { handle, value })
    }
}

/// Per-key bookkeeping owned by the engine's entry map
pub(crate) struct Entry<K: CacheKey> {
    id: u64,
    key: K,
    state: Mutex<EntryState<K>>,
}

impl<K: CacheKey> Entry<K> {
    pub(crate) fn new(key: K) -> Self {
        Self {
            id: NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed),
            key,
            state: Mutex::new(EntryState::new()),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn key(&self) -> &K {
        &self.key
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EntryState<K>> {
        self.state.lock()
    }

    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, EntryState<K>>> {
        self.state.try_lock()
    }

    /// Serve, validate or (re)build the value. Caller holds the lock and has
    /// checked that the entry is not retired.
    pub(crate) fn resolve(
        self: &Arc<Self>,
        state: &mut EntryState<K>,
        core: &Core<K>,
    ) -> Result<Cached<K>, K::Error> {
        let expiry = self.key.expiry();
        let delayed = !expiry.is_zero();

        let cached = match state.handle.clone() {
            None => {
                let handle = self.allocate(state, core)?;
                debug!(entry = self.id, "Allocated cache handle");
                self.derive(state, core, handle, delayed)?
            }
            Some(handle) => match state.reference.as_ref().and_then(ValueRef::upgrade) {
                None => {
                    core.stats().record_regeneration();
                    debug!(entry = self.id, "Value reclaimed, regenerating from open handle");
                    self.derive(state, core, handle, delayed)?
                }
                Some(tracked) if self.key.validate(Some(tracked.value().as_ref()), &handle) => {
                    core.stats().record_hit();
                    if delayed {
                        if let Some(reference) = state.reference.as_mut() {
                            if reference.promote(&tracked) {
                                core.stats().record_promotion();
                                trace!(entry = self.id, "Promoted value reference to delayed");
                            }
                        }
                    }
                    Cached::new(tracked)
                }
                Some(tracked) => {
                    let handle = if self.key.validate(None, &handle) {
                        drop(tracked);
                        core.stats().record_regeneration();
                        debug!(entry = self.id, "Value failed validation, regenerating");
                        handle
                    } else {
                        debug!(entry = self.id, "Handle failed validation, reallocating");
                        let stale_value = Arc::clone(tracked.value());
                        drop(tracked);
                        state.reference = None;
                        state.handle = None;
                        close_handle(&self.key, Some(&*stale_value), &handle, core.stats());
                        drop(handle);
                        let handle = self.allocate(state, core)?;
                        core.stats().record_reallocation();
                        handle
                    };
                    self.derive(state, core, handle, delayed)?
                }
            },
        };

        state.deadline = deadline_after(Instant::now(), expiry);
        Ok(cached)
    }

    fn allocate(
        &self,
        state: &mut EntryState<K>,
        core: &Core<K>,
    ) -> Result<Arc<K::Handle>, K::Error> {
        match self.key.allocate() {
            Ok(handle) => {
                core.stats().record_allocation();
                Ok(Arc::new(handle))
            }
            Err(e) => {
                debug!(entry = self.id, error = %e, "Handle allocation failed");
                self.abandon(state, core);
                Err(Error::Client(e))
            }
        }
    }

    /// Generate a value from `handle` and install a fresh reference to it.
    fn derive(
        self: &Arc<Self>,
        state: &mut EntryState<K>,
        core: &Core<K>,
        handle: Arc<K::Handle>,
        delayed: bool,
    ) -> Result<Cached<K>, K::Error> {
        state.handle = Some(Arc::clone(&handle));

        let value = match self.key.generate(&handle) {
            Ok(value) => value,
            Err(e) => {
                debug!(entry = self.id, error = %e, "Value generation failed");
                self.abandon(state, core);
                return Err(Error::Client(e));
            }
        };

        if is_aliased(&handle, &value) {
            drop(value);
            core.stats().record_contract_violation();
            self.abandon(state, core);
            return Err(ContractViolation::Aliased.into());
        }

        let tracked = Tracked::new(value, Arc::clone(self), core.queue());
        state.reference = Some(ValueRef::new(&tracked, delayed));
        Ok(Cached::new(tracked))
    }

    /// Retire after a failed construction step, closing any handle.
    fn abandon(&self, state: &mut EntryState<K>, core: &Core<K>) {
        let remains = state.retire();
        core.unlink(self);
        if let Some(remains) = remains {
            remains.close(&self.key, core.stats());
        }
    }
}

/// Invoke the client's `close`, containing errors and panics.
pub(crate) fn close_handle<K: CacheKey>(
    key: &K,
    value: Option<&K::Value>,
    handle: &K::Handle,
    stats: &CacheStats,
) {
    stats.record_close();
    match panic::catch_unwind(AssertUnwindSafe(|| key.close(value, handle))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            stats.record_close_failure();
            warn!(error = %e, "Failed to close cache handle");
        }
        Err(_) => {
            stats.record_close_failure();
            warn!("Cache handle close panicked");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
