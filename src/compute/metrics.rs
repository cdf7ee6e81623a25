//! Cache Metrics Collection
//!
//! Counters describing how the engine serves requests and reclaims handles.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheStats {
    // Retrieval
    hits: AtomicU64,
    allocations: AtomicU64,
    regenerations: AtomicU64,
    reallocations: AtomicU64,
    contract_violations: AtomicU64,

    // Reference strength
    promotions: AtomicU64,
    demotions: AtomicU64,

    // Retirement
    invalidations: AtomicU64,
    reclamations: AtomicU64,
    closes: AtomicU64,
    close_failures: AtomicU64,
}

impl CacheStats {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Value served without calling `generate`
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Handle opened by `allocate`
    pub fn record_allocation(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Value rebuilt from an existing handle
    pub fn record_regeneration(&self) {
        self.regenerations.fetch_add(1, Ordering::Relaxed);
    }

    /// Stale handle closed and replaced
    pub fn record_reallocation(&self) {
        self.reallocations.fetch_add(1, Ordering::Relaxed);
    }

    /// `generate` broke the key contract
    pub fn record_contract_violation(&self) {
        self.contract_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Eager reference made delayed again
    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    /// Expired delayed reference made eager
    pub fn record_demotion(&self) {
        self.demotions.fetch_add(1, Ordering::Relaxed);
    }

    /// Entry retired by `invalidate`/`invalidate_if`
    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Entry retired after its value became unreachable
    pub fn record_reclamation(&self) {
        self.reclamations.fetch_add(1, Ordering::Relaxed);
    }

    /// Client `close` invoked
    pub fn record_close(&self) {
        self.closes.fetch_add(1, Ordering::Relaxed);
    }

    /// Client `close` returned an error or panicked
    pub fn record_close_failure(&self) {
        self.close_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests served from cache
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Handles opened
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Values rebuilt from an existing handle
    pub fn regenerations(&self) -> u64 {
        self.regenerations.load(Ordering::Relaxed)
    }

    /// Handles replaced after failing validation
    pub fn reallocations(&self) -> u64 {
        self.reallocations.load(Ordering::Relaxed)
    }

    /// Handles closed, including failed closes
    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::Relaxed)
    }

    /// Closes that errored or panicked
    pub fn close_failures(&self) -> u64 {
        self.close_failures.load(Ordering::Relaxed)
    }

    /// Fraction of requests served without calling `generate`
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.allocations() as f64 + self.regenerations() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Take a point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits(),
            allocations: self.allocations(),
            regenerations: self.regenerations(),
            reallocations: self.reallocations(),
            contract_violations: self.contract_violations.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            demotions: self.demotions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            reclamations: self.reclamations.load(Ordering::Relaxed),
            closes: self.closes(),
            close_failures: self.close_failures(),
            hit_ratio: self.hit_ratio(),
        }
    }
}

/// Serializable copy of [`CacheStats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub allocations: u64,
    pub regenerations: u64,
    pub reallocations: u64,
    pub contract_violations: u64,
    pub promotions: u64,
    pub demotions: u64,
    pub invalidations: u64,
    pub reclamations: u64,
    pub closes: u64,
    pub close_failures: u64,
    pub hit_ratio: f64,
}

impl StatsSnapshot {
    /// Handles allocated but not yet closed
    pub fn open_handles(&self) -> u64 {
        (self.allocations).saturating_sub(self.closes)
    }
}

// =============================================================================
// Tests
// =============================================================================
