//! Compute-Result Cache
//!
//! Memoizes values derived from unmanaged, explicitly closed handles, keeping
//! the lifetime of the handle separate from the lifetime of the value.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           ComputeCache<K>                            │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  DashMap<K, Arc<Entry>>          Reclamation queue (crossbeam)       │
//! │  ┌────────────────────────┐      ┌──────────────────────────────┐    │
//! │  │ Entry (per-key Mutex)  │      │ notices from dropped values  │    │
//! │  │  handle                │◀─────│  (entry, generation)         │    │
//! │  │  delayed/eager value   │      └──────────────┬───────────────┘    │
//! │  │  deadline              │                     │                    │
//! │  └────────────────────────┘      ┌──────────────▼───────────────┐    │
//! │                                  │ Reclaimer thread             │    │
//! │                                  │  close orphaned handles      │    │
//! │                                  │  demote expired references   │    │
//! │                                  └──────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Reclamation model
//!
//! A value is held *delayed* (strongly by its entry) while inside its
//! expiry window and *eager* (weakly) after the periodic sweep demotes it.
//! Once an eager value is released by every caller, its drop hook queues a
//! notice. The reclaimer then retires the entry and closes the handle,
//! unless a newer value generation has replaced it in the meantime.
//!
//! Reclamation timing follows caller drops and the sweep interval, not
//! memory pressure. Only the contract is guaranteed:
//!
//! - concurrent `get`s of one key share a single computation
//! - every allocated handle is closed exactly once
//! - failed construction never leaves an entry behind

mod config;
mod engine;
mod entry;
mod key;
mod metrics;
mod reclaimer;
mod reference;

#[cfg(test)]
mod testutil;

pub use config::CacheConfig;
pub use engine::ComputeCache;
pub use entry::Phase;
pub use key::CacheKey;
pub use metrics::{CacheStats, StatsSnapshot};
pub use reference::Cached;

use std::time::Duration;

/// Default interval between reclamation sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default name of the reclamation thread
pub const RECLAIMER_THREAD_NAME: &str = "compute-cache-reclaimer";
