//! Compute Cache - memoized derived values over closeable handles
//!
//! A generic cache for expensive derived values (parsed metadata, probed tool
//! locations, decoded resources) computed from an unmanaged handle such as
//! an open file or process. The value may be dropped and cheaply recomputed
//! from the still-open handle; the handle is closed exactly once, after
//! nothing can reach it any more.
//!
//! # Architecture
//!
//! ```text
//! caller ──get(key)──▶ ComputeCache ──per-key lock──▶ allocate / generate / validate
//!                          ▲
//!                          └── Reclaimer thread ◀── notices from dropped values
//! ```
//!
//! # Modules
//!
//! - [`compute`] - Cache engine, key contract, reclamation
//! - [`error`] - Error types
//! - [`probe`] - Ready-made keys (file summaries)

pub mod compute;
pub mod error;
pub mod probe;

// Re-export commonly used types
pub use compute::{CacheConfig, CacheKey, Cached, ComputeCache, StatsSnapshot};
pub use error::{ContractViolation, Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
