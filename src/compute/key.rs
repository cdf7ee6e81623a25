//! Cache Key Contract
//!
//! The interface a client implements to describe one memoized computation:
//! how to open the unmanaged handle, how to derive a pure value from it, how
//! to tell whether either has gone stale, and how to release the handle.
//!
//! # Rules
//!
//! - Equal keys must describe the same computation. Two independently
//!   computed handle/value pairs for equal keys must be interchangeable.
//! - `Eq`/`Hash` must be stable for the lifetime of the key.
//! - The value must not keep the handle reachable. Returning the handle's
//!   own `Arc` from `generate` is rejected as a contract violation.
//! - `validate` must be cheap and must not panic.
//! - `close` is called exactly once per successfully allocated handle.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// A memoizable computation backed by a closeable handle
pub trait CacheKey: Eq + Hash + Clone + Send + Sync + 'static {
    /// Unmanaged resource (open file, process, session)
    type Handle: Send + Sync + 'static;

    /// Pure value derived from a handle
    type Value: Send + Sync + 'static;

    /// Failure raised by `allocate`, `generate` or `close`
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open the unmanaged resource for this key.
    ///
    /// On failure the entry for this key is abandoned and the error is handed
    /// to the caller of `get`.
    fn allocate(&self) -> Result<Self::Handle, Self::Error>;

    /// Derive the cacheable value from `handle`.
    ///
    /// On failure the handle is closed and the entry is abandoned.
    fn generate(&self, handle: &Arc<Self::Handle>) -> Result<Arc<Self::Value>, Self::Error>;

    /// Whether the given state is still usable.
    ///
    /// Called with `value = None` to check the handle alone, e.g. after the
    /// value was reclaimed or failed validation.
    fn validate(&self, value: Option<&Self::Value>, handle: &Self::Handle) -> bool;

    /// How long an accessed value is kept alive without outside references.
    ///
    /// Zero means the value is dropped as soon as no caller holds it.
    fn expiry(&self) -> Duration {
        Duration::ZERO
    }

    /// Release the handle's unmanaged state.
    ///
    /// Errors are logged and otherwise ignored.
    fn close(&self, value: Option<&Self::Value>, handle: &Self::Handle) -> Result<(), Self::Error>;
}

/// Reject a generated value that shares the handle's allocation.
pub(crate) fn is_aliased<H, V>(handle: &Arc<H>, value: &Arc<V>) -> bool {
    // The Arc block holds the counts, so even zero-sized payloads get a
    // distinct address per allocation
    std::ptr::eq(
        Arc::as_ptr(handle).cast::<()>(),
        Arc::as_ptr(value).cast::<()>(),
    )
}
