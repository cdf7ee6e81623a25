//! Error types for the compute cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T, E> = std::result::Result<T, Error<E>>;

/// Ways a [`CacheKey`](crate::compute::CacheKey) implementation can break its contract
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractViolation {
    /// `generate` returned the handle's own allocation as the value
    #[error("generate() returned a value aliasing its handle")]
    Aliased,
}

/// Errors returned by [`ComputeCache::get`](crate::compute::ComputeCache::get)
#[derive(Error, Debug)]
pub enum Error<E> {
    /// `allocate` or `generate` failed; passed through verbatim
    #[error(transparent)]
    Client(E),

    /// The key implementation violated the cache contract
    #[error("Cache key contract violation: {0}")]
    ContractViolation(#[from] ContractViolation),

    /// The cache has been shut down
    #[error("Compute cache is closed")]
    Closed,
}

impl<E> Error<E> {
    /// Returns the client error, if this is one
    pub fn into_client(self) -> Option<E> {
        match self {
            Error::Client(e) => Some(e),
            _ => None,
        }
    }

    /// Check if this error is a contract violation
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::ContractViolation(_))
    }
}
