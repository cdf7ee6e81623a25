//! Ready-made cache keys
//!
//! Concrete [`CacheKey`](crate::compute::CacheKey) implementations for
//! common build-environment probes.

mod file;

pub use file::{FileStamp, FileSummary, FileSummaryKey, OpenFile, ProbeError};
