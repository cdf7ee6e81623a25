//! File Summary Probe
//!
//! Keeps a file open as the handle and caches a summary of its contents as
//! the value. An in-place rewrite invalidates the summary but keeps the
//! handle; replacing the file at its path invalidates the handle too.

use std::fs::{File, Metadata};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use thiserror::Error;
use tracing::trace;

use crate::compute::CacheKey;

/// Errors raised while probing a file
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The file could not be opened
    #[error("Failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The open file could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Identity and freshness of a file as seen through some metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
    /// Inode on unix; zero elsewhere
    identity: u64,
}

impl FileStamp {
    fn of(meta: &Metadata) -> Self {
        #[cfg(unix)]
        let identity = std::os::unix::fs::MetadataExt::ino(meta);
        #[cfg(not(unix))]
        let identity = 0;

        Self {
            len: meta.len(),
            modified: meta.modified().ok(),
            identity,
        }
    }
}

/// Open file backing a [`FileSummary`]
#[derive(Debug)]
pub struct OpenFile {
    file: File,
}

impl OpenFile {
    fn stamp(&self) -> io::Result<FileStamp> {
        self.file.metadata().map(|meta| FileStamp::of(&meta))
    }
}

/// Parsed summary of a file's contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    pub bytes: u64,
    pub lines: u64,
    pub digest: u64,
    #[serde(skip)]
    stamp: FileStamp,
}

/// Cache key describing "summarize the file at this path"
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileSummaryKey {
    path: PathBuf,
    expiry: Duration,
}

impl FileSummaryKey {
    /// Create a key whose summary is dropped as soon as it is unused
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            expiry: Duration::ZERO,
        }
    }

    /// Keep the summary cached for `expiry` after each access
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    /// Path being summarized
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_error(&self, source: io::Error) -> ProbeError {
        ProbeError::Read {
            path: self.path.clone(),
            source,
        }
    }
}

impl CacheKey for FileSummaryKey {
    type Handle = OpenFile;
    type Value = FileSummary;
    type Error = ProbeError;

    fn allocate(&self) -> Result<OpenFile, ProbeError> {
        let file = File::open(&self.path).map_err(|source| ProbeError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(OpenFile { file })
    }

    fn generate(&self, handle: &Arc<OpenFile>) -> Result<Arc<FileSummary>, ProbeError> {
        let mut reader = &handle.file;
        reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| self.read_error(e))?;
        let mut contents = Vec::new();
        reader
            .read_to_end(&mut contents)
            .map_err(|e| self.read_error(e))?;
        let stamp = handle.stamp().map_err(|e| self.read_error(e))?;

        Ok(Arc::new(FileSummary {
            bytes: contents.len() as u64,
            lines: contents.iter().filter(|&&b| b == b'\n').count() as u64,
            digest: fx_hash(&contents),
            stamp,
        }))
    }

    fn validate(&self, value: Option<&FileSummary>, handle: &OpenFile) -> bool {
        let Ok(current) = std::fs::metadata(&self.path).map(|meta| FileStamp::of(&meta)) else {
            return false;
        };
        match value {
            Some(summary) => summary.stamp == current,
            // The path must still name the file we hold open
            None => handle.stamp().map_or(false, |open| open == current),
        }
    }

    fn expiry(&self) -> Duration {
        self.expiry
    }

    fn close(&self, _value: Option<&FileSummary>, _handle: &OpenFile) -> Result<(), ProbeError> {
        // The descriptor itself is released when the last handle reference drops
        trace!(path = %self.path.display(), "Closing probed file");
        Ok(())
    }
}

/// Fast non-cryptographic hash (FxHash algorithm)
fn fx_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

// =============================================================================
// Tests
// =============================================================================
