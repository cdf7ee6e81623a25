//! Compute cache configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{DEFAULT_SWEEP_INTERVAL, RECLAIMER_THREAD_NAME};

/// Compute cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How often expired delayed references are demoted to eager ones
    pub sweep_interval: Duration,
    /// Name of the background reclamation thread
    pub thread_name: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            thread_name: RECLAIMER_THREAD_NAME.to_string(),
        }
    }
}

impl CacheConfig {
    /// Set the sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the reclamation thread name
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}
