//! Background Reclamation
//!
//! One thread per engine core. It has two duties:
//!
//! - Drain the reclamation queue. A notice whose generation is still the
//!   entry's current value retires the entry and closes its handle. Stale
//!   notices (a newer generation already replaced the value) are dropped.
//! - Every sweep interval, demote delayed references past their deadline so
//!   their values can be reclaimed, and unlink entries whose value is already
//!   gone but whose notice has not arrived yet. The notice does the close.
//!
//! Shutdown stops the thread, handles whatever is left in the queue, then
//! closes every handle still owned by an entry.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, error, info, instrument, trace};

use super::engine::Core;
use super::key::CacheKey;
use super::reference::Reclaimed;

/// Floor for the sweep interval so a zero setting cannot spin
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to a running reclamation thread
pub(crate) struct Reclaimer {
    /// Dropping this wakes and stops the thread
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

impl Reclaimer {
    /// Start the thread for `core`.
    ///
    /// If the OS refuses a new thread the cache keeps working; handles are
    /// then only closed by invalidation and shutdown.
    pub(crate) fn spawn<K: CacheKey>(core: &Arc<Core<K>>) -> Option<Self> {
        let (stop_tx, stop_rx) = channel::bounded(0);
        let worker = Arc::clone(core);
        let spawned = thread::Builder::new()
            .name(core.config.thread_name.clone())
            .spawn(move || run(worker, stop_rx));

        match spawned {
            Ok(thread) => Some(Self { stop_tx, thread }),
            Err(e) => {
                error!(error = %e, "Failed to spawn reclamation thread");
                None
            }
        }
    }

    /// Interrupt the thread and wait for it to exit.
    pub(crate) fn stop(self) {
        drop(self.stop_tx);
        if self.thread.join().is_err() {
            error!("Reclamation thread panicked");
        }
    }
}

fn run<K: CacheKey>(core: Arc<Core<K>>, stop_rx: Receiver<()>) {
    let interval = core.config.sweep_interval.max(MIN_SWEEP_INTERVAL);
    info!(?interval, "Starting reclamation thread");

    let mut next_sweep = Instant::now() + interval;
    loop {
        let timeout = next_sweep.saturating_duration_since(Instant::now());
        channel::select! {
            recv(core.queue_rx) -> notice => {
                if let Ok(notice) = notice {
                    core.reclaim(notice);
                }
            }
            recv(stop_rx) -> _ => break,
            default(timeout) => {}
        }

        let now = Instant::now();
        if now >= next_sweep {
            core.sweep(now);
            next_sweep = now + interval;
        }
    }

    info!("Reclamation thread stopped");
}

impl<K: CacheKey> Core<K> {
    /// Handle one reclamation notice.
    pub(crate) fn reclaim(&self, notice: Reclaimed<K>) {
        let entry = notice.entry;
        let mut state = entry.lock();
        if !state.is_current(notice.generation) {
            trace!(
                entry = entry.id(),
                generation = notice.generation,
                "Ignoring superseded reclamation notice"
            );
            return;
        }

        let remains = state.retire();
        self.unlink(&entry);
        self.orphans.remove(&entry.id());
        if let Some(remains) = remains {
            self.stats().record_reclamation();
            debug!(entry = entry.id(), "Value reclaimed, closing handle");
            remains.close(entry.key(), self.stats());
        }
    }

    /// Periodic pass over live entries.
    pub(crate) fn sweep(&self, now: Instant) {
        let mut demoted = 0usize;
        let mut orphaned = 0usize;

        for entry in self.entries() {
            // Entries busy in a client callback are fresh by definition
            let Some(mut state) = entry.try_lock() else {
                continue;
            };
            if state.is_retired() {
                continue;
            }
            if state.demote_if_expired(now) {
                self.stats().record_demotion();
                demoted += 1;
            } else if state.is_orphaned() {
                // The drop hook is still on its way; its notice closes the handle
                state.mark_retired();
                self.unlink(&entry);
                self.orphans.insert(entry.id(), Arc::clone(&entry));
                orphaned += 1;
            }
        }

        if demoted > 0 || orphaned > 0 {
            debug!(demoted, orphaned, "Swept cache entries");
        }
    }

    /// Close everything this core owns. Idempotent.
    #[instrument(skip_all)]
    pub(crate) fn shutdown(&self, reclaimer: Option<Reclaimer>) {
        if self.mark_closed() {
            return;
        }
        if let Some(reclaimer) = reclaimer {
            reclaimer.stop();
        }

        while let Ok(notice) = self.queue_rx.try_recv() {
            self.reclaim(notice);
        }

        let mut closed = 0usize;
        for entry in self.entries() {
            let mut state = entry.lock();
            if state.is_retired() {
                continue;
            }
            if let Some(remains) = state.retire() {
                remains.close(entry.key(), self.stats());
                closed += 1;
            }
        }

        let orphans: Vec<_> = self.orphans.iter().map(|e| Arc::clone(e.value())).collect();
        for entry in orphans {
            if let Some(remains) = entry.lock().retire() {
                remains.close(entry.key(), self.stats());
                closed += 1;
            }
        }

        self.map.clear();
        self.orphans.clear();
        // Notices from the references dropped above are all superseded
        while self.queue_rx.try_recv().is_ok() {}

        info!(closed, "Compute cache shut down");
    }
}

// =============================================================================
// Tests
// =============================================================================
