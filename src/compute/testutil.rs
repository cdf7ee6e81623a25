//! Counting key used by the engine's unit tests

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use super::key::CacheKey;

#[derive(Error, Debug)]
#[error("test key failure: {0}")]
pub(crate) struct TestError(&'static str);

/// Stands in for both the handle and the value
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Probe {
    pub(crate) id: u64,
}

/// Shared record of every callback a [`TestKey`] received
#[derive(Debug)]
pub(crate) struct Ledger {
    next_id: AtomicU64,
    allocations: AtomicUsize,
    generations: AtomicUsize,
    closes: AtomicUsize,
    closed_ids: Mutex<Vec<u64>>,
    value_valid: AtomicBool,
    handle_valid: AtomicBool,
    fail_allocate: AtomicBool,
    fail_generate: AtomicBool,
    fail_close: AtomicBool,
    panic_close: AtomicBool,
    alias: AtomicBool,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            allocations: AtomicUsize::new(0),
            generations: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            closed_ids: Mutex::new(Vec::new()),
            value_valid: AtomicBool::new(true),
            handle_valid: AtomicBool::new(true),
            fail_allocate: AtomicBool::new(false),
            fail_generate: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            panic_close: AtomicBool::new(false),
            alias: AtomicBool::new(false),
        }
    }
}

impl Ledger {
    pub(crate) fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub(crate) fn generations(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn closed_ids_unique(&self) -> bool {
        let mut ids = self.closed_ids.lock().clone();
        let len = ids.len();
        ids.sort_unstable();
        ids.dedup();
        ids.len() == len
    }

    pub(crate) fn set_value_valid(&self, valid: bool) {
        self.value_valid.store(valid, Ordering::SeqCst);
    }

    pub(crate) fn set_handle_valid(&self, valid: bool) {
        self.handle_valid.store(valid, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_allocate(&self, fail: bool) {
        self.fail_allocate.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_generate(&self, fail: bool) {
        self.fail_generate.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_panic_close(&self, panic: bool) {
        self.panic_close.store(panic, Ordering::SeqCst);
    }

    pub(crate) fn set_alias(&self, alias: bool) {
        self.alias.store(alias, Ordering::SeqCst);
    }
}

/// Key whose identity is its name; the ledger is shared bookkeeping
#[derive(Debug, Clone)]
pub(crate) struct TestKey {
    name: String,
    expiry: Duration,
    ledger: Arc<Ledger>,
}

impl TestKey {
    pub(crate) fn new(name: &str, ledger: Arc<Ledger>) -> Self {
        Self {
            name: name.to_string(),
            expiry: Duration::ZERO,
            ledger,
        }
    }

    pub(crate) fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }
}

impl PartialEq for TestKey {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for TestKey {}

impl Hash for TestKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl CacheKey for TestKey {
    type Handle = Probe;
    type Value = Probe;
    type Error = TestError;

    fn allocate(&self) -> Result<Probe, TestError> {
        if self.ledger.fail_allocate.load(Ordering::SeqCst) {
            return Err(TestError("allocate"));
        }
        self.ledger.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(Probe {
            id: self.ledger.next_id.fetch_add(1, Ordering::SeqCst),
        })
    }

    fn generate(&self, handle: &Arc<Probe>) -> Result<Arc<Probe>, TestError> {
        if self.ledger.fail_generate.load(Ordering::SeqCst) {
            return Err(TestError("generate"));
        }
        self.ledger.generations.fetch_add(1, Ordering::SeqCst);
        if self.ledger.alias.load(Ordering::SeqCst) {
            return Ok(Arc::clone(handle));
        }
        Ok(Arc::new(Probe { id: handle.id * 2 }))
    }

    fn validate(&self, value: Option<&Probe>, _handle: &Probe) -> bool {
        match value {
            Some(_) => self.ledger.value_valid.load(Ordering::SeqCst),
            None => self.ledger.handle_valid.load(Ordering::SeqCst),
        }
    }

    fn expiry(&self) -> Duration {
        self.expiry
    }

    fn close(&self, _value: Option<&Probe>, handle: &Probe) -> Result<(), TestError> {
        self.ledger.closes.fetch_add(1, Ordering::SeqCst);
        self.ledger.closed_ids.lock().push(handle.id);
        if self.ledger.panic_close.load(Ordering::SeqCst) {
            panic!("close exploded");
        }
        if self.ledger.fail_close.load(Ordering::SeqCst) {
            return Err(TestError("close"));
        }
        Ok(())
    }
}
