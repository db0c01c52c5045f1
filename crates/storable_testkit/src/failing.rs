//! A memory backend with injectable failures.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storable_core::{
    CoreError, CoreResult, DataSource, EntityDescriptor, IsolationLevel, MemoryBackend, StorageBackend, Transaction,
};
use tracing::debug;

/// Where a [`FailingBackend`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `activate`.
    Activate,
    /// `shutdown`.
    Shutdown,
    /// `open_data_source`.
    OpenDataSource,
    /// `begin`.
    Begin,
    /// `commit`.
    Commit,
    /// `rollback`.
    Rollback,
}

/// Wraps a [`MemoryBackend`] and fails the armed calls.
///
/// An armed call fails before it reaches the wrapped backend, except
/// `commit` and `rollback`, which first end the transaction in the wrapped
/// backend so no staged writes leak.
#[derive(Debug)]
pub struct FailingBackend {
    inner: MemoryBackend,
    armed: Mutex<HashMap<FailPoint, CoreError>>,
    shutdowns: AtomicUsize,
}

impl FailingBackend {
    /// A backend named `name` with nothing armed.
    pub fn new(name: &str) -> Self {
        Self {
            inner: MemoryBackend::new(name),
            armed: Mutex::new(HashMap::new()),
            shutdowns: AtomicUsize::new(0),
        }
    }

    /// Makes every call at `point` fail with `error`.
    pub fn fail(&self, point: FailPoint, error: CoreError) {
        self.armed.lock().insert(point, error);
    }

    /// Disarms `point`.
    pub fn heal(&self, point: FailPoint) {
        self.armed.lock().remove(&point);
    }

    /// Number of `shutdown` calls received, failed or not.
    pub fn shutdown_calls(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    fn check(&self, point: FailPoint) -> CoreResult<()> {
        match self.armed.lock().get(&point) {
            Some(error) => {
                debug!(backend = %self.inner.name(), ?point, "injected failure");
                Err(error.clone())
            }
            None => Ok(()),
        }
    }
}

impl StorageBackend for FailingBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn activate(&self) -> CoreResult<()> {
        self.check(FailPoint::Activate)?;
        self.inner.activate()
    }

    fn shutdown(&self, grace: Duration) -> CoreResult<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.check(FailPoint::Shutdown)?;
        self.inner.shutdown(grace)
    }

    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn is_transaction_supported(&self) -> bool {
        self.inner.is_transaction_supported()
    }

    fn open_data_source(&self, descriptor: Arc<EntityDescriptor>) -> CoreResult<Arc<dyn DataSource>> {
        self.check(FailPoint::OpenDataSource)?;
        self.inner.open_data_source(descriptor)
    }

    fn begin(&self, txn_id: &str, isolation: IsolationLevel) -> CoreResult<Transaction> {
        self.check(FailPoint::Begin)?;
        self.inner.begin(txn_id, isolation)
    }

    fn commit(&self, txn: &Transaction) -> CoreResult<()> {
        if let Err(e) = self.check(FailPoint::Commit) {
            let _ = self.inner.rollback(txn);
            return Err(e);
        }
        self.inner.commit(txn)
    }

    fn rollback(&self, txn: &Transaction) -> CoreResult<()> {
        let result = self.inner.rollback(txn);
        self.check(FailPoint::Rollback)?;
        result
    }
}
