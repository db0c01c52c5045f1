//! A backend wrapper that records every call it forwards.
//!
//! Used to assert that a check happened before the backend was reached,
//! or that an operation never reached it at all.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use storable_core::{
    CacheHandle, CoreResult, DataSource, EntityDescriptor, Filter, IsolationLevel, Key, Record, RecordCursor,
    StorageBackend, Transaction,
};

type CallLog = Arc<Mutex<Vec<String>>>;

/// Forwards to an inner backend, logging `"<op> <entity>"` per call.
#[derive(Debug)]
pub struct RecordingBackend {
    inner: Arc<dyn StorageBackend>,
    calls: CallLog,
}

impl RecordingBackend {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Calls so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Calls whose operation is `op`.
    pub fn calls_to(&self, op: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.split(' ').next() == Some(op))
            .count()
    }

    /// Forgets the calls so far.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

impl StorageBackend for RecordingBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn activate(&self) -> CoreResult<()> {
        self.record("activate");
        self.inner.activate()
    }

    fn shutdown(&self, grace: Duration) -> CoreResult<()> {
        self.record("shutdown");
        self.inner.shutdown(grace)
    }

    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn is_transaction_supported(&self) -> bool {
        self.inner.is_transaction_supported()
    }

    fn open_data_source(&self, descriptor: Arc<EntityDescriptor>) -> CoreResult<Arc<dyn DataSource>> {
        self.record(format!("open {}", descriptor.name()));
        let inner = self.inner.open_data_source(descriptor)?;
        Ok(Arc::new(RecordingSource {
            inner,
            calls: Arc::clone(&self.calls),
        }))
    }

    fn begin(&self, txn_id: &str, isolation: IsolationLevel) -> CoreResult<Transaction> {
        self.record("begin");
        self.inner.begin(txn_id, isolation)
    }

    fn commit(&self, txn: &Transaction) -> CoreResult<()> {
        self.record("commit");
        self.inner.commit(txn)
    }

    fn rollback(&self, txn: &Transaction) -> CoreResult<()> {
        self.record("rollback");
        self.inner.rollback(txn)
    }
}

#[derive(Debug)]
struct RecordingSource {
    inner: Arc<dyn DataSource>,
    calls: CallLog,
}

impl RecordingSource {
    fn record(&self, op: &str) {
        let call = format!("{op} {}", self.inner.descriptor().name());
        self.calls.lock().push(call);
    }
}

impl DataSource for RecordingSource {
    fn descriptor(&self) -> &Arc<EntityDescriptor> {
        self.inner.descriptor()
    }

    fn create(&self, txn: Option<&Transaction>, cache: &CacheHandle, records: Vec<Record>) -> CoreResult<Vec<Record>> {
        self.record("create");
        self.inner.create(txn, cache, records)
    }

    fn save(&self, txn: Option<&Transaction>, cache: &CacheHandle, record: Record) -> CoreResult<Record> {
        self.record("save");
        self.inner.save(txn, cache, record)
    }

    fn fetch(&self, txn: Option<&Transaction>, cache: &CacheHandle, key: &Key) -> CoreResult<Option<Record>> {
        self.record("fetch");
        self.inner.fetch(txn, cache, key)
    }

    fn contains(&self, txn: Option<&Transaction>, cache: &CacheHandle, key: &Key) -> CoreResult<bool> {
        self.record("contains");
        self.inner.contains(txn, cache, key)
    }

    fn update(&self, txn: Option<&Transaction>, cache: &CacheHandle, key: &Key, record: Record) -> CoreResult<Record> {
        self.record("update");
        self.inner.update(txn, cache, key, record)
    }

    fn patch(&self, txn: Option<&Transaction>, cache: &CacheHandle, key: &Key, changes: Record) -> CoreResult<Record> {
        self.record("patch");
        self.inner.patch(txn, cache, key, changes)
    }

    fn delete(&self, txn: Option<&Transaction>, cache: &CacheHandle, key: &Key) -> CoreResult<Option<Record>> {
        self.record("delete");
        self.inner.delete(txn, cache, key)
    }

    fn cursor(&self, txn: Option<&Transaction>, cache: &CacheHandle, filter: &Filter) -> CoreResult<RecordCursor> {
        self.record("cursor");
        self.inner.cursor(txn, cache, filter)
    }

    fn count(&self, txn: Option<&Transaction>, cache: &CacheHandle, filter: &Filter) -> CoreResult<u64> {
        self.record("count");
        self.inner.count(txn, cache, filter)
    }

    fn close(&self) -> CoreResult<()> {
        self.record("close");
        self.inner.close()
    }
}
