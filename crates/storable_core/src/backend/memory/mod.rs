//! In-memory storage backend.

mod table;

use crate::backend::traits::{DataSource, RecordCursor, StorageBackend};
use crate::backend::transaction::Transaction;
use crate::cache::CacheHandle;
use crate::error::{CoreError, CoreResult};
use crate::key::{Filter, Key};
use crate::metadata::EntityDescriptor;
use crate::types::IsolationLevel;
use crate::value::Record;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use table::{Applied, Mutation, Table};
use tracing::debug;

/// Writes of one open transaction.
#[derive(Debug, Default)]
struct StagedTransaction {
    /// Private copies of the tables the transaction wrote to.
    tables: HashMap<String, Table>,
    /// Mutations in execution order, replayed on commit.
    log: Vec<(Arc<EntityDescriptor>, Mutation)>,
    /// Cache entries to drop again once the writes are visible.
    touched: Vec<(CacheHandle, Record)>,
}

/// State shared by a backend and its read-only replicas.
#[derive(Debug, Default)]
struct MemoryInner {
    tables: RwLock<HashMap<String, Table>>,
    transactions: Mutex<HashMap<String, StagedTransaction>>,
}

/// An in-memory, transactional storage backend.
///
/// Suitable for:
/// - Unit and integration tests
/// - Ephemeral stores that don't need persistence
///
/// # Transactions
///
/// A transaction writes to private copies of the tables it touches, so its
/// own reads see its writes while other callers see only committed data.
/// Commit replays the transaction's writes against the live tables,
/// re-checking every uniqueness constraint, and publishes the result
/// atomically. Rollback discards the copies.
///
/// # Caching
///
/// Outside a transaction, reads populate the cache on a miss and writes
/// are written through. Inside a transaction, reads bypass the cache and
/// writes only invalidate it.
///
/// # Thread Safety
///
/// All state sits behind locks. When both are needed, the transaction
/// lock is taken before the table lock.
#[derive(Debug)]
pub struct MemoryBackend {
    name: String,
    inner: Arc<MemoryInner>,
    read_only: bool,
    active: AtomicBool,
}

impl MemoryBackend {
    /// Creates an empty read-write backend.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(MemoryInner::default()),
            read_only: false,
            active: AtomicBool::new(false),
        }
    }

    /// Creates a read-only replica sharing `primary`'s data.
    ///
    /// Writes through the replica fail with `IllegalState`.
    #[must_use]
    pub fn replica_of(primary: &MemoryBackend, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::clone(&primary.inner),
            read_only: true,
            active: AtomicBool::new(false),
        }
    }

    /// Returns true for replicas.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Number of committed rows of an entity.
    #[must_use]
    pub fn row_count(&self, entity: &str) -> usize {
        self.inner.tables.read().get(entity).map_or(0, Table::len)
    }

    /// Number of open transactions.
    #[must_use]
    pub fn open_transactions(&self) -> usize {
        self.inner.transactions.lock().len()
    }

    fn ensure_active(&self) -> CoreResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CoreError::illegal_state(format!(
                "backend {} is not active",
                self.name
            )))
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn activate(&self) -> CoreResult<()> {
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self, _grace: Duration) -> CoreResult<()> {
        // Nothing in flight outlives a call; open transactions are dropped.
        self.active.store(false, Ordering::SeqCst);
        if !self.read_only {
            self.inner.transactions.lock().clear();
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn is_transaction_supported(&self) -> bool {
        !self.read_only
    }

    fn open_data_source(&self, descriptor: Arc<EntityDescriptor>) -> CoreResult<Arc<dyn DataSource>> {
        self.ensure_active()?;
        Ok(Arc::new(MemoryDataSource {
            backend: self.name.clone(),
            inner: Arc::clone(&self.inner),
            descriptor,
            read_only: self.read_only,
            closed: AtomicBool::new(false),
        }))
    }

    fn begin(&self, txn_id: &str, isolation: IsolationLevel) -> CoreResult<Transaction> {
        self.ensure_active()?;
        if self.read_only {
            return Err(CoreError::unsupported(format!(
                "backend {} is read-only",
                self.name
            )));
        }
        let mut transactions = self.inner.transactions.lock();
        if transactions.contains_key(txn_id) {
            return Err(CoreError::transaction(format!(
                "transaction {txn_id} already exists"
            )));
        }
        transactions.insert(txn_id.to_string(), StagedTransaction::default());
        debug!(backend = %self.name, txn = txn_id, "transaction started");
        Ok(Transaction::new(txn_id, isolation, &self.name))
    }

    fn commit(&self, txn: &Transaction) -> CoreResult<()> {
        self.ensure_active()?;
        let staged = self
            .inner
            .transactions
            .lock()
            .remove(txn.id())
            .ok_or_else(|| CoreError::transaction(format!("unknown transaction {}", txn.id())))?;

        {
            let mut tables = self.inner.tables.write();
            let mut working: HashMap<String, Table> = HashMap::new();
            for (descriptor, mutation) in &staged.log {
                let table = working
                    .entry(descriptor.name().to_string())
                    .or_insert_with(|| {
                        tables
                            .get(descriptor.name())
                            .cloned()
                            .unwrap_or_else(|| Table::new(Arc::clone(descriptor)))
                    });
                table.apply(mutation).map_err(|e| {
                    CoreError::transaction(format!("commit of {} failed: {e}", txn.id()))
                })?;
            }
            tables.extend(working);
        }

        for (cache, record) in &staged.touched {
            cache.invalidate(record);
        }
        debug!(backend = %self.name, txn = txn.id(), writes = staged.log.len(), "transaction committed");
        Ok(())
    }

    fn rollback(&self, txn: &Transaction) -> CoreResult<()> {
        let staged = self.inner.transactions.lock().remove(txn.id());
        match staged {
            Some(staged) => {
                debug!(backend = %self.name, txn = txn.id(), discarded = staged.log.len(), "transaction rolled back");
                Ok(())
            }
            None => Err(CoreError::transaction(format!(
                "unknown transaction {}",
                txn.id()
            ))),
        }
    }
}

/// Data source of one entity in a [`MemoryBackend`].
#[derive(Debug)]
struct MemoryDataSource {
    backend: String,
    inner: Arc<MemoryInner>,
    descriptor: Arc<EntityDescriptor>,
    read_only: bool,
    closed: AtomicBool,
}

impl MemoryDataSource {
    fn entity(&self) -> &str {
        self.descriptor.name()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::illegal_state(format!(
                "data source for {} is closed",
                self.entity()
            )));
        }
        Ok(())
    }

    /// Runs `f` against the table as the transaction (or the world) sees it.
    fn read<R>(&self, txn: Option<&Transaction>, f: impl FnOnce(&Table) -> CoreResult<R>) -> CoreResult<R> {
        self.ensure_open()?;
        if let Some(txn) = txn {
            txn.ensure_active()?;
            let transactions = self.inner.transactions.lock();
            if let Some(table) = transactions
                .get(txn.id())
                .and_then(|staged| staged.tables.get(self.entity()))
            {
                return f(table);
            }
        }
        let tables = self.inner.tables.read();
        match tables.get(self.entity()) {
            Some(table) => f(table),
            None => f(&Table::new(Arc::clone(&self.descriptor))),
        }
    }

    fn write(&self, txn: Option<&Transaction>, cache: &CacheHandle, mutation: Mutation) -> CoreResult<Applied> {
        self.ensure_open()?;
        if self.read_only {
            return Err(CoreError::illegal_state(format!(
                "backend {} is read-only",
                self.backend
            )));
        }

        let Some(txn) = txn else {
            let applied = {
                let mut tables = self.inner.tables.write();
                tables
                    .entry(self.entity().to_string())
                    .or_insert_with(|| Table::new(Arc::clone(&self.descriptor)))
                    .apply(&mutation)?
            };
            for record in &applied.before {
                cache.invalidate(record);
            }
            for record in &applied.after {
                cache.add(record);
            }
            return Ok(applied);
        };

        txn.ensure_active()?;
        let mut transactions = self.inner.transactions.lock();
        let staged = transactions.get_mut(txn.id()).ok_or_else(|| {
            CoreError::illegal_state(format!(
                "transaction {} is unknown to backend {}",
                txn.id(),
                self.backend
            ))
        })?;
        let table = staged
            .tables
            .entry(self.entity().to_string())
            .or_insert_with(|| {
                self.inner
                    .tables
                    .read()
                    .get(self.entity())
                    .cloned()
                    .unwrap_or_else(|| Table::new(Arc::clone(&self.descriptor)))
            });
        let applied = table.apply(&mutation)?;
        staged.log.push((Arc::clone(&self.descriptor), mutation));
        for record in applied.before.iter().chain(&applied.after) {
            cache.invalidate(record);
            staged.touched.push((cache.clone(), record.clone()));
        }
        Ok(applied)
    }

    fn single(applied: Applied) -> CoreResult<Record> {
        applied
            .after
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::illegal_state("write produced no record"))
    }
}

impl DataSource for MemoryDataSource {
    fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    fn create(&self, txn: Option<&Transaction>, cache: &CacheHandle, records: Vec<Record>) -> CoreResult<Vec<Record>> {
        Ok(self.write(txn, cache, Mutation::Create(records))?.after)
    }

    fn save(&self, txn: Option<&Transaction>, cache: &CacheHandle, record: Record) -> CoreResult<Record> {
        Self::single(self.write(txn, cache, Mutation::Save(record))?)
    }

    // The manager consults the cache before calling in; a call here is a miss.
    fn fetch(&self, txn: Option<&Transaction>, cache: &CacheHandle, key: &Key) -> CoreResult<Option<Record>> {
        let found = self.read(txn, |table| Ok(table.get(key)?.cloned()))?;
        if txn.is_none() {
            if let Some(record) = &found {
                cache.add(record);
            }
        }
        Ok(found)
    }

    fn contains(&self, txn: Option<&Transaction>, _cache: &CacheHandle, key: &Key) -> CoreResult<bool> {
        self.read(txn, |table| Ok(table.locate(key)?.is_some()))
    }

    fn update(&self, txn: Option<&Transaction>, cache: &CacheHandle, key: &Key, record: Record) -> CoreResult<Record> {
        Self::single(self.write(txn, cache, Mutation::Update(key.clone(), record))?)
    }

    fn patch(&self, txn: Option<&Transaction>, cache: &CacheHandle, key: &Key, changes: Record) -> CoreResult<Record> {
        Self::single(self.write(txn, cache, Mutation::Patch(key.clone(), changes))?)
    }

    fn delete(&self, txn: Option<&Transaction>, cache: &CacheHandle, key: &Key) -> CoreResult<Option<Record>> {
        Ok(self
            .write(txn, cache, Mutation::Delete(key.clone()))?
            .before
            .into_iter()
            .next())
    }

    fn cursor(&self, txn: Option<&Transaction>, _cache: &CacheHandle, filter: &Filter) -> CoreResult<RecordCursor> {
        let rows: Vec<Record> = self.read(txn, |table| Ok(table.scan(filter).cloned().collect()))?;
        Ok(Box::new(rows.into_iter().map(Ok)))
    }

    fn count(&self, txn: Option<&Transaction>, _cache: &CacheHandle, filter: &Filter) -> CoreResult<u64> {
        self.read(txn, |table| Ok(table.scan(filter).count() as u64))
    }

    fn close(&self) -> CoreResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
