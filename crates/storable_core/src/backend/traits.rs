//! Storage backend contracts.

use crate::backend::transaction::Transaction;
use crate::cache::CacheHandle;
use crate::error::{CoreError, CoreResult};
use crate::key::{Filter, Key};
use crate::metadata::EntityDescriptor;
use crate::types::IsolationLevel;
use crate::value::Record;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Stream of records produced by a cursor.
pub type RecordCursor = Box<dyn Iterator<Item = CoreResult<Record>> + Send>;

/// A storage technology adapter.
///
/// One instance serves one provider of one storage unit. Implementations
/// are internally synchronized; every method takes `&self`.
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Provider name, unique within the registry.
    fn name(&self) -> &str;

    /// Prepares the backend for use.
    fn activate(&self) -> CoreResult<()>;

    /// Releases resources, waiting up to `grace` for in-flight work.
    fn shutdown(&self, grace: Duration) -> CoreResult<()>;

    /// Returns true between a successful `activate` and `shutdown`.
    fn is_active(&self) -> bool;

    /// Returns true if `begin`, `commit` and `rollback` are implemented.
    fn is_transaction_supported(&self) -> bool {
        false
    }

    /// Opens a data source for one entity type.
    fn open_data_source(&self, descriptor: Arc<EntityDescriptor>) -> CoreResult<Arc<dyn DataSource>>;

    /// Starts a transaction.
    fn begin(&self, txn_id: &str, isolation: IsolationLevel) -> CoreResult<Transaction> {
        let _ = (txn_id, isolation);
        Err(CoreError::unsupported(format!(
            "backend {} does not support transactions",
            self.name()
        )))
    }

    /// Commits a transaction.
    fn commit(&self, txn: &Transaction) -> CoreResult<()> {
        let _ = txn;
        Err(CoreError::unsupported(format!(
            "backend {} does not support transactions",
            self.name()
        )))
    }

    /// Rolls a transaction back.
    fn rollback(&self, txn: &Transaction) -> CoreResult<()> {
        let _ = txn;
        Err(CoreError::unsupported(format!(
            "backend {} does not support transactions",
            self.name()
        )))
    }
}

/// Record-level access to one entity type in one backend.
///
/// Every call carries the transaction it runs in (if any) and the cache
/// handle of the entity, so the backend decides when to populate, update or
/// bypass the cache. Records passed in have canonical field names and
/// already-enforced metadata fields.
pub trait DataSource: Send + Sync + fmt::Debug {
    /// Descriptor of the entity.
    fn descriptor(&self) -> &Arc<EntityDescriptor>;

    /// Inserts records, all or nothing.
    ///
    /// Fails with `KeyViolation` if any record collides with a stored one
    /// or with another record of the batch.
    fn create(
        &self,
        txn: Option<&Transaction>,
        cache: &CacheHandle,
        records: Vec<Record>,
    ) -> CoreResult<Vec<Record>>;

    /// Inserts or replaces a record by its primary key.
    fn save(&self, txn: Option<&Transaction>, cache: &CacheHandle, record: Record) -> CoreResult<Record>;

    /// Reads a record.
    fn fetch(&self, txn: Option<&Transaction>, cache: &CacheHandle, key: &Key) -> CoreResult<Option<Record>>;

    /// Returns true if a record exists for the key.
    fn contains(&self, txn: Option<&Transaction>, cache: &CacheHandle, key: &Key) -> CoreResult<bool>;

    /// Replaces the record addressed by `key`. Fails with `NotFound`.
    fn update(
        &self,
        txn: Option<&Transaction>,
        cache: &CacheHandle,
        key: &Key,
        record: Record,
    ) -> CoreResult<Record>;

    /// Overlays `changes` onto the record addressed by `key`. Fails with `NotFound`.
    fn patch(
        &self,
        txn: Option<&Transaction>,
        cache: &CacheHandle,
        key: &Key,
        changes: Record,
    ) -> CoreResult<Record>;

    /// Deletes and returns the record addressed by `key`.
    fn delete(&self, txn: Option<&Transaction>, cache: &CacheHandle, key: &Key) -> CoreResult<Option<Record>>;

    /// Streams the records matching a filter.
    fn cursor(&self, txn: Option<&Transaction>, cache: &CacheHandle, filter: &Filter) -> CoreResult<RecordCursor>;

    /// Counts the records matching a filter.
    fn count(&self, txn: Option<&Transaction>, cache: &CacheHandle, filter: &Filter) -> CoreResult<u64>;

    /// Releases the data source. Further calls may fail.
    fn close(&self) -> CoreResult<()>;
}
