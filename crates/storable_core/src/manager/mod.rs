//! The entity manager: the uniform data-access API.
//!
//! This module provides:
//! - [`Manager`]: CRUD, cursors, counts and transactions over managed types
//! - [`Cursor`]: typed query results
//! - [`KeyGenerator`]: the surrogate key generation seam

mod cursor;
mod enforce;
mod keygen;
mod ops;
mod tracker;

pub use cursor::Cursor;
pub use keygen::{DefaultKeyGenerator, KeyGenerator};

use crate::backend::{StorageBackend, Transaction, TransactionState};
use crate::cache::{CacheHandle, CacheStore};
use crate::error::{CoreError, CoreResult};
use crate::metadata::{DescriptorCache, Entity, EntityDescriptor};
use crate::registry::{AccessMode, BackendSelector, CacheAttachment, CacheStoreFactory, Unit};
use crate::types::IsolationLevel;
use parking_lot::Mutex;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use tracker::{SourceTracker, TrackedSource};

/// What a manager needs from its registry.
pub(crate) struct ManagerContext {
    /// The storage unit the manager works on.
    pub(crate) unit: Arc<Unit>,
    /// Descriptor memo.
    pub(crate) descriptors: Arc<DescriptorCache>,
    /// Provider choice.
    pub(crate) selector: Arc<dyn BackendSelector>,
    /// Surrogate key generation.
    pub(crate) key_generator: Arc<dyn KeyGenerator>,
    /// Creates manager-local cache stores.
    pub(crate) store_factory: CacheStoreFactory,
}

/// The transaction a manager is bound to.
struct BoundTransaction {
    txn: Arc<Transaction>,
    backend: Arc<dyn StorageBackend>,
}

/// Where one operation runs.
pub(crate) struct Target {
    backend: Arc<dyn StorageBackend>,
    txn: Option<Arc<Transaction>>,
    cache: CacheHandle,
}

impl Target {
    fn txn(&self) -> Option<&Transaction> {
        self.txn.as_deref()
    }
}

/// Unit of work over one storage unit.
///
/// A manager is obtained from an active
/// [`BackendRegistry`](crate::registry::BackendRegistry) and routes every
/// operation to a backend of its unit, through that backend's cache. It is
/// `Send + Sync`; all state is behind atomics or short-lived locks.
///
/// # Transactions
///
/// At most one transaction is in progress per manager. While it is, every
/// operation runs on the transaction's backend; otherwise each operation
/// picks a backend through the registry's [`BackendSelector`].
///
/// # Closing
///
/// [`close`](Self::close) rolls back a transaction in progress, closes every
/// data source still open and drops manager-local caches. Dropping the
/// manager closes it.
///
/// # Example
///
/// ```rust,ignore
/// let manager = registry.manager()?;
///
/// let txn = manager.begin()?;
/// let user = manager.create(user)?;
/// manager.commit(&txn)?;
///
/// let again: User = manager.fetch_by_id(user.id.clone())?;
/// manager.close();
/// ```
pub struct Manager {
    /// Unit, selector and memo shared with the registry.
    context: ManagerContext,
    /// Cleared by `close`.
    open: AtomicBool,
    /// Claimed by `begin`, released when the transaction ends.
    txn_in_progress: AtomicBool,
    /// Set while commit or rollback runs.
    txn_ending: AtomicBool,
    /// The transaction in progress.
    bound: Mutex<Option<BoundTransaction>>,
    /// Data sources not yet closed.
    sources: Arc<SourceTracker>,
    /// Manager-local cache stores, by cache id.
    local_caches: Mutex<HashMap<String, Arc<dyn CacheStore>>>,
}

impl Manager {
    pub(crate) fn new(context: ManagerContext) -> Self {
        debug!(unit = %context.unit.name, "manager opened");
        Self {
            context,
            open: AtomicBool::new(true),
            txn_in_progress: AtomicBool::new(false),
            txn_ending: AtomicBool::new(false),
            bound: Mutex::new(None),
            sources: Arc::new(SourceTracker::default()),
            local_caches: Mutex::new(HashMap::new()),
        }
    }

    /// Name of the storage unit.
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.context.unit.name
    }

    /// Returns true until `close` is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Whether `bean` differs from its stored state. Changes are not
    /// tracked, so every bean counts as dirty.
    #[must_use]
    pub fn is_dirty<T: Entity>(&self, _bean: &T) -> bool {
        true
    }

    /// Number of data sources currently held open, cursors included.
    #[must_use]
    pub fn open_sources(&self) -> usize {
        self.sources.open_count()
    }

    /// Describes an entity type, managed or not.
    ///
    /// # Errors
    ///
    /// `IllegalState` once closed, `InvalidEntityType` for malformed
    /// metadata.
    pub fn describe<T: Entity>(&self) -> CoreResult<Arc<EntityDescriptor>> {
        self.ensure_open()?;
        self.context.descriptors.describe::<T>()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::illegal_state("manager is closed"))
        }
    }

    /// Open check plus managed check; returns the descriptor of `T`.
    pub(crate) fn managed<T: Entity>(&self) -> CoreResult<Arc<EntityDescriptor>> {
        self.ensure_open()?;
        self.context
            .unit
            .managed
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or_else(|| {
                CoreError::invalid_argument(format!(
                    "{} is not managed by unit {}",
                    std::any::type_name::<T>(),
                    self.context.unit.name
                ))
            })
    }

    /// Picks the backend, transaction and cache for one operation on `T`.
    pub(crate) fn target<T: Entity>(&self, descriptor: &Arc<EntityDescriptor>, mode: AccessMode) -> CoreResult<Target> {
        let (backend, txn) = self.route(mode)?;
        let cache = self.cache_handle(&backend, TypeId::of::<T>(), descriptor);
        Ok(Target { backend, txn, cache })
    }

    fn route(&self, mode: AccessMode) -> CoreResult<(Arc<dyn StorageBackend>, Option<Arc<Transaction>>)> {
        let unit = &self.context.unit;
        unit.ensure_live()?;
        if self.txn_in_progress.load(Ordering::SeqCst) && !self.txn_ending.load(Ordering::SeqCst) {
            if let Some(bound) = self.bound.lock().as_ref() {
                return Ok((Arc::clone(&bound.backend), Some(Arc::clone(&bound.txn))));
            }
        }

        let pool = unit.pool(mode);
        if pool.is_empty() {
            return Err(CoreError::illegal_state(format!(
                "unit {} has no backend for {mode:?} access",
                unit.name
            )));
        }
        let index = self.context.selector.select(pool, mode).min(pool.len() - 1);
        let backend = Arc::clone(&pool[index]);
        debug!(unit = %unit.name, backend = backend.name(), ?mode, "backend selected");
        Ok((backend, None))
    }

    /// Regions are scoped by unit: providers of one unit, replicas
    /// included, share entries, while another unit on the same pool does not.
    fn cache_handle(&self, backend: &Arc<dyn StorageBackend>, type_id: TypeId, descriptor: &Arc<EntityDescriptor>) -> CacheHandle {
        let unit = &self.context.unit.name;
        match self.context.unit.attachment(backend.name(), type_id) {
            Some(CacheAttachment::Shared(store)) => CacheHandle::scoped(Arc::clone(store), Arc::clone(descriptor), unit),
            Some(CacheAttachment::Local(definition)) => {
                let store = Arc::clone(
                    self.local_caches
                        .lock()
                        .entry(definition.id.clone())
                        .or_insert_with(|| (self.context.store_factory)(definition)),
                );
                CacheHandle::scoped(store, Arc::clone(descriptor), unit)
            }
            None => CacheHandle::disabled(Arc::clone(descriptor)),
        }
    }

    /// Opens a data source on the target's backend, tracked until the
    /// returned guard drops.
    pub(crate) fn open_source(&self, target: &Target, descriptor: &Arc<EntityDescriptor>) -> CoreResult<TrackedSource> {
        let source = target.backend.open_data_source(Arc::clone(descriptor))?;
        Ok(self.sources.track(source))
    }

    /// Begins a transaction with the default isolation level.
    ///
    /// # Errors
    ///
    /// See [`begin_with`](Self::begin_with).
    pub fn begin(&self) -> CoreResult<Arc<Transaction>> {
        self.begin_with(IsolationLevel::default())
    }

    /// Begins a transaction and binds the manager to it.
    ///
    /// # Errors
    ///
    /// - `IllegalState` if the manager is closed, a transaction is already
    ///   in progress, or no backend of the unit supports transactions
    /// - `Transaction` if the backend refuses (transient errors pass through)
    pub fn begin_with(&self, isolation: IsolationLevel) -> CoreResult<Arc<Transaction>> {
        self.ensure_open()?;
        if self
            .txn_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CoreError::illegal_state("a transaction is already in progress"));
        }
        match self.start_transaction(isolation) {
            Ok(txn) => Ok(txn),
            Err(e) => {
                self.txn_in_progress.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn start_transaction(&self, isolation: IsolationLevel) -> CoreResult<Arc<Transaction>> {
        let unit = &self.context.unit;
        unit.ensure_live()?;
        let pool: Vec<_> = unit
            .pool(AccessMode::Write)
            .iter()
            .filter(|b| b.is_transaction_supported())
            .cloned()
            .collect();
        if pool.is_empty() {
            return Err(CoreError::illegal_state(format!(
                "unit {} has no backend supporting transactions",
                unit.name
            )));
        }
        let index = self
            .context
            .selector
            .select(&pool, AccessMode::Write)
            .min(pool.len() - 1);
        let backend = Arc::clone(&pool[index]);
        let txn = Arc::new(
            backend
                .begin(&Transaction::generate_id(), isolation)
                .map_err(CoreError::into_transaction_error)?,
        );
        debug!(backend = backend.name(), txn = txn.id(), ?isolation, "transaction bound");
        *self.bound.lock() = Some(BoundTransaction {
            txn: Arc::clone(&txn),
            backend,
        });
        Ok(txn)
    }

    /// Commits the manager's transaction.
    ///
    /// The manager is unbound afterwards whether or not the commit
    /// succeeded.
    ///
    /// # Errors
    ///
    /// - `IllegalState` if `txn` is not the manager's active transaction or
    ///   is already ending
    /// - `Transaction` if the backend fails (transient errors pass through)
    pub fn commit(&self, txn: &Transaction) -> CoreResult<()> {
        self.ensure_open()?;
        self.end_transaction(txn, true)
    }

    /// Rolls the manager's transaction back.
    ///
    /// # Errors
    ///
    /// As for [`commit`](Self::commit).
    pub fn rollback(&self, txn: &Transaction) -> CoreResult<()> {
        self.ensure_open()?;
        self.end_transaction(txn, false)
    }

    /// The transaction in progress, if any.
    #[must_use]
    pub fn current_transaction(&self) -> Option<Arc<Transaction>> {
        self.bound.lock().as_ref().map(|b| Arc::clone(&b.txn))
    }

    fn end_transaction(&self, txn: &Transaction, commit: bool) -> CoreResult<()> {
        let BoundTransaction {
            txn: bound_txn,
            backend,
        } = self.claim_bound(txn)?;

        let result = if commit {
            backend.commit(&bound_txn)
        } else {
            backend.rollback(&bound_txn)
        };
        bound_txn.mark(match (commit, result.is_ok()) {
            (true, true) => TransactionState::Committed,
            (false, true) => TransactionState::RolledBack,
            _ => TransactionState::Failed,
        });
        debug!(
            backend = backend.name(),
            txn = bound_txn.id(),
            commit,
            ok = result.is_ok(),
            "transaction ended"
        );

        self.txn_ending.store(false, Ordering::SeqCst);
        self.txn_in_progress.store(false, Ordering::SeqCst);
        result.map_err(CoreError::into_transaction_error)
    }

    /// Unbinds `txn` if it is the active transaction in progress.
    ///
    /// The check and the unbinding happen under one lock, so of several
    /// threads ending the same transaction exactly one gets it back; the
    /// others, and anyone holding a stale handle after a new `begin`, get
    /// `IllegalState` and leave the binding alone.
    fn claim_bound(&self, txn: &Transaction) -> CoreResult<BoundTransaction> {
        let mut slot = self.bound.lock();
        let Some(bound) = slot.as_ref() else {
            return Err(CoreError::illegal_state("no transaction in progress"));
        };
        if bound.txn.id() != txn.id() {
            return Err(CoreError::illegal_state(format!(
                "transaction {} is not the transaction in progress",
                txn.id()
            )));
        }
        bound.txn.ensure_active()?;
        self.txn_ending.store(true, Ordering::SeqCst);
        slot.take()
            .ok_or_else(|| CoreError::illegal_state("no transaction in progress"))
    }

    /// Closes the manager. Idempotent; never fails.
    ///
    /// A transaction in progress is rolled back and every data source still
    /// open, cursors included, is closed. Failures are logged.
    pub fn close(&self) {
        if self
            .open
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        if let Some(txn) = self.current_transaction() {
            if let Err(e) = self.end_transaction(&txn, false) {
                warn!(txn = txn.id(), error = %e, "rollback on close failed");
            }
        }
        let released = self.sources.release_all();
        let caches: Vec<_> = self.local_caches.lock().drain().map(|(_, c)| c).collect();
        for cache in &caches {
            cache.clear();
        }
        debug!(unit = %self.context.unit.name, released, "manager closed");
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("unit", &self.context.unit.name)
            .field("is_open", &self.is_open())
            .field("txn_in_progress", &self.txn_in_progress.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.close();
    }
}
