//! Transaction handles.

use crate::error::{CoreError, CoreResult};
use crate::types::IsolationLevel;
use parking_lot::Mutex;
use uuid::Uuid;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been rolled back.
    RolledBack,
    /// Commit or rollback failed; the transaction is over regardless.
    Failed,
}

/// A transaction bound to one backend.
///
/// Created by [`Manager::begin`](crate::Manager::begin) and ended by exactly
/// one commit or rollback. Once ended it is permanently invalid.
#[derive(Debug)]
pub struct Transaction {
    /// Transaction ID.
    id: String,
    /// Requested isolation.
    isolation: IsolationLevel,
    /// Name of the backend that owns the transaction.
    backend: String,
    /// Current state.
    state: Mutex<TransactionState>,
}

impl Transaction {
    /// Creates an active transaction.
    ///
    /// Backends call this from [`StorageBackend::begin`](crate::StorageBackend::begin).
    #[must_use]
    pub fn new(id: impl Into<String>, isolation: IsolationLevel, backend: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            isolation,
            backend: backend.into(),
            state: Mutex::new(TransactionState::Active),
        }
    }

    /// Generates a fresh transaction id.
    #[must_use]
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the isolation level.
    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Returns the name of the owning backend.
    #[must_use]
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Fails with `IllegalState` unless the transaction is active.
    pub fn ensure_active(&self) -> CoreResult<()> {
        match self.state() {
            TransactionState::Active => Ok(()),
            state => Err(CoreError::illegal_state(format!(
                "transaction {} is {state:?}",
                self.id
            ))),
        }
    }

    pub(crate) fn mark(&self, state: TransactionState) {
        *self.state.lock() = state;
    }
}
