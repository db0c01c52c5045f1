//! Error types for Storable core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Storable core operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A caller-supplied key, criteria, field name or type is structurally wrong.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// An entity type could not be turned into a descriptor.
    #[error("invalid entity type {type_name}: {message}")]
    InvalidEntityType {
        /// Rust type name of the offending type.
        type_name: String,
        /// Description of the problem.
        message: String,
    },

    /// The operation is not permitted in the current state.
    #[error("illegal state: {message}")]
    IllegalState {
        /// Description of why the state forbids the operation.
        message: String,
    },

    /// The operation is not supported for this entity type or backend.
    #[error("unsupported operation: {message}")]
    UnsupportedOperation {
        /// Description of the unsupported operation.
        message: String,
    },

    /// A key-based read or mutation matched zero records.
    #[error("{entity} not found for {key}")]
    NotFound {
        /// Entity name.
        entity: String,
        /// Description of the key that was looked up.
        key: String,
    },

    /// A uniqueness constraint was violated.
    #[error("key violation on {entity}: duplicate {key}")]
    KeyViolation {
        /// Entity name.
        entity: String,
        /// Which key collided.
        key: String,
    },

    /// An immutability or not-null constraint was violated.
    #[error("data constraint violation: {message}")]
    DataConstraintViolation {
        /// Description of the violated constraint.
        message: String,
    },

    /// A begin, commit or rollback failed at the backend.
    #[error("transaction error: {message}")]
    Transaction {
        /// Description of the failure.
        message: String,
    },

    /// A backend operation timed out.
    #[error("operation timed out: {message}")]
    OperationTimeout {
        /// Description of the timed out operation.
        message: String,
    },

    /// A backend ran out of some resource (connections, sequence values, memory).
    #[error("not enough resource: {message}")]
    NotEnoughResource {
        /// Description of the exhausted resource.
        message: String,
    },

    /// The registry configuration is invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid entity type error.
    pub fn invalid_entity_type(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEntityType {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Creates an illegal state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(entity: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key: key.into(),
        }
    }

    /// Creates a key violation error.
    pub fn key_violation(entity: impl Into<String>, key: impl Into<String>) -> Self {
        Self::KeyViolation {
            entity: entity.into(),
            key: key.into(),
        }
    }

    /// Creates a data constraint violation error.
    pub fn constraint_violation(message: impl Into<String>) -> Self {
        Self::DataConstraintViolation {
            message: message.into(),
        }
    }

    /// Creates a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Creates an operation timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::OperationTimeout {
            message: message.into(),
        }
    }

    /// Creates a not enough resource error.
    pub fn not_enough_resource(message: impl Into<String>) -> Self {
        Self::NotEnoughResource {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns true for transient backend conditions that callers may retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::OperationTimeout { .. } | Self::NotEnoughResource { .. }
        )
    }

    /// Wraps a backend failure from begin/commit/rollback.
    ///
    /// Transient errors and errors that already are transaction errors
    /// are returned unchanged.
    #[must_use]
    pub fn into_transaction_error(self) -> Self {
        match self {
            Self::Transaction { .. } | Self::OperationTimeout { .. } | Self::NotEnoughResource { .. } => {
                self
            }
            other => Self::transaction(other.to_string()),
        }
    }
}
