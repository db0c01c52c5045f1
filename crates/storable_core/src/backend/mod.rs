//! Storage backends.
//!
//! This module provides:
//! - [`StorageBackend`] / [`DataSource`]: the contracts a storage technology implements
//! - [`Transaction`]: the handle of a backend transaction
//! - [`MemoryBackend`]: an in-memory, transactional reference implementation

mod memory;
mod traits;
mod transaction;

pub use memory::MemoryBackend;
pub use traits::{DataSource, RecordCursor, StorageBackend};
pub use transaction::{Transaction, TransactionState};
