//! # Storable Core
//!
//! Entity persistence over interchangeable storage backends.
//!
//! This crate provides:
//! - The metadata engine: entity declarations turned into immutable,
//!   memoized descriptors (keys, elements, aliases, TTL, mutability)
//! - Stable key hashes for surrogate, primary and alternate keys
//! - A read-through / write-through cache in front of every backend
//! - The backend contracts and an in-memory, transactional reference backend
//! - The backend registry and the [`Manager`] that routes every operation
//!
//! ## Design Principles
//!
//! - Entities are plain values; the crate never holds references into them
//! - Backends see records and keys, never entity types
//! - Every check that does not need the backend runs before it is called
//! - Caches hold snapshots, so no caller can mutate a cached entity
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use storable_core::{
//!     BackendRegistry, CacheDefinition, MemoryBackend, ProviderConfig, RegistryConfig, UnitConfig,
//! };
//!
//! let config = RegistryConfig::new()
//!     .cache(CacheDefinition::new("main"))
//!     .default_cache("main")
//!     .unit(UnitConfig::new("app").provider(ProviderConfig::new("memory")));
//!
//! let registry = BackendRegistry::builder(config)
//!     .entity::<User>()
//!     .backend("app", Arc::new(MemoryBackend::new("memory")))
//!     .build();
//! registry.activate()?;
//!
//! let manager = registry.manager()?;
//! let user = manager.create(User::named("ada"))?;
//! let same: User = manager.fetch_by_id(user.id.clone())?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod accessor;
pub mod backend;
pub mod cache;
mod error;
pub mod hash;
mod key;
pub mod manager;
pub mod metadata;
pub mod registry;
mod types;
mod value;

#[cfg(test)]
mod test_entities;

pub use accessor::EntityAccessor;
pub use backend::{DataSource, MemoryBackend, RecordCursor, StorageBackend, Transaction, TransactionState};
pub use cache::{CacheDefinition, CacheHandle, CacheLevel, CacheStats, CacheStore, EntityCache, Eviction, MemoryCacheStore};
pub use error::{CoreError, CoreResult};
pub use hash::KeyHash;
pub use key::{Criteria, Filter, Key, KeyKind, Op, Predicate};
pub use manager::{Cursor, DefaultKeyGenerator, KeyGenerator, Manager};
pub use metadata::{DescriptorCache, ElementDescriptor, ElementMetadata, Entity, EntityDescriptor, EntityMetadata};
pub use registry::{
    AccessMode, BackendRegistry, BackendSelector, CacheStoreFactory, ProviderConfig, RandomSelector, RegistryBuilder,
    RegistryConfig, RoundRobinSelector, UnitConfig,
};
pub use types::{ConsistencyLevel, DataType, IsolationLevel, MetadataType};
pub use value::{epoch_millis, from_epoch_millis, FromValue, Record, Value};
