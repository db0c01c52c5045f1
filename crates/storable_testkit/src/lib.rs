//! # Storable Testkit
//!
//! Test utilities for Storable.
//!
//! This crate provides:
//! - Sample entity types and ready-made in-memory registries
//! - Property-based test generators using proptest
//! - A recording backend for asserting which calls reached storage
//! - A backend with injectable failures
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use storable_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_manager() {
//!     with_manager(|manager| {
//!         let user = manager.create(User::named("ada")).unwrap();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod failing;
pub mod fixtures;
pub mod generators;
pub mod spy;
pub mod stress;

use tracing_subscriber::EnvFilter;

/// Installs a test-friendly tracing subscriber.
///
/// Honors `RUST_LOG`, defaulting to `storable_core=debug`. Safe to call
/// from every test; only the first call installs anything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("storable_core=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::failing::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::spy::*;
    pub use crate::stress::*;
}

pub use failing::*;
pub use fixtures::*;
pub use generators::*;
pub use spy::*;
pub use stress::*;
