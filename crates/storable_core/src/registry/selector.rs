//! Backend selection strategies.

use crate::backend::StorageBackend;
use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What the selected backend will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Reads only; read-only providers are eligible.
    Read,
    /// Mutations; only read-write providers are eligible.
    Write,
}

/// Picks one backend out of an eligible pool.
///
/// The pool is never empty when `select` is called.
pub trait BackendSelector: Send + Sync + fmt::Debug {
    /// Returns an index into `pool`.
    fn select(&self, pool: &[Arc<dyn StorageBackend>], mode: AccessMode) -> usize;
}

/// Uniform random choice. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl BackendSelector for RandomSelector {
    fn select(&self, pool: &[Arc<dyn StorageBackend>], _mode: AccessMode) -> usize {
        if pool.len() <= 1 {
            return 0;
        }
        rand::thread_rng().gen_range(0..pool.len())
    }
}

/// Cycles through the pool in order.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    next: AtomicUsize,
}

impl RoundRobinSelector {
    /// Creates a selector starting at the first backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackendSelector for RoundRobinSelector {
    fn select(&self, pool: &[Arc<dyn StorageBackend>], _mode: AccessMode) -> usize {
        if pool.is_empty() {
            return 0;
        }
        self.next.fetch_add(1, Ordering::Relaxed) % pool.len()
    }
}
