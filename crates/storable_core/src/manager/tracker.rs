//! Bookkeeping of the data sources a manager has open.

use crate::backend::DataSource;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

fn close_quietly(source: &dyn DataSource) {
    if let Err(e) = source.close() {
        warn!(entity = source.descriptor().name(), error = %e, "closing data source failed");
    }
}

/// Data sources opened by one manager and not yet released.
#[derive(Debug, Default)]
pub(crate) struct SourceTracker {
    next_id: AtomicU64,
    open: Mutex<HashMap<u64, Arc<dyn DataSource>>>,
}

impl SourceTracker {
    pub(crate) fn track(self: &Arc<Self>, source: Arc<dyn DataSource>) -> TrackedSource {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.open.lock().insert(id, Arc::clone(&source));
        TrackedSource {
            id,
            source,
            tracker: Arc::downgrade(self),
        }
    }

    fn release(&self, id: u64) {
        let released = self.open.lock().remove(&id);
        if let Some(source) = released {
            close_quietly(source.as_ref());
        }
    }

    /// Closes every source still open. Returns how many were closed.
    pub(crate) fn release_all(&self) -> usize {
        let drained: Vec<_> = self.open.lock().drain().map(|(_, s)| s).collect();
        for source in &drained {
            close_quietly(source.as_ref());
        }
        drained.len()
    }

    pub(crate) fn open_count(&self) -> usize {
        self.open.lock().len()
    }
}

/// A data source that is closed when this guard drops, unless the tracker
/// already closed it.
pub(crate) struct TrackedSource {
    id: u64,
    source: Arc<dyn DataSource>,
    tracker: Weak<SourceTracker>,
}

impl TrackedSource {
    pub(crate) fn source(&self) -> &dyn DataSource {
        self.source.as_ref()
    }
}

impl Drop for TrackedSource {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.release(self.id);
        }
    }
}

impl fmt::Debug for TrackedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedSource")
            .field("id", &self.id)
            .field("entity", &self.source.descriptor().name())
            .finish()
    }
}
