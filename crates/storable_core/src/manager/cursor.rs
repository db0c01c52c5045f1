//! Typed result cursors.

use crate::accessor::EntityAccessor;
use crate::backend::RecordCursor;
use crate::error::CoreResult;
use crate::manager::tracker::TrackedSource;
use crate::metadata::{Entity, EntityDescriptor};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Beans matching a query, materialized one at a time.
///
/// The cursor keeps its data source open until it is dropped or the
/// manager that created it is closed.
pub struct Cursor<T: Entity> {
    rows: RecordCursor,
    descriptor: Arc<EntityDescriptor>,
    _source: TrackedSource,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Cursor<T> {
    pub(crate) fn new(rows: RecordCursor, descriptor: Arc<EntityDescriptor>, source: TrackedSource) -> Self {
        Self {
            rows,
            descriptor,
            _source: source,
            _marker: PhantomData,
        }
    }
}

impl<T: Entity> Iterator for Cursor<T> {
    type Item = CoreResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some(row.and_then(|record| EntityAccessor::new(&self.descriptor).from_record(&record)))
    }
}

impl<T: Entity> fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("entity", &self.descriptor.name())
            .finish_non_exhaustive()
    }
}
