//! Reference-identity tracking for preserved object graphs
// (c) 2025 Ross Younger

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};

/// Outcome of noting a reference on the write side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteTrack {
    /// First occurrence; the payload is serialized normally
    First(u32),
    /// Seen before; only the backref index is emitted
    Seen(u32),
}

/// Maps object identity to backref indexes (writing) and backref indexes to
/// already-materialized values (reading).
///
/// One tracker serves one serialization call; trackers are pooled by the
/// serializer and cleared on return.
#[derive(Debug, Default)]
pub(crate) struct ReferenceTracker {
    by_identity: HashMap<usize, u32>,
    values: Vec<Arc<dyn Any + Send + Sync>>,
}

impl ReferenceTracker {
    /// Notes a reference (by address) during writing.
    ///
    /// Indexes are assigned in first-occurrence order, matching the order in
    /// which the read side registers materialized values.
    pub(crate) fn note_for_write(&mut self, identity: usize) -> WriteTrack {
        #[allow(clippy::cast_possible_truncation)]
        let next = self.by_identity.len() as u32;
        match self.by_identity.entry(identity) {
            std::collections::hash_map::Entry::Occupied(e) => WriteTrack::Seen(*e.get()),
            std::collections::hash_map::Entry::Vacant(e) => {
                let _ = e.insert(next);
                WriteTrack::First(next)
            }
        }
    }

    /// Registers a newly materialized value during reading, returning its index
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn register_read(&mut self, value: Arc<dyn Any + Send + Sync>) -> u32 {
        self.values.push(value);
        (self.values.len() - 1) as u32
    }

    /// Resolves a backref index to a previously registered value.
    ///
    /// An index at or beyond the registered count means the wire contains a
    /// backref into a value still being constructed (a true cycle), which
    /// this implementation does not materialize.
    pub(crate) fn resolve_read<T: Send + Sync + 'static>(&self, index: u32) -> Result<Arc<T>> {
        let value = self.values.get(index as usize).ok_or_else(|| {
            Error::Shape(format!("backref {index} refers to a value still under construction"))
        })?;
        value.clone().downcast::<T>().map_err(|_| {
            Error::Shape(format!(
                "backref {index} resolves to a different type than requested"
            ))
        })
    }

    /// Forgets everything, ready for reuse
    pub(crate) fn clear(&mut self) {
        self.by_identity.clear();
        self.values.clear();
    }
}

/// Lock-protected LIFO pool of reference trackers.
///
/// Taken on serialization start, returned on end, cleared on return.
#[derive(Debug, Default)]
pub(crate) struct TrackerPool {
    pool: Mutex<Vec<ReferenceTracker>>,
}

impl TrackerPool {
    pub(crate) fn take(&self) -> ReferenceTracker {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default()
    }

    pub(crate) fn give_back(&self, mut tracker: ReferenceTracker) {
        tracker.clear();
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tracker);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::{ReferenceTracker, TrackerPool, WriteTrack};
    use assertables::assert_matches;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn write_side_indexes_in_first_occurrence_order() {
        let mut t = ReferenceTracker::default();
        assert_eq!(t.note_for_write(100), WriteTrack::First(0));
        assert_eq!(t.note_for_write(200), WriteTrack::First(1));
        assert_eq!(t.note_for_write(100), WriteTrack::Seen(0));
        assert_eq!(t.note_for_write(200), WriteTrack::Seen(1));
    }

    #[test]
    fn read_side_resolution() {
        let mut t = ReferenceTracker::default();
        let v = Arc::new(42u32);
        let idx = t.register_read(v.clone());
        let resolved = t.resolve_read::<u32>(idx).unwrap();
        assert!(Arc::ptr_eq(&v, &resolved));
    }

    #[test]
    fn forward_backref_is_rejected() {
        let t = ReferenceTracker::default();
        assert_matches!(t.resolve_read::<u32>(0), Err(crate::Error::Shape(_)));
    }

    #[test]
    fn wrong_type_is_rejected() {
        let mut t = ReferenceTracker::default();
        let _ = t.register_read(Arc::new(42u32));
        assert_matches!(t.resolve_read::<String>(0), Err(crate::Error::Shape(_)));
    }

    #[test]
    fn pool_clears_on_return() {
        let pool = TrackerPool::default();
        let mut t = pool.take();
        let _ = t.note_for_write(1);
        let _ = t.register_read(Arc::new(1u8));
        pool.give_back(t);
        let t = pool.take();
        assert!(t.by_identity.is_empty());
        assert!(t.values.is_empty());
    }
}
