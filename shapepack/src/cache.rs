//! Converter cache and delayed construction
// (c) 2025 Ross Younger
//!
//! The cache interns converters keyed by shape identity, yielding exactly
//! one converter per shape for the serializer's lifetime. Recursive type
//! graphs resolve through a placeholder protocol:
//!
//! 1. a requested shape with no entry installs a
//!    [`DelayedConverter`] placeholder under the lock;
//! 2. the real converter is built with the lock *released*, so the build may
//!    re-enter the cache for field types; a re-entrant lookup of the same
//!    shape gets the placeholder and completes;
//! 3. the placeholder's box is filled and the slot is replaced.
//!
//! Construction stack depth is therefore bounded by the longest acyclic
//! chain in the type graph.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::convert::{Converter, DelayedConverter};
use crate::error::{Error, Result};
use crate::options::SerializerOptions;
use crate::shape::{Shape, ShapeId, ShapeProvider};

/// Everything a shape blueprint needs while building its converter.
pub(crate) struct BuildCx<'a> {
    pub(crate) provider: &'a ShapeProvider,
    pub(crate) cache: &'a ConverterCache,
    pub(crate) options: &'a SerializerOptions,
}

impl std::fmt::Debug for BuildCx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildCx")
            .field("provider", self.provider)
            .finish()
    }
}

impl BuildCx<'_> {
    /// Resolves a shape to its interned converter
    pub(crate) fn converter_for<T: Send + Sync + 'static>(
        &self,
        shape: &Shape<T>,
    ) -> Result<Arc<dyn Converter<T>>> {
        self.cache.resolve(self, shape)
    }

    /// Resolves the registered shape for `T` to its interned converter
    pub(crate) fn converter_by_type<T: Send + Sync + 'static>(
        &self,
    ) -> Result<Arc<dyn Converter<T>>> {
        let shape = self.provider.require::<T>()?;
        self.cache.resolve(self, &shape)
    }

    /// The serializer options in force
    pub(crate) fn options(&self) -> &SerializerOptions {
        self.options
    }
}

enum Slot {
    /// Holds an `Arc<DelayedConverter<T>>` while the real converter builds
    Building(Box<dyn Any + Send + Sync>),
    /// Holds the finished `Arc<dyn Converter<T>>`
    Ready(Box<dyn Any + Send + Sync>),
}

/// Interns converters by shape identity. Read-mostly; new entries are
/// guarded by an internal lock that is never held across a build.
#[derive(Default)]
pub(crate) struct ConverterCache {
    slots: Mutex<HashMap<ShapeId, Slot>>,
}

impl std::fmt::Debug for ConverterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterCache")
            .field("entries", &self.lock().len())
            .finish()
    }
}

fn type_confusion(id: ShapeId) -> Error {
    Error::Shape(format!("cache entry for {id} holds a different type"))
}

impl ConverterCache {
    fn lock(&self) -> MutexGuard<'_, HashMap<ShapeId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up (or builds) the converter for `shape`.
    pub(crate) fn resolve<T: Send + Sync + 'static>(
        &self,
        cx: &BuildCx<'_>,
        shape: &Shape<T>,
    ) -> Result<Arc<dyn Converter<T>>> {
        let id = shape.id();
        let delayed: Arc<DelayedConverter<T>>;
        {
            let mut slots = self.lock();
            match slots.get(&id) {
                Some(Slot::Ready(entry)) => {
                    return entry
                        .downcast_ref::<Arc<dyn Converter<T>>>()
                        .cloned()
                        .ok_or_else(|| type_confusion(id));
                }
                Some(Slot::Building(entry)) => {
                    let placeholder = entry
                        .downcast_ref::<Arc<DelayedConverter<T>>>()
                        .cloned()
                        .ok_or_else(|| type_confusion(id))?;
                    let as_converter: Arc<dyn Converter<T>> = placeholder;
                    return Ok(as_converter);
                }
                None => {
                    delayed = Arc::new(DelayedConverter::new());
                    let _ = slots.insert(id, Slot::Building(Box::new(Arc::clone(&delayed))));
                }
            }
        }

        trace!(shape = %id, kind = %shape.kind(), "building converter");
        let built = match shape.build_converter(cx) {
            Ok(converter) => converter,
            Err(e) => {
                // Leave no wedged placeholder behind; a later call may retry
                let _ = self.lock().remove(&id);
                return Err(e);
            }
        };
        delayed.fill(Arc::clone(&built));
        let _ = self
            .lock()
            .insert(id, Slot::Ready(Box::new(Arc::clone(&built))));
        Ok(built)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::{BuildCx, ConverterCache};
    use crate::convert::PrimitiveValue as _;
    use crate::options::SerializerOptions;
    use crate::shape::ShapeProvider;
    use std::sync::Arc;

    #[test]
    fn repeated_resolution_is_interned() {
        let provider = ShapeProvider::default();
        let cache = ConverterCache::default();
        let options = SerializerOptions::default();
        let cx = BuildCx {
            provider: &provider,
            cache: &cache,
            options: &options,
        };
        let shape = i32::shape();
        let a = cache.resolve(&cx, &shape).unwrap();
        let b = cache.resolve(&cx, &shape).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    // Recursive (self-referential) resolution is exercised end-to-end in
    // tests/wire.rs with a linked-list shape; the placeholder path cannot be
    // driven any more directly than that.
}
