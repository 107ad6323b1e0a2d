//! Per-call serialization state
// (c) 2025 Ross Younger

use std::any::{Any, TypeId};
use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::options::{DeserializeDefaultValues, SerializeDefaultValues, SerializerOptions};
use crate::track::ReferenceTracker;

/// State threaded through every converter call.
///
/// One context drives one (de)serialization call tree; it is not shared
/// across tasks. The depth guard is scoped: [`depth_step`](Self::depth_step)
/// takes the nested work as a closure so restoration cannot be forgotten,
/// and cancellation is polled at each step and at async suspension points.
#[derive(Debug)]
pub struct SerializationContext {
    remaining_depth: u32,
    unflushed_bytes_threshold: usize,
    serialize_default_values: SerializeDefaultValues,
    deserialize_default_values: DeserializeDefaultValues,
    cancel: CancellationToken,
    tracker: Option<ReferenceTracker>,
    extensions: Extensions,
}

impl Default for SerializationContext {
    fn default() -> Self {
        Self::new(&SerializerOptions::default())
    }
}

impl SerializationContext {
    /// Creates a context carrying the given options
    #[must_use]
    pub fn new(options: &SerializerOptions) -> Self {
        Self {
            remaining_depth: options.max_depth,
            unflushed_bytes_threshold: options.unflushed_bytes_threshold,
            serialize_default_values: options.serialize_default_values,
            deserialize_default_values: options.deserialize_default_values,
            cancel: CancellationToken::new(),
            tracker: None,
            extensions: Extensions::default(),
        }
    }

    /// Convenience constructor varying only the depth bound
    #[must_use]
    pub fn with_max_depth(max_depth: u32) -> Self {
        Self::new(&SerializerOptions {
            max_depth,
            ..SerializerOptions::default()
        })
    }

    /// Attaches a cancellation signal
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Runs `f` one nesting level down.
    ///
    /// Surfaces cancellation, then decrements the remaining depth (raising
    /// [`Error::DepthExceeded`] on breach). The depth is restored when `f`
    /// returns, successfully or not; callers never restore it by hand.
    pub fn depth_step<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.depth_enter()?;
        let out = f(self);
        self.depth_exit();
        out
    }

    /// The explicit half of [`depth_step`](Self::depth_step), for async call
    /// paths where the nested work cannot be a closure. Pair with
    /// [`depth_exit`](Self::depth_exit) on the success path; an error
    /// abandons the context, so unwinding the counter is moot.
    pub(crate) fn depth_enter(&mut self) -> Result<()> {
        self.check_cancelled()?;
        self.remaining_depth = self
            .remaining_depth
            .checked_sub(1)
            .ok_or(Error::DepthExceeded)?;
        Ok(())
    }

    /// See [`depth_enter`](Self::depth_enter)
    pub(crate) fn depth_exit(&mut self) {
        self.remaining_depth += 1;
    }

    /// Surfaces [`Error::Cancelled`] if the signal has fired
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// The async writer's flush threshold
    #[must_use]
    pub fn unflushed_bytes_threshold(&self) -> usize {
        self.unflushed_bytes_threshold
    }

    /// Policy for emitting defaulted properties
    #[must_use]
    pub fn serialize_default_values(&self) -> SerializeDefaultValues {
        self.serialize_default_values
    }

    /// Policy for missing required properties
    #[must_use]
    pub fn deserialize_default_values(&self) -> DeserializeDefaultValues {
        self.deserialize_default_values
    }

    /// The reference-identity tracker, when preservation is active
    pub(crate) fn tracker_mut(&mut self) -> Option<&mut ReferenceTracker> {
        self.tracker.as_mut()
    }

    /// Installs a tracker taken from the pool
    pub(crate) fn set_tracker(&mut self, tracker: ReferenceTracker) {
        self.tracker = Some(tracker);
    }

    /// Removes the tracker so it can be returned to the pool
    pub(crate) fn take_tracker(&mut self) -> Option<ReferenceTracker> {
        self.tracker.take()
    }

    /// User-extension storage carried through the call tree
    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Mutable access to the user-extension storage
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

/// An opaque, type-keyed key→value map for user extensions.
///
/// Custom converters can stash state here without the core knowing about it.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions").field("len", &self.map.len()).finish()
    }
}

impl Extensions {
    /// Stores a value, replacing any previous value of the same type
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        let _ = self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves the value of type `T`, if one was stored
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|b| b.downcast_ref())
    }

    /// Removes and returns the value of type `T`, if one was stored
    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|b| b.downcast().ok())
            .map(|b| *b)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::SerializationContext;
    use crate::error::Error;
    use assertables::assert_matches;
    use pretty_assertions::assert_eq;

    #[test]
    fn depth_is_restored_after_each_step() {
        let mut cx = SerializationContext::with_max_depth(2);
        cx.depth_step(|cx| {
            cx.depth_step(|_| Ok(()))?;
            // The inner step unwound; a second inner step fits again
            cx.depth_step(|_| Ok(()))
        })
        .unwrap();
    }

    #[test]
    fn breach_raises() {
        let mut cx = SerializationContext::with_max_depth(1);
        let r = cx.depth_step(|cx| cx.depth_step(|_| Ok(())));
        assert_matches!(r, Err(Error::DepthExceeded));
    }

    #[test]
    fn cancellation_observed_at_depth_step() {
        let token = tokio_util::sync::CancellationToken::new();
        let mut cx = SerializationContext::default().with_cancellation(token.clone());
        token.cancel();
        assert_matches!(cx.depth_step(|_| Ok(())), Err(Error::Cancelled));
    }

    #[test]
    fn extensions_are_type_keyed() {
        let mut cx = SerializationContext::default();
        cx.extensions_mut().insert(42u32);
        cx.extensions_mut().insert("hello");
        assert_eq!(cx.extensions().get::<u32>(), Some(&42));
        assert_eq!(cx.extensions().get::<&str>(), Some(&"hello"));
        assert_eq!(cx.extensions_mut().remove::<u32>(), Some(42));
        assert_eq!(cx.extensions().get::<u32>(), None);
    }
}
