//! # Type shapes: the registration surface
// (c) 2025 Ross Younger
//!
//! A [`Shape<T>`] is a structural descriptor for `T`: a blueprint that the
//! converter cache turns into the one active [`Converter`](crate::convert::Converter)
//! for `T`. Shapes are declarative values with identity: two clones of a
//! shape resolve to the same cached converter; two independently constructed
//! shapes do not.
//!
//! Shapes reference the shapes of their constituents through [`ShapeRef`]:
//! either inline, or *by type*, resolved through the [`ShapeProvider`] when
//! the converter is built. By-type references are how recursive type graphs
//! are expressed; the cache's delayed-converter placeholder makes the
//! cycles resolve.
//!
//! Constructors for the individual shape kinds live next to their
//! converters; the aggregate builders are here: [`ObjectShapeBuilder`] and
//! [`SubTypesBuilder`].

mod object;
pub use object::{ObjectLayout, ObjectShapeBuilder};

mod union;
pub use union::{SubTypesBuilder, UnionAlias};

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::cache::BuildCx;
use crate::convert::Converter;
use crate::error::{Error, Result};

/// Identity of a shape instance; the converter cache's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[display("shape#{_0}")]
pub struct ShapeId(u64);

impl ShapeId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// The structural kind a shape describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[non_exhaustive]
pub enum ShapeKind {
    /// A scalar with a direct token encoding
    Primitive,
    /// `Option<T>`: nil or the inner encoding
    Nullable,
    /// A sequence (Vec, sets, multi-dimensional arrays)
    Enumerable,
    /// A keyed map
    Dictionary,
    /// An object with named or positional properties
    Object,
    /// An enum encoded by ordinal or name
    Enum,
    /// A polymorphic (discriminated-union) dispatch table
    Union,
    /// An indirection (`Box`, `Arc`), possibly reference-preserving
    Reference,
    /// A raw pass-through of pre-encoded bytes
    Raw,
    /// The untyped value tree
    Value,
    /// A hand-written converter wrapped via [`Shape::custom`]
    Custom,
}

pub(crate) type BuildFn<T> =
    Box<dyn Fn(&BuildCx<'_>) -> Result<Arc<dyn Converter<T>>> + Send + Sync>;

struct ShapeInner<T: Send + Sync + 'static> {
    id: ShapeId,
    kind: ShapeKind,
    build: BuildFn<T>,
}

/// A structural descriptor for `T`; see the [module docs](self).
pub struct Shape<T: Send + Sync + 'static> {
    inner: Arc<ShapeInner<T>>,
}

impl<T: Send + Sync + 'static> Clone for Shape<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> std::fmt::Debug for Shape<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shape")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Shape<T> {
    /// Creates a shape from a converter-build blueprint
    pub(crate) fn from_build(kind: ShapeKind, build: BuildFn<T>) -> Self {
        Self {
            inner: Arc::new(ShapeInner {
                id: ShapeId::next(),
                kind,
                build,
            }),
        }
    }

    /// This shape's identity
    #[must_use]
    pub fn id(&self) -> ShapeId {
        self.inner.id
    }

    /// The structural kind this shape describes
    #[must_use]
    pub fn kind(&self) -> ShapeKind {
        self.inner.kind
    }

    /// Runs the blueprint. Only the converter cache calls this.
    pub(crate) fn build_converter(&self, cx: &BuildCx<'_>) -> Result<Arc<dyn Converter<T>>> {
        (self.inner.build)(cx)
    }
}

/// A reference to the shape of a constituent type.
pub enum ShapeRef<T: Send + Sync + 'static> {
    /// The shape is supplied inline
    Inline(Shape<T>),
    /// The shape is looked up in the [`ShapeProvider`] by `T`'s type at
    /// converter-build time
    ByType,
}

impl<T: Send + Sync + 'static> Clone for ShapeRef<T> {
    fn clone(&self) -> Self {
        match self {
            ShapeRef::Inline(s) => ShapeRef::Inline(s.clone()),
            ShapeRef::ByType => ShapeRef::ByType,
        }
    }
}

impl<T: Send + Sync + 'static> std::fmt::Debug for ShapeRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShapeRef::Inline(s) => f.debug_tuple("Inline").field(s).finish(),
            ShapeRef::ByType => write!(f, "ByType<{}>", std::any::type_name::<T>()),
        }
    }
}

impl<T: Send + Sync + 'static> ShapeRef<T> {
    /// References whatever shape is registered for `T` at build time
    #[must_use]
    pub fn by_type() -> Self {
        ShapeRef::ByType
    }

    /// Resolves this reference to a converter through the cache
    pub(crate) fn resolve(&self, cx: &BuildCx<'_>) -> Result<Arc<dyn Converter<T>>> {
        match self {
            ShapeRef::Inline(shape) => cx.converter_for(shape),
            ShapeRef::ByType => cx.converter_by_type::<T>(),
        }
    }
}

impl<T: Send + Sync + 'static> From<Shape<T>> for ShapeRef<T> {
    fn from(shape: Shape<T>) -> Self {
        ShapeRef::Inline(shape)
    }
}

impl<T: Send + Sync + 'static> From<&Shape<T>> for ShapeRef<T> {
    fn from(shape: &Shape<T>) -> Self {
        ShapeRef::Inline(shape.clone())
    }
}

/// Registry of shapes indexed by the Rust type they describe.
///
/// By-type [`ShapeRef`]s resolve against this at converter-build time.
/// Shapes are treated as immutable once a serialization call has begun.
#[derive(Default)]
pub struct ShapeProvider {
    by_type: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for ShapeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapeProvider")
            .field("registered", &self.by_type.len())
            .finish()
    }
}

impl ShapeProvider {
    /// Registers the shape for `T`, replacing any previous registration
    pub fn register<T: Send + Sync + 'static>(&mut self, shape: Shape<T>) {
        trace!(shape = ?shape, "registering");
        let _ = self.by_type.insert(TypeId::of::<T>(), Box::new(shape));
    }

    /// The registered shape for `T`, if any
    #[must_use]
    pub fn shape_of<T: Send + Sync + 'static>(&self) -> Option<Shape<T>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|b| b.downcast_ref::<Shape<T>>())
            .cloned()
    }

    /// The registered shape for `T`, or a descriptive error
    pub(crate) fn require<T: Send + Sync + 'static>(&self) -> Result<Shape<T>> {
        self.shape_of::<T>().ok_or_else(|| {
            Error::Shape(format!(
                "no shape registered for {}",
                std::any::type_name::<T>()
            ))
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::{Shape, ShapeProvider};
    use crate::convert::PrimitiveValue as _;
    use pretty_assertions::assert_eq;

    #[test]
    fn shape_identity_is_stable_across_clones() {
        let a = i32::shape();
        let b = a.clone();
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn provider_is_type_keyed() {
        let mut p = ShapeProvider::default();
        p.register(i32::shape());
        p.register(String::shape());
        assert!(p.shape_of::<i32>().is_some());
        assert!(p.shape_of::<String>().is_some());
        assert!(p.shape_of::<u64>().is_none());
    }
}
