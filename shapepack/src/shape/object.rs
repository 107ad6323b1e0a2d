//! Object shape builder
// (c) 2025 Ross Younger

use std::sync::Arc;

use crate::cache::BuildCx;
use crate::context::SerializationContext;
use crate::convert::Converter;
use crate::convert::object::{
    BoundProperty, ObjectArrayConverter, ObjectMapConverter, ObjectParts, UnusedAccess,
};
use crate::error::Result;
use crate::format::{Formatter as _, MSGPACK_FORMATTER};
use crate::io::{Reader, Writer};
use crate::shape::{Shape, ShapeKind, ShapeRef};
use crate::unused::UnusedDataPacket;

/// Wire layout for object shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display)]
pub enum ObjectLayout {
    /// `{"name": value, ...}`: resilient to reordering and unknown keys
    #[default]
    Map,
    /// `[v0, v1, ...]`: compact, indexed by registration order
    Array,
}

type PropBind<T, S> = Arc<dyn Fn(&BuildCx<'_>) -> Result<BoundProperty<T, S>> + Send + Sync>;

struct PropSpec<T, S> {
    bind: PropBind<T, S>,
}

/// Builds the shape of an object type, property by property.
///
/// `T` is the object; `S` is the deserialization state. For
/// default-constructed objects ([`Shape::object`]) they coincide; for
/// constructor-built objects ([`Shape::object_with`]) `S` is an opaque
/// argument-state aggregate whose fields feed the constructor after
/// required-property verification.
pub struct ObjectShapeBuilder<T: Send + Sync + 'static, S: Send + 'static = T> {
    type_name: &'static str,
    layout: ObjectLayout,
    props: Vec<PropSpec<T, S>>,
    unused_get: Option<Arc<dyn Fn(&T) -> Option<&UnusedDataPacket> + Send + Sync>>,
    unused_set: Option<Arc<dyn Fn(&mut S, UnusedDataPacket) + Send + Sync>>,
    new_state: Arc<dyn Fn() -> S + Send + Sync>,
    finish: Arc<dyn Fn(S) -> Result<T> + Send + Sync>,
}

impl<T: Send + Sync + Default + 'static> Shape<T> {
    /// Starts the shape of a default-constructed object; properties are
    /// applied through setters.
    #[must_use]
    pub fn object() -> ObjectShapeBuilder<T, T> {
        ObjectShapeBuilder {
            type_name: std::any::type_name::<T>(),
            layout: ObjectLayout::default(),
            props: Vec::new(),
            unused_get: None,
            unused_set: None,
            new_state: Arc::new(T::default),
            finish: Arc::new(Ok),
        }
    }
}

impl<T: Send + Sync + 'static> Shape<T> {
    /// Starts the shape of an object built through a constructor: properties
    /// are read into an argument-state aggregate `A`, and `ctor` runs once
    /// required-property verification has passed.
    #[must_use]
    pub fn object_with<A>(
        ctor: impl Fn(A) -> Result<T> + Send + Sync + 'static,
    ) -> ObjectShapeBuilder<T, A>
    where
        A: Default + Send + 'static,
    {
        ObjectShapeBuilder {
            type_name: std::any::type_name::<T>(),
            layout: ObjectLayout::default(),
            props: Vec::new(),
            unused_get: None,
            unused_set: None,
            new_state: Arc::new(A::default),
            finish: Arc::new(ctor),
        }
    }
}

impl<T: Send + Sync + 'static, S: Send + 'static> ObjectShapeBuilder<T, S> {
    /// Selects the wire layout (map by default)
    #[must_use]
    pub fn layout(mut self, layout: ObjectLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Adds an optional property
    #[must_use]
    pub fn property<F: Send + Sync + 'static>(
        mut self,
        name: &str,
        shape: impl Into<ShapeRef<F>>,
        getter: impl Fn(&T) -> &F + Send + Sync + 'static,
        setter: impl Fn(&mut S, F) + Send + Sync + 'static,
    ) -> Self {
        self.push_property(name, false, shape.into(), getter, setter, None);
        self
    }

    /// Adds a required property: absence on the wire raises
    /// [`MissingRequiredProperties`](crate::Error::MissingRequiredProperties)
    /// under the strict policy.
    #[must_use]
    pub fn required<F: Send + Sync + 'static>(
        mut self,
        name: &str,
        shape: impl Into<ShapeRef<F>>,
        getter: impl Fn(&T) -> &F + Send + Sync + 'static,
        setter: impl Fn(&mut S, F) + Send + Sync + 'static,
    ) -> Self {
        self.push_property(name, true, shape.into(), getter, setter, None);
        self
    }

    /// Adds an optional property that participates in default-skipping:
    /// under the `Required`/`Never` policies it is omitted from the wire
    /// while it holds `F::default()`.
    #[must_use]
    pub fn property_skipping_default<F>(
        mut self,
        name: &str,
        shape: impl Into<ShapeRef<F>>,
        getter: impl Fn(&T) -> &F + Send + Sync + 'static,
        setter: impl Fn(&mut S, F) + Send + Sync + 'static,
    ) -> Self
    where
        F: Send + Sync + Default + PartialEq + 'static,
    {
        let is_default: Arc<dyn Fn(&F) -> bool + Send + Sync> =
            Arc::new(|f: &F| *f == F::default());
        self.push_property(name, false, shape.into(), getter, setter, Some(is_default));
        self
    }

    /// Opts the object into unknown-key capture: unrecognized map keys are
    /// collected into an [`UnusedDataPacket`] on read and re-emitted
    /// verbatim (after known properties) on write. Map layout only.
    #[must_use]
    pub fn unused_data(
        mut self,
        get: impl Fn(&T) -> Option<&UnusedDataPacket> + Send + Sync + 'static,
        set: impl Fn(&mut S, UnusedDataPacket) + Send + Sync + 'static,
    ) -> Self {
        self.unused_get = Some(Arc::new(get));
        self.unused_set = Some(Arc::new(set));
        self
    }

    fn push_property<F: Send + Sync + 'static>(
        &mut self,
        name: &str,
        required: bool,
        shape: ShapeRef<F>,
        getter: impl Fn(&T) -> &F + Send + Sync + 'static,
        setter: impl Fn(&mut S, F) + Send + Sync + 'static,
        is_default: Option<Arc<dyn Fn(&F) -> bool + Send + Sync>>,
    ) {
        let name = name.to_owned();
        let getter = Arc::new(getter);
        let setter = Arc::new(setter);
        let bind: PropBind<T, S> = Arc::new(move |cx| {
            let converter = shape.resolve(cx)?;
            let write: Box<
                dyn Fn(&mut Writer<'_>, &T, &mut SerializationContext) -> Result<()> + Send + Sync,
            > = {
                let getter = Arc::clone(&getter);
                let converter = Arc::clone(&converter);
                Box::new(move |w, t, cx| converter.write(w, (*getter)(t), cx))
            };
            let read_into: Box<
                dyn Fn(&mut Reader<'_>, &mut S, &mut SerializationContext) -> Result<()>
                    + Send
                    + Sync,
            > = {
                let setter = Arc::clone(&setter);
                let converter = Arc::clone(&converter);
                Box::new(move |r, s, cx| {
                    let value = converter.read(r, cx)?;
                    (*setter)(s, value);
                    Ok(())
                })
            };
            let is_default = is_default.as_ref().map(|probe| {
                let probe = Arc::clone(probe);
                let getter = Arc::clone(&getter);
                let boxed: Box<dyn Fn(&T) -> bool + Send + Sync> =
                    Box::new(move |t: &T| (*probe)((*getter)(t)));
                boxed
            });
            Ok(BoundProperty {
                encoded_name: MSGPACK_FORMATTER.encode_str_token(&name),
                name: name.clone(),
                required,
                write,
                read_into,
                is_default,
            })
        });
        self.props.push(PropSpec { bind });
    }

    /// Finishes the builder into a registerable shape
    #[must_use]
    pub fn build(self) -> Shape<T> {
        let Self {
            type_name,
            layout,
            props,
            unused_get,
            unused_set,
            new_state,
            finish,
        } = self;
        let props = Arc::new(props);
        Shape::from_build(
            ShapeKind::Object,
            Box::new(move |cx| {
                let properties = props
                    .iter()
                    .map(|p| (*p.bind)(cx))
                    .collect::<Result<Vec<_>>>()?;
                let unused = match (&unused_get, &unused_set) {
                    (Some(get), Some(set)) => Some(UnusedAccess {
                        get: Arc::clone(get),
                        set: Arc::clone(set),
                    }),
                    _ => None,
                };
                let parts = ObjectParts {
                    type_name,
                    properties,
                    new_state: Arc::clone(&new_state),
                    finish: Arc::clone(&finish),
                    unused,
                };
                let c: Arc<dyn Converter<T>> = match layout {
                    ObjectLayout::Map => Arc::new(ObjectMapConverter::new(parts)),
                    ObjectLayout::Array => Arc::new(ObjectArrayConverter::new(parts)),
                };
                Ok(c)
            }),
        )
    }
}
