//! Union (subtype table) builder
// (c) 2025 Ross Younger

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;

use crate::cache::BuildCx;
use crate::convert::union::{MappedConverter, SubTypes, UnionArm, UnionConverter};
use crate::convert::Converter;
use crate::error::{Error, Result};
use crate::format::{Formatter as _, MSGPACK_FORMATTER};
use crate::shape::{Shape, ShapeKind, ShapeRef};

/// The tag identifying a concrete subtype on the wire: a signed integer or
/// a UTF-8 string. (`nil` in alias position denotes the base type and is not
/// representable here.)
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum UnionAlias {
    /// Integer alias
    #[display("{_0}")]
    Int(i64),
    /// String alias
    #[display("{_0:?}")]
    Str(String),
}

impl From<i64> for UnionAlias {
    fn from(value: i64) -> Self {
        UnionAlias::Int(value)
    }
}
impl From<i32> for UnionAlias {
    fn from(value: i32) -> Self {
        UnionAlias::Int(i64::from(value))
    }
}
impl From<&str> for UnionAlias {
    fn from(value: &str) -> Self {
        UnionAlias::Str(value.to_owned())
    }
}
impl From<String> for UnionAlias {
    fn from(value: String) -> Self {
        UnionAlias::Str(value)
    }
}

type ArmBuild<T> = Arc<dyn Fn(&BuildCx<'_>) -> Result<UnionArm<T>> + Send + Sync>;
type BaseBuild<T> = Arc<dyn Fn(&BuildCx<'_>) -> Result<Arc<dyn Converter<T>>> + Send + Sync>;

/// Builds the subtype mapping table for a polymorphic base `T`.
///
/// Each subtype supplies its alias, its shape, a downcast probe (runtime
/// type test for serialization) and an upcast (for deserialization). An
/// optional base arm ([`base`](Self::base) or [`base_as`](Self::base_as))
/// handles values of the base type itself, tagged `nil` on the wire.
pub struct SubTypesBuilder<T: Send + Sync + 'static> {
    type_name: &'static str,
    base: Option<BaseBuild<T>>,
    arms: Vec<ArmBuild<T>>,
}

impl<T: Send + Sync + 'static> Default for SubTypesBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> SubTypesBuilder<T> {
    /// Starts an empty table
    #[must_use]
    pub fn new() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            base: None,
            arms: Vec::new(),
        }
    }

    /// Declares the shape used when a value is the base type itself
    #[must_use]
    pub fn base(mut self, shape: impl Into<ShapeRef<T>>) -> Self {
        let shape = shape.into();
        self.base = Some(Arc::new(move |cx| shape.resolve(cx)));
        self
    }

    /// Declares the base arm through a representation type `S`, for base
    /// types whose payload shape is declared against a projection (the
    /// usual case when `T` is an enum).
    #[must_use]
    pub fn base_as<S: Send + Sync + 'static>(
        mut self,
        shape: impl Into<ShapeRef<S>>,
        downcast: impl Fn(&T) -> Option<&S> + Send + Sync + 'static,
        upcast: impl Fn(S) -> T + Send + Sync + 'static,
    ) -> Self {
        let shape = shape.into();
        let downcast: Arc<dyn Fn(&T) -> Option<&S> + Send + Sync> = Arc::new(downcast);
        let upcast: Arc<dyn Fn(S) -> T + Send + Sync> = Arc::new(upcast);
        let type_name = self.type_name;
        self.base = Some(Arc::new(move |cx| {
            let c: Arc<dyn Converter<T>> = Arc::new(MappedConverter {
                inner: shape.resolve(cx)?,
                downcast: Arc::clone(&downcast),
                upcast: Arc::clone(&upcast),
                type_name,
            });
            Ok(c)
        }));
        self
    }

    /// Declares a subtype with its alias.
    ///
    /// `downcast` answers "is this value an `S`?" during serialization (the
    /// first matching arm in declaration order wins); `upcast` re-wraps a
    /// deserialized `S` as the base type.
    #[must_use]
    pub fn subtype<S: Send + Sync + 'static>(
        mut self,
        alias: impl Into<UnionAlias>,
        shape: impl Into<ShapeRef<S>>,
        downcast: impl Fn(&T) -> Option<&S> + Send + Sync + 'static,
        upcast: impl Fn(S) -> T + Send + Sync + 'static,
    ) -> Self {
        let alias = alias.into();
        let encoded_alias = match &alias {
            UnionAlias::Int(i) => {
                let mut buf = BytesMut::new();
                MSGPACK_FORMATTER.write_signed(&mut buf, *i);
                buf.to_vec()
            }
            UnionAlias::Str(s) => MSGPACK_FORMATTER.encode_str_token(s),
        };
        let shape = shape.into();
        let downcast = Arc::new(downcast);
        let upcast = Arc::new(upcast);
        let type_name = self.type_name;
        let build: ArmBuild<T> = Arc::new(move |cx| {
            let converter = shape.resolve(cx)?;
            Ok(UnionArm {
                alias: alias.clone(),
                encoded_alias: encoded_alias.clone(),
                matches: Box::new({
                    let downcast = Arc::clone(&downcast);
                    move |t| (*downcast)(t).is_some()
                }),
                write_payload: Box::new({
                    let downcast = Arc::clone(&downcast);
                    let converter = Arc::clone(&converter);
                    move |w, t, cx| match (*downcast)(t) {
                        Some(s) => converter.write(w, s, cx),
                        // matches() just said yes; a disagreeing downcast is
                        // a broken probe
                        None => Err(Error::UnknownSubtype(type_name)),
                    }
                }),
                read_payload: Box::new({
                    let upcast = Arc::clone(&upcast);
                    let converter = Arc::clone(&converter);
                    move |r, cx| Ok((*upcast)(converter.read(r, cx)?))
                }),
                prefer_async: converter.prefer_async(),
            })
        });
        self.arms.push(build);
        self
    }

    /// Finishes the table into a registerable union shape
    #[must_use]
    pub fn into_shape(self) -> Shape<T> {
        let Self {
            type_name,
            base,
            arms,
        } = self;
        let arms = Arc::new(arms);
        Shape::from_build(
            ShapeKind::Union,
            Box::new(move |cx| {
                let arms: Vec<UnionArm<T>> =
                    arms.iter().map(|a| (**a)(cx)).collect::<Result<Vec<_>>>()?;
                let mut by_int = HashMap::new();
                let mut by_str = HashMap::new();
                for (index, arm) in arms.iter().enumerate() {
                    let clash = match &arm.alias {
                        UnionAlias::Int(i) => by_int.insert(*i, index).is_some(),
                        UnionAlias::Str(s) => by_str.insert(s.clone(), index).is_some(),
                    };
                    if clash {
                        return Err(Error::Shape(format!(
                            "duplicate union alias {} on {type_name}",
                            arm.alias
                        )));
                    }
                }
                let base = match &base {
                    Some(build) => Some((**build)(cx)?),
                    None => None,
                };
                let c: Arc<dyn Converter<T>> = Arc::new(UnionConverter {
                    sub: SubTypes {
                        arms,
                        by_int,
                        by_str,
                        base,
                    },
                    type_name,
                });
                Ok(c)
            }),
        )
    }
}

impl<T: Send + Sync + 'static> Shape<T> {
    /// A shape for a polymorphic base type given its subtype table
    #[must_use]
    pub fn union(table: SubTypesBuilder<T>) -> Self {
        table.into_shape()
    }
}
