//! Polymorphic (discriminated-union) converter
// (c) 2025 Ross Younger
//!
//! Wire layout: an array of length 2, `[alias, payload]`. The alias is
//! `nil` (denoting the base type itself), a signed integer, or a UTF-8
//! string; the payload is the concrete subtype's encoding. Aliases are
//! pre-encoded at registration and emitted raw, so the bytes on the wire are
//! exactly those declared.
//!
//! A nil *value* is not this converter's business: `Option<TBase>` through
//! the nullable wrapper emits the single nil scalar.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::Converter;
use super::object::WriteFn;
use crate::context::SerializationContext;
use crate::error::{Error, Result};
use crate::format::TypeCode;
use crate::io::{AsyncReader, Reader, Writer};
use crate::shape::UnionAlias;

pub(crate) type ReadPayloadFn<T> =
    Box<dyn Fn(&mut Reader<'_>, &mut SerializationContext) -> Result<T> + Send + Sync>;

/// One declared subtype: its alias, its probe, and its payload codecs.
pub(crate) struct UnionArm<T> {
    pub(crate) alias: UnionAlias,
    pub(crate) encoded_alias: Vec<u8>,
    pub(crate) matches: Box<dyn Fn(&T) -> bool + Send + Sync>,
    pub(crate) write_payload: WriteFn<T>,
    pub(crate) read_payload: ReadPayloadFn<T>,
    pub(crate) prefer_async: bool,
}

/// The dispatch table: arms plus the three lookup indices.
pub(crate) struct SubTypes<T> {
    pub(crate) arms: Vec<UnionArm<T>>,
    pub(crate) by_int: HashMap<i64, usize>,
    pub(crate) by_str: HashMap<String, usize>,
    pub(crate) base: Option<Arc<dyn Converter<T>>>,
}

pub(crate) struct UnionConverter<T> {
    pub(crate) sub: SubTypes<T>,
    pub(crate) type_name: &'static str,
}

/// Adapts a converter for a representation type `S` into one for `T`,
/// through a downcast/upcast pair. Used for a union's base arm, whose
/// payload shape is declared against the base representation.
pub(crate) struct MappedConverter<T, S: Send + Sync + 'static> {
    pub(crate) inner: Arc<dyn Converter<S>>,
    pub(crate) downcast: Arc<dyn Fn(&T) -> Option<&S> + Send + Sync>,
    pub(crate) upcast: Arc<dyn Fn(S) -> T + Send + Sync>,
    pub(crate) type_name: &'static str,
}

#[async_trait]
impl<T, S> Converter<T> for MappedConverter<T, S>
where
    T: Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    fn read(&self, reader: &mut Reader<'_>, context: &mut SerializationContext) -> Result<T> {
        Ok((*self.upcast)(self.inner.read(reader, context)?))
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        context: &mut SerializationContext,
    ) -> Result<()> {
        match (*self.downcast)(value) {
            Some(inner) => self.inner.write(writer, inner, context),
            None => Err(Error::UnknownSubtype(self.type_name)),
        }
    }

    fn prefer_async(&self) -> bool {
        self.inner.prefer_async()
    }
}

enum Pick {
    Base,
    Arm(usize),
}

impl<T: Send + Sync + 'static> UnionConverter<T> {
    /// Reads and resolves the alias element, leaving the reader at the payload.
    fn pick_arm(&self, reader: &mut Reader<'_>) -> Result<Pick> {
        if reader.try_consume_nil()? {
            if self.sub.base.is_none() {
                return Err(Error::UnknownAlias("nil".to_owned()));
            }
            return Ok(Pick::Base);
        }
        match reader.peek_next_type()? {
            TypeCode::Integer => {
                let alias = reader.read_i64()?;
                let index = self
                    .sub
                    .by_int
                    .get(&alias)
                    .ok_or_else(|| Error::UnknownAlias(alias.to_string()))?;
                Ok(Pick::Arm(*index))
            }
            TypeCode::String => {
                let alias = std::str::from_utf8(reader.read_string_span()?)?;
                let index = self
                    .sub
                    .by_str
                    .get(alias)
                    .ok_or_else(|| Error::UnknownAlias(alias.to_owned()))?;
                Ok(Pick::Arm(*index))
            }
            _ => Err(Error::InvalidCode {
                code: reader.peek_next_code()?,
                reading: "union alias",
            }),
        }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Converter<T> for UnionConverter<T> {
    fn read(&self, reader: &mut Reader<'_>, context: &mut SerializationContext) -> Result<T> {
        context.depth_step(|context| {
            let len = reader.read_array_header()?;
            if len != 2 {
                return Err(Error::UnexpectedLength {
                    expected: 2,
                    actual: len,
                });
            }
            match self.pick_arm(reader)? {
                Pick::Base => self
                    .sub
                    .base
                    .as_ref()
                    .ok_or_else(|| Error::UnknownAlias("nil".to_owned()))?
                    .read(reader, context),
                Pick::Arm(index) => (self.sub.arms[index].read_payload)(reader, context),
            }
        })
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        context: &mut SerializationContext,
    ) -> Result<()> {
        context.depth_step(|context| {
            let arm = self.sub.arms.iter().find(|a| (a.matches)(value));
            if arm.is_none() && self.sub.base.is_none() {
                return Err(Error::UnknownSubtype(self.type_name));
            }
            writer.write_array_start(2);
            match arm {
                Some(arm) => {
                    trace!(alias = %arm.alias, "union dispatch");
                    writer.write_raw(&arm.encoded_alias);
                    writer.write_array_element_separator();
                    (arm.write_payload)(writer, value, context)?;
                }
                None => {
                    // The value is the base type itself
                    writer.write_nil();
                    writer.write_array_element_separator();
                    if let Some(base) = &self.sub.base {
                        base.write(writer, value, context)?;
                    }
                }
            }
            writer.write_array_end();
            Ok(())
        })
    }

    fn prefer_async(&self) -> bool {
        self.sub.arms.iter().any(|a| a.prefer_async)
            || self.sub.base.as_ref().is_some_and(|b| b.prefer_async())
    }

    async fn read_async(
        &self,
        reader: &mut AsyncReader,
        context: &mut SerializationContext,
    ) -> Result<T> {
        context.depth_enter()?;
        let len = super::read_array_header_streaming(reader, context).await?;
        if len != 2 {
            return Err(Error::UnexpectedLength {
                expected: 2,
                actual: len,
            });
        }
        // The alias is one small structure; buffer it, decide, then buffer
        // the payload and decode it off contiguous memory.
        reader.buffer_next_structure(context).await?;
        let (pick, consumed) = {
            let mut r = reader.reader();
            let pick = self.pick_arm(&mut r)?;
            (pick, r.position())
        };
        reader.commit(consumed);

        reader.buffer_next_structure(context).await?;
        let mut r = reader.reader();
        let value = match pick {
            Pick::Base => self
                .sub
                .base
                .as_ref()
                .ok_or_else(|| Error::UnknownAlias("nil".to_owned()))?
                .read(&mut r, context)?,
            Pick::Arm(index) => (self.sub.arms[index].read_payload)(&mut r, context)?,
        };
        let consumed = r.position();
        reader.commit(consumed);
        context.depth_exit();
        Ok(value)
    }
}
