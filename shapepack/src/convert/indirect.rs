//! Indirection converters: Box, Arc, and reference preservation
// (c) 2025 Ross Younger
//!
//! `Box<T>` is a plain indirection. `Arc<T>` additionally participates in
//! reference preservation when the serializer was built with
//! `preserve_references`: the first occurrence of a given `Arc` serializes
//! its payload normally, and every later occurrence emits only a backref:
//! a MessagePack extension of type [`BACKREF_EXTENSION_TYPE`] whose payload
//! is the msgpack-encoded unsigned index of the first occurrence.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;

use super::Converter;
use crate::context::SerializationContext;
use crate::error::{Error, Result};
use crate::format::{Formatter as _, MSGPACK_FORMATTER, TypeCode};
use crate::io::{Reader, Writer};
use crate::shape::{Shape, ShapeKind, ShapeRef};
use crate::track::WriteTrack;

/// Reserved application extension type code for backrefs.
pub const BACKREF_EXTENSION_TYPE: i8 = 0x72;

/// Plain `Box<T>` indirection.
struct BoxedConverter<T: Send + Sync + 'static> {
    inner: Arc<dyn Converter<T>>,
}

#[async_trait]
impl<T: Send + Sync + 'static> Converter<Box<T>> for BoxedConverter<T> {
    fn read(&self, reader: &mut Reader<'_>, context: &mut SerializationContext) -> Result<Box<T>> {
        Ok(Box::new(self.inner.read(reader, context)?))
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &Box<T>,
        context: &mut SerializationContext,
    ) -> Result<()> {
        self.inner.write(writer, value, context)
    }

    fn prefer_async(&self) -> bool {
        self.inner.prefer_async()
    }
}

/// Plain `Arc<T>` indirection, when reference preservation is off.
struct SharedConverter<T: Send + Sync + 'static> {
    inner: Arc<dyn Converter<T>>,
}

#[async_trait]
impl<T: Send + Sync + 'static> Converter<Arc<T>> for SharedConverter<T> {
    fn read(&self, reader: &mut Reader<'_>, context: &mut SerializationContext) -> Result<Arc<T>> {
        Ok(Arc::new(self.inner.read(reader, context)?))
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &Arc<T>,
        context: &mut SerializationContext,
    ) -> Result<()> {
        self.inner.write(writer, value, context)
    }

    fn prefer_async(&self) -> bool {
        self.inner.prefer_async()
    }
}

/// The identity-tracking wrapper for `Arc<T>`.
struct ReferencePreservingConverter<T: Send + Sync + 'static> {
    inner: Arc<dyn Converter<T>>,
}

#[async_trait]
impl<T: Send + Sync + 'static> Converter<Arc<T>> for ReferencePreservingConverter<T> {
    fn read(&self, reader: &mut Reader<'_>, context: &mut SerializationContext) -> Result<Arc<T>> {
        if context.tracker_mut().is_none() {
            return Ok(Arc::new(self.inner.read(reader, context)?));
        }
        if reader.peek_next_type()? == TypeCode::Extension {
            let (type_code, payload) = reader.read_extension()?;
            if type_code != BACKREF_EXTENSION_TYPE {
                return Err(Error::Shape(format!(
                    "unexpected extension type {type_code} where a backref was expected"
                )));
            }
            let index = Reader::new(payload).read_u32()?;
            let tracker = context
                .tracker_mut()
                .ok_or_else(|| Error::Shape("reference tracker vanished mid-read".to_owned()))?;
            return tracker.resolve_read::<T>(index);
        }
        let value = Arc::new(self.inner.read(reader, context)?);
        if let Some(tracker) = context.tracker_mut() {
            let _ = tracker.register_read(value.clone());
        }
        Ok(value)
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &Arc<T>,
        context: &mut SerializationContext,
    ) -> Result<()> {
        let identity = Arc::as_ptr(value) as usize;
        let Some(tracker) = context.tracker_mut() else {
            return self.inner.write(writer, value, context);
        };
        match tracker.note_for_write(identity) {
            WriteTrack::Seen(index) => {
                let mut payload = BytesMut::new();
                MSGPACK_FORMATTER.write_unsigned(&mut payload, u64::from(index));
                writer.write_extension(BACKREF_EXTENSION_TYPE, &payload);
                Ok(())
            }
            WriteTrack::First(_) => self.inner.write(writer, value, context),
        }
    }

    fn prefer_async(&self) -> bool {
        self.inner.prefer_async()
    }
}

impl<T: Send + Sync + 'static> Shape<Box<T>> {
    /// A shape for `Box<T>`, encoded exactly as `T`
    #[must_use]
    pub fn boxed(inner: impl Into<ShapeRef<T>>) -> Self {
        let inner = inner.into();
        Shape::from_build(
            ShapeKind::Reference,
            Box::new(move |cx| {
                let c: Arc<dyn Converter<Box<T>>> = Arc::new(BoxedConverter {
                    inner: inner.resolve(cx)?,
                });
                Ok(c)
            }),
        )
    }
}

impl<T: Send + Sync + 'static> Shape<Arc<T>> {
    /// A shape for `Arc<T>`: encoded as `T`, with identity preserved across
    /// the wire when the serializer enables `preserve_references`
    #[must_use]
    pub fn shared(inner: impl Into<ShapeRef<T>>) -> Self {
        let inner = inner.into();
        Shape::from_build(
            ShapeKind::Reference,
            Box::new(move |cx| {
                let resolved = inner.resolve(cx)?;
                let c: Arc<dyn Converter<Arc<T>>> = if cx.options().preserve_references {
                    Arc::new(ReferencePreservingConverter { inner: resolved })
                } else {
                    Arc::new(SharedConverter { inner: resolved })
                };
                Ok(c)
            }),
        )
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::BACKREF_EXTENSION_TYPE;
    use crate::options::SerializerOptions;
    use crate::shape::{Shape, ShapeRef};
    use crate::Serializer;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn preserving_serializer() -> Serializer {
        let mut ser = Serializer::new(SerializerOptions {
            preserve_references: true,
            ..SerializerOptions::default()
        });
        ser.register(Shape::<Arc<String>>::shared(ShapeRef::<String>::by_type()));
        ser.register(Shape::<Vec<Arc<String>>>::array(ShapeRef::by_type()));
        ser
    }

    #[test]
    fn repeated_reference_becomes_backref() {
        let ser = preserving_serializer();
        let shared = Arc::new("hello".to_owned());
        let value = vec![shared.clone(), shared.clone()];
        let wire = ser.to_vec(&value).unwrap();
        // [str, fixext1 backref 0]
        assert_eq!(
            wire,
            vec![
                0x92, 0xa5, b'h', b'e', b'l', b'l', b'o', // first occurrence
                0xd4, BACKREF_EXTENSION_TYPE as u8, 0x00, // backref #0
            ]
        );

        let back: Vec<Arc<String>> = ser.from_slice(&wire).unwrap();
        assert_eq!(*back[0], "hello");
        // Identity, not just equality
        assert!(Arc::ptr_eq(&back[0], &back[1]));
    }

    #[test]
    fn distinct_references_stay_distinct() {
        let ser = preserving_serializer();
        let value = vec![Arc::new("a".to_owned()), Arc::new("a".to_owned())];
        let wire = ser.to_vec(&value).unwrap();
        let back: Vec<Arc<String>> = ser.from_slice(&wire).unwrap();
        assert_eq!(*back[0], *back[1]);
        assert!(!Arc::ptr_eq(&back[0], &back[1]));
    }

    #[test]
    fn without_preservation_payload_is_duplicated() {
        let mut ser = Serializer::default();
        ser.register(Shape::<Arc<String>>::shared(ShapeRef::<String>::by_type()));
        ser.register(Shape::<Vec<Arc<String>>>::array(ShapeRef::by_type()));
        let shared = Arc::new("x".to_owned());
        let wire = ser.to_vec(&vec![shared.clone(), shared]).unwrap();
        assert_eq!(wire, vec![0x92, 0xa1, b'x', 0xa1, b'x']);
    }
}
