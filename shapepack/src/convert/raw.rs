//! Raw MessagePack pass-through
// (c) 2025 Ross Younger

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::Converter;
use crate::context::SerializationContext;
use crate::error::{Error, Result};
use crate::io::{Reader, Writer};
use crate::shape::{Shape, ShapeKind};

/// One pre-encoded structure, carried opaquely.
///
/// Reading always copies: the source buffer's lifetime is not guaranteed
/// past the call, so no borrowed view escapes the converter boundary.
/// Writing an empty value raises: it almost always means an uninitialised
/// struct field, and emitting nothing would corrupt the stream framing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessagePack(Bytes);

impl RawMessagePack {
    /// Wraps pre-encoded bytes. The caller asserts they form exactly one
    /// complete structure.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// The encoded bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encoded length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the default (uninitialised) value
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for RawMessagePack {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

struct RawConverter;

#[async_trait]
impl Converter<RawMessagePack> for RawConverter {
    fn read(
        &self,
        reader: &mut Reader<'_>,
        context: &mut SerializationContext,
    ) -> Result<RawMessagePack> {
        Ok(RawMessagePack::from(reader.read_raw_structure(context)?))
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &RawMessagePack,
        _context: &mut SerializationContext,
    ) -> Result<()> {
        if value.is_empty() {
            return Err(Error::NotSupported("writing an empty RawMessagePack"));
        }
        writer.write_raw(value.as_bytes());
        Ok(())
    }
}

impl Shape<RawMessagePack> {
    /// The pass-through shape
    #[must_use]
    pub fn raw() -> Self {
        Shape::from_build(
            ShapeKind::Raw,
            Box::new(|_| {
                let c: Arc<dyn Converter<RawMessagePack>> = Arc::new(RawConverter);
                Ok(c)
            }),
        )
    }
}
