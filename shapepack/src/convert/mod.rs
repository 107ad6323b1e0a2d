//! # The converter hierarchy
// (c) 2025 Ross Younger
//!
//! A [`Converter<T>`] is the per-type codec: it composes token-level reads
//! and writes into `T`'s wire layout. Each type has exactly one active
//! converter, resolved lazily through the serializer's converter cache from
//! its registered [`Shape`](crate::shape::Shape).
//!
//! Converters are long-lived and shared (`Arc`); all per-call state lives in
//! the [`SerializationContext`]. Every successful `read` consumes exactly
//! one top-level structure; every successful `write` emits exactly one.
//!
//! The async methods default to buffering one whole structure and delegating
//! to the sync path; converters for large aggregates override them to stream
//! element-by-element and flush between records.

mod primitive;
pub use primitive::PrimitiveValue;

mod nullable;
mod sequence;
pub use sequence::CollectionAccess;
mod multidim;
pub use multidim::{MultiDimArray, MultiDimLayout};
mod dictionary;
pub use dictionary::MapLike;
pub(crate) mod object;
mod enums;
pub(crate) mod union;
mod delayed;
pub(crate) use delayed::DelayedConverter;
mod raw;
pub use raw::RawMessagePack;
mod indirect;
pub use indirect::BACKREF_EXTENSION_TYPE;
mod value;

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::SerializationContext;
use crate::error::{Error, Result};
use crate::io::{AsyncReader, AsyncWriter, Reader, Writer};
use crate::shape::{Shape, ShapeKind};

/// A codec for values of type `T`.
///
/// Implementations must be stateless with respect to individual calls;
/// everything per-call travels in the [`SerializationContext`].
#[async_trait]
pub trait Converter<T: Send + Sync + 'static>: Send + Sync {
    /// Decodes one value, consuming exactly one top-level structure
    fn read(&self, reader: &mut Reader<'_>, context: &mut SerializationContext) -> Result<T>;

    /// Encodes one value, emitting exactly one top-level structure
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        context: &mut SerializationContext,
    ) -> Result<()>;

    /// True iff this converter (or any constituent) performs best on the
    /// streaming path
    fn prefer_async(&self) -> bool {
        false
    }

    /// Decodes one value from an async reader.
    ///
    /// The default buffers the next whole structure, then runs the sync path
    /// over the buffered region.
    async fn read_async(
        &self,
        reader: &mut AsyncReader,
        context: &mut SerializationContext,
    ) -> Result<T> {
        reader.buffer_next_structure(context).await?;
        let mut r = reader.reader();
        let value = self.read(&mut r, context)?;
        let consumed = r.position();
        reader.commit(consumed);
        Ok(value)
    }

    /// Encodes one value into an async writer.
    ///
    /// The default stages the sync encoding, then flushes if the staging
    /// buffer has crossed the context's threshold.
    async fn write_async(
        &self,
        writer: &mut AsyncWriter,
        value: &T,
        context: &mut SerializationContext,
    ) -> Result<()> {
        {
            let mut w = writer.writer();
            self.write(&mut w, value, context)?;
        }
        writer.flush_if_appropriate(context).await
    }

    /// Positions `reader` at the value of the named property, if present.
    ///
    /// Supported by object-as-map converters only. Returns true with the
    /// reader positioned at the property's value, or false having consumed
    /// the whole object.
    fn skip_to_property(
        &self,
        _reader: &mut Reader<'_>,
        _name: &str,
        _context: &mut SerializationContext,
    ) -> Result<bool> {
        Err(Error::NotSupported("skip_to_property on this converter"))
    }

    /// Positions `reader` at the element with the given index, if present.
    ///
    /// Supported by positional (array-layout) converters only.
    fn skip_to_index(
        &self,
        _reader: &mut Reader<'_>,
        _index: usize,
        _context: &mut SerializationContext,
    ) -> Result<bool> {
        Err(Error::NotSupported("skip_to_index on this converter"))
    }
}

impl<T: Send + Sync + 'static> Shape<T> {
    /// Wraps a hand-written converter as a registerable shape.
    ///
    /// The escape hatch for types none of the built-in shape kinds fit.
    #[must_use]
    pub fn custom(converter: Arc<dyn Converter<T>>) -> Self {
        Shape::from_build(
            ShapeKind::Custom,
            Box::new(move |_| Ok(converter.clone())),
        )
    }
}

/// Streams an array header out of an async reader, refilling as needed.
pub(crate) async fn read_array_header_streaming(
    reader: &mut AsyncReader,
    context: &mut SerializationContext,
) -> Result<usize> {
    use crate::format::DecodeResult;
    loop {
        context.check_cancelled()?;
        let mut cursor = reader.streaming();
        match reader.deformatter().try_read_array_header(&mut cursor) {
            DecodeResult::Success(n) => {
                let consumed = cursor.consumed();
                reader.commit(consumed);
                return Ok(n);
            }
            DecodeResult::InsufficientBuffer => {
                let _ = reader.fetch_more_bytes().await?;
            }
            DecodeResult::EmptyBuffer => return Err(Error::NotEnoughBytes),
            DecodeResult::TokenMismatch(code) => {
                return Err(Error::InvalidCode {
                    code,
                    reading: "array header",
                });
            }
        }
    }
}

/// Streams a map header out of an async reader, refilling as needed.
pub(crate) async fn read_map_header_streaming(
    reader: &mut AsyncReader,
    context: &mut SerializationContext,
) -> Result<usize> {
    use crate::format::DecodeResult;
    loop {
        context.check_cancelled()?;
        let mut cursor = reader.streaming();
        match reader.deformatter().try_read_map_header(&mut cursor) {
            DecodeResult::Success(n) => {
                let consumed = cursor.consumed();
                reader.commit(consumed);
                return Ok(n);
            }
            DecodeResult::InsufficientBuffer => {
                let _ = reader.fetch_more_bytes().await?;
            }
            DecodeResult::EmptyBuffer => return Err(Error::NotEnoughBytes),
            DecodeResult::TokenMismatch(code) => {
                return Err(Error::InvalidCode {
                    code,
                    reading: "map header",
                });
            }
        }
    }
}

/// Initial-capacity clamp for length-prefixed aggregates; a hostile header
/// must not translate directly into an allocation.
pub(crate) const PREALLOC_LIMIT: usize = 1024;
