//! Nullable (Option) converter
// (c) 2025 Ross Younger

use std::sync::Arc;

use async_trait::async_trait;

use super::Converter;
use crate::context::SerializationContext;
use crate::error::Result;
use crate::io::{AsyncReader, AsyncWriter, Reader, Writer};
use crate::shape::{Shape, ShapeKind, ShapeRef};

/// Reads nil-or-delegate; writes nil-or-delegate.
struct NullableConverter<T: Send + Sync + 'static> {
    inner: Arc<dyn Converter<T>>,
}

#[async_trait]
impl<T: Send + Sync + 'static> Converter<Option<T>> for NullableConverter<T> {
    fn read(
        &self,
        reader: &mut Reader<'_>,
        context: &mut SerializationContext,
    ) -> Result<Option<T>> {
        if reader.try_consume_nil()? {
            return Ok(None);
        }
        Ok(Some(self.inner.read(reader, context)?))
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &Option<T>,
        context: &mut SerializationContext,
    ) -> Result<()> {
        match value {
            None => {
                writer.write_nil();
                Ok(())
            }
            Some(inner) => self.inner.write(writer, inner, context),
        }
    }

    fn prefer_async(&self) -> bool {
        self.inner.prefer_async()
    }

    async fn write_async(
        &self,
        writer: &mut AsyncWriter,
        value: &Option<T>,
        context: &mut SerializationContext,
    ) -> Result<()> {
        match value {
            None => {
                writer.writer().write_nil();
                writer.flush_if_appropriate(context).await
            }
            Some(inner) => self.inner.write_async(writer, inner, context).await,
        }
    }

    async fn read_async(
        &self,
        reader: &mut AsyncReader,
        context: &mut SerializationContext,
    ) -> Result<Option<T>> {
        // A nil probe decides the branch; the payload read streams as the
        // inner converter sees fit.
        use crate::format::DecodeResult;
        loop {
            let mut cursor = reader.streaming();
            match reader.deformatter().try_read_nil_option(&mut cursor) {
                DecodeResult::Success(true) => {
                    let consumed = cursor.consumed();
                    reader.commit(consumed);
                    return Ok(None);
                }
                DecodeResult::Success(false) | DecodeResult::TokenMismatch(_) => break,
                DecodeResult::InsufficientBuffer => {
                    if reader.fetch_more_bytes().await? == 0 {
                        return Err(crate::Error::NotEnoughBytes);
                    }
                }
                DecodeResult::EmptyBuffer => return Err(crate::Error::NotEnoughBytes),
            }
        }
        Ok(Some(self.inner.read_async(reader, context).await?))
    }
}

impl<T: Send + Sync + 'static> Shape<Option<T>> {
    /// A shape for `Option<T>`: the single nil byte, or `T`'s encoding
    #[must_use]
    pub fn nullable(inner: impl Into<ShapeRef<T>>) -> Self {
        let inner = inner.into();
        Shape::from_build(
            ShapeKind::Nullable,
            Box::new(move |cx| {
                let c: Arc<dyn Converter<Option<T>>> = Arc::new(NullableConverter {
                    inner: inner.resolve(cx)?,
                });
                Ok(c)
            }),
        )
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use crate::Serializer;
    use crate::shape::{Shape, ShapeRef};
    use pretty_assertions::assert_eq;

    #[test]
    fn nil_idempotence() {
        let mut ser = Serializer::default();
        ser.register(Shape::<Option<i32>>::nullable(ShapeRef::by_type()));

        // write(null) is exactly one byte 0xc0
        let wire = ser.to_vec(&None::<i32>).unwrap();
        assert_eq!(wire, vec![0xc0]);
        assert_eq!(ser.from_slice::<Option<i32>>(&wire).unwrap(), None);

        let wire = ser.to_vec(&Some(-5i32)).unwrap();
        assert_eq!(ser.from_slice::<Option<i32>>(&wire).unwrap(), Some(-5));
    }
}
