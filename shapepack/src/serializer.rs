//! The serializer facade
// (c) 2025 Ross Younger

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::BytesMut;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::cache::{BuildCx, ConverterCache};
use crate::context::SerializationContext;
use crate::convert::{Converter, PrimitiveValue as _};
use crate::error::Result;
use crate::io::{AsyncReader, AsyncWriter, Reader, Writer};
use crate::options::SerializerOptions;
use crate::shape::{Shape, ShapeProvider};
use crate::track::TrackerPool;

/// Owns the shape registry, the converter cache and the tracker pool; the
/// entry point for every (de)serialization.
///
/// Register the shapes of your types once, then call the conversion methods
/// from as many tasks as you like: independent calls share only the
/// immutable cache and registry. Shapes for every primitive,
/// [`Value`](crate::Value) and [`RawMessagePack`](crate::convert::RawMessagePack)
/// are pre-registered.
#[derive(Debug)]
pub struct Serializer {
    options: SerializerOptions,
    provider: ShapeProvider,
    cache: ConverterCache,
    trackers: TrackerPool,
    cancel: CancellationToken,
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new(SerializerOptions::default())
    }
}

impl Serializer {
    /// Creates a serializer with the given options
    #[must_use]
    pub fn new(options: SerializerOptions) -> Self {
        let mut provider = ShapeProvider::default();
        register_defaults(&mut provider);
        Self {
            options,
            provider,
            cache: ConverterCache::default(),
            trackers: TrackerPool::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// The options this serializer was built with
    #[must_use]
    pub fn options(&self) -> &SerializerOptions {
        &self.options
    }

    /// Installs a cancellation signal observed by every subsequent call
    pub fn set_cancellation_token(&mut self, token: CancellationToken) {
        self.cancel = token;
    }

    /// Registers the shape for `T`, replacing any previous registration.
    ///
    /// Registration must finish before conversions begin; shapes are
    /// immutable during a call.
    pub fn register<T: Send + Sync + 'static>(&mut self, shape: Shape<T>) {
        self.provider.register(shape);
    }

    /// The interned converter for `T`, for callers driving readers and
    /// writers themselves (partial access via `skip_to_property`, custom
    /// framing, and the like)
    pub fn converter<T: Send + Sync + 'static>(&self) -> Result<Arc<dyn Converter<T>>> {
        let cx = BuildCx {
            provider: &self.provider,
            cache: &self.cache,
            options: &self.options,
        };
        cx.converter_by_type::<T>()
    }

    fn new_context(&self) -> SerializationContext {
        let mut context =
            SerializationContext::new(&self.options).with_cancellation(self.cancel.clone());
        if self.options.preserve_references {
            context.set_tracker(self.trackers.take());
        }
        context
    }

    fn end_context(&self, mut context: SerializationContext) {
        if let Some(tracker) = context.take_tracker() {
            self.trackers.give_back(tracker);
        }
    }

    /// Serializes one value into a byte vector
    pub fn to_vec<T: Send + Sync + 'static>(&self, value: &T) -> Result<Vec<u8>> {
        let converter = self.converter::<T>()?;
        let mut context = self.new_context();
        let mut buf = BytesMut::new();
        let result = {
            let mut writer = Writer::new(&mut buf);
            converter.write(&mut writer, value, &mut context)
        };
        self.end_context(context);
        result?;
        trace!(bytes = buf.len(), "serialized");
        Ok(buf.to_vec())
    }

    /// Deserializes one value from a fully buffered byte slice.
    ///
    /// Exactly one top-level structure is consumed; trailing bytes are left
    /// untouched (callers streaming several structures use
    /// [`read_async`](Self::read_async) or their own [`Reader`]).
    pub fn from_slice<T: Send + Sync + 'static>(&self, bytes: &[u8]) -> Result<T> {
        let converter = self.converter::<T>()?;
        let mut context = self.new_context();
        let result = {
            let mut reader = Reader::new(bytes);
            converter.read(&mut reader, &mut context)
        };
        self.end_context(context);
        result
    }

    /// Serializes one value into an async writer, flushing when complete
    pub async fn write_async<T: Send + Sync + 'static>(
        &self,
        writer: &mut AsyncWriter,
        value: &T,
    ) -> Result<()> {
        let converter = self.converter::<T>()?;
        let mut context = self.new_context();
        let result = async {
            converter.write_async(writer, value, &mut context).await?;
            writer.flush(&context).await
        }
        .await;
        self.end_context(context);
        result
    }

    /// Deserializes one value from an async reader, fetching as needed
    pub async fn read_async<T: Send + Sync + 'static>(
        &self,
        reader: &mut AsyncReader,
    ) -> Result<T> {
        let converter = self.converter::<T>()?;
        let mut context = self.new_context();
        let result = converter.read_async(reader, &mut context).await;
        self.end_context(context);
        result
    }
}

/// Shapes every serializer knows without registration.
fn register_defaults(provider: &mut ShapeProvider) {
    provider.register(bool::shape());
    provider.register(u8::shape());
    provider.register(u16::shape());
    provider.register(u32::shape());
    provider.register(u64::shape());
    provider.register(i8::shape());
    provider.register(i16::shape());
    provider.register(i32::shape());
    provider.register(i64::shape());
    provider.register(f32::shape());
    provider.register(f64::shape());
    provider.register(char::shape());
    provider.register(String::shape());
    provider.register(<Vec<u8>>::shape());
    provider.register(SystemTime::shape());
    provider.register(Duration::shape());
    provider.register(Shape::value());
    provider.register(Shape::raw());
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::Serializer;
    use crate::error::Error;
    use assertables::{assert_contains, assert_matches};
    use pretty_assertions::assert_eq;

    #[test]
    fn primitive_int_scenario() {
        let ser = Serializer::default();
        let wire = ser.to_vec(&127i32).unwrap();
        assert_eq!(wire, vec![0x7f]);
        assert_eq!(ser.from_slice::<i32>(&wire).unwrap(), 127);
    }

    #[test]
    fn unregistered_type_is_a_shape_error() {
        struct Unregistered;
        let ser = Serializer::default();
        let e = ser.to_vec(&Unregistered).unwrap_err();
        let Error::Shape(msg) = e else {
            panic!("wanted a shape error, got {e}");
        };
        assert_contains!(msg, "Unregistered");
    }

    #[test]
    fn cancellation_is_observed() {
        let token = tokio_util::sync::CancellationToken::new();
        let mut ser = Serializer::default();
        ser.set_cancellation_token(token.clone());
        ser.register(crate::shape::Shape::<Vec<i32>>::array(
            crate::shape::ShapeRef::by_type(),
        ));
        token.cancel();
        assert_matches!(ser.to_vec(&vec![1i32]), Err(Error::Cancelled));
    }

    #[test]
    fn trailing_bytes_are_left_alone() {
        let ser = Serializer::default();
        assert_eq!(ser.from_slice::<u8>(&[0x07, 0xc0]).unwrap(), 7);
    }
}
