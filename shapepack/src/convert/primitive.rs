//! Primitive converters
// (c) 2025 Ross Younger

use std::marker::PhantomData;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use super::Converter;
use crate::context::SerializationContext;
use crate::error::{Error, Result};
use crate::io::{Reader, Writer};
use crate::shape::{Shape, ShapeKind};

/// A scalar with a direct token encoding and a singleton shape.
///
/// The set of implementors is the primitive table; resolution is driven by
/// the static type argument, with each entry instantiated lazily and shared
/// for the process lifetime.
pub trait PrimitiveValue: Sized + Send + Sync + 'static {
    /// Diagnostic name
    const NAME: &'static str;

    /// The singleton shape for this primitive
    fn shape() -> Shape<Self>;

    /// Decodes one token (or fixed token group) into a value
    fn read_value(reader: &mut Reader<'_>) -> Result<Self>;

    /// Encodes a value as one token (or fixed token group)
    fn write_value(writer: &mut Writer<'_>, value: &Self);
}

/// The converter behind every [`PrimitiveValue`]: a thin delegation to the
/// deformatter/formatter.
struct PrimitiveConverter<P>(PhantomData<P>);

impl<P> Default for PrimitiveConverter<P> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

#[async_trait]
impl<P: PrimitiveValue> Converter<P> for PrimitiveConverter<P> {
    fn read(&self, reader: &mut Reader<'_>, _context: &mut SerializationContext) -> Result<P> {
        P::read_value(reader)
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &P,
        _context: &mut SerializationContext,
    ) -> Result<()> {
        P::write_value(writer, value);
        Ok(())
    }
}

impl<P: PrimitiveValue> Shape<P> {
    /// The singleton shape for a primitive type
    #[must_use]
    pub fn primitive() -> Shape<P> {
        P::shape()
    }
}

impl<P: PrimitiveValue> crate::shape::ShapeRef<P> {
    /// References a primitive's singleton shape inline
    #[must_use]
    pub fn primitive() -> Self {
        crate::shape::ShapeRef::Inline(P::shape())
    }
}

macro_rules! primitive_value {
    ($t:ty, $name:literal, |$r:ident| $read:expr, |$w:ident, $v:ident| $write:expr) => {
        impl PrimitiveValue for $t {
            const NAME: &'static str = $name;

            fn shape() -> Shape<Self> {
                static SHAPE: LazyLock<Shape<$t>> = LazyLock::new(|| {
                    Shape::from_build(
                        ShapeKind::Primitive,
                        Box::new(|_| {
                            let c: Arc<dyn Converter<$t>> =
                                Arc::new(PrimitiveConverter::<$t>::default());
                            Ok(c)
                        }),
                    )
                });
                SHAPE.clone()
            }

            fn read_value($r: &mut Reader<'_>) -> Result<Self> {
                $read
            }

            fn write_value($w: &mut Writer<'_>, $v: &Self) {
                $write
            }
        }
    };
}

primitive_value!(bool, "bool", |r| r.read_bool(), |w, v| w.write_bool(*v));
primitive_value!(u8, "u8", |r| r.read_u8(), |w, v| w.write_u8(*v));
primitive_value!(u16, "u16", |r| r.read_u16(), |w, v| w.write_u16(*v));
primitive_value!(u32, "u32", |r| r.read_u32(), |w, v| w.write_u32(*v));
primitive_value!(u64, "u64", |r| r.read_u64(), |w, v| w.write_u64(*v));
primitive_value!(i8, "i8", |r| r.read_i8(), |w, v| w.write_i8(*v));
primitive_value!(i16, "i16", |r| r.read_i16(), |w, v| w.write_i16(*v));
primitive_value!(i32, "i32", |r| r.read_i32(), |w, v| w.write_i32(*v));
primitive_value!(i64, "i64", |r| r.read_i64(), |w, v| w.write_i64(*v));
primitive_value!(f32, "f32", |r| r.read_f32(), |w, v| w.write_f32(*v));
primitive_value!(f64, "f64", |r| r.read_f64(), |w, v| w.write_f64(*v));
primitive_value!(char, "char", |r| r.read_char(), |w, v| w.write_char(*v));
primitive_value!(String, "string", |r| r.read_string(), |w, v| w
    .write_str(v));
primitive_value!(
    Vec<u8>,
    "bytes",
    |r| Ok(r.read_binary()?.to_vec()),
    |w, v| w.write_bytes(v)
);
primitive_value!(SystemTime, "timestamp", |r| r.read_timestamp(), |w, v| w
    .write_timestamp(*v));

// Durations have no MessagePack encoding of their own; they travel as a
// two-element array [seconds, subsecond nanos].
primitive_value!(
    Duration,
    "duration",
    |r| {
        let len = r.read_array_header()?;
        if len != 2 {
            return Err(Error::UnexpectedLength {
                expected: 2,
                actual: len,
            });
        }
        let secs = r.read_u64()?;
        let nanos = r.read_u32()?;
        if nanos >= 1_000_000_000 {
            return Err(Error::IntegerOutOfRange {
                value: i128::from(nanos),
                target: "subsecond nanos",
            });
        }
        Ok(Duration::new(secs, nanos))
    },
    |w, v| {
        w.write_array_start(2);
        w.write_u64(v.as_secs());
        w.write_array_element_separator();
        w.write_u32(v.subsec_nanos());
        w.write_array_end();
    }
);

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::PrimitiveValue;
    use crate::io::{Reader, Writer};
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;
    use std::time::{Duration, SystemTime};

    fn roundtrip<P: PrimitiveValue + PartialEq + std::fmt::Debug>(value: P) {
        let mut buf = BytesMut::new();
        let mut w = Writer::new(&mut buf);
        P::write_value(&mut w, &value);
        let wire = buf.to_vec();
        let mut r = Reader::new(&wire);
        assert_eq!(P::read_value(&mut r).unwrap(), value);
        assert!(r.is_empty(), "trailing bytes after {}", P::NAME);
    }

    #[test]
    fn scalar_roundtrips() {
        roundtrip(true);
        roundtrip(0u8);
        roundtrip(60_000u16);
        roundtrip(u64::MAX);
        roundtrip(-1i8);
        roundtrip(i64::MIN);
        roundtrip(1.25f32);
        roundtrip(-0.5f64);
        roundtrip('é');
        roundtrip("schema-driven".to_owned());
        roundtrip(vec![0u8, 255, 3]);
        roundtrip(SystemTime::now());
        roundtrip(Duration::new(90, 125_000_000));
    }

    #[test]
    fn duration_rejects_wrong_arity() {
        // [1] rather than [secs, nanos]
        let wire = [0x91, 0x01];
        let mut r = Reader::new(&wire);
        assert!(matches!(
            Duration::read_value(&mut r),
            Err(crate::Error::UnexpectedLength {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn shape_is_singleton() {
        assert_eq!(u32::shape().id(), u32::shape().id());
    }
}
