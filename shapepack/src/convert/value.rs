//! Converter for untyped values
// (c) 2025 Ross Younger

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;

use super::{Converter, PREALLOC_LIMIT};
use crate::context::SerializationContext;
use crate::error::{Error, Result};
use crate::format::{FloatToken, IntegerToken, TypeCode};
use crate::format::msgpack::TIMESTAMP_EXTENSION_TYPE;
use crate::io::{Reader, Writer};
use crate::shape::{Shape, ShapeKind};
use crate::value::{Value, ValueMap};

/// Reads whatever single structure is next into a [`Value`]; writes a
/// [`Value`] back as the corresponding tokens.
struct ValueConverter;

#[async_trait]
impl Converter<Value> for ValueConverter {
    fn read(&self, reader: &mut Reader<'_>, context: &mut SerializationContext) -> Result<Value> {
        match reader.peek_next_type()? {
            TypeCode::Nil => {
                reader.read_nil()?;
                Ok(Value::Nil)
            }
            TypeCode::Boolean => Ok(Value::Bool(reader.read_bool()?)),
            TypeCode::Integer => Ok(match reader.read_integer()? {
                IntegerToken::Signed(i) => Value::Signed(i),
                IntegerToken::Unsigned(u) => Value::Unsigned(u),
            }),
            TypeCode::Float => Ok(match reader.read_float()? {
                FloatToken::F32(v) => Value::F32(v),
                FloatToken::F64(v) => Value::F64(v),
            }),
            TypeCode::String => Ok(Value::String(reader.read_string()?)),
            TypeCode::Binary => Ok(Value::Bytes(reader.read_binary()?.to_vec())),
            TypeCode::Vector => context.depth_step(|context| {
                let len = reader.read_array_header()?;
                let mut items = Vec::with_capacity(len.min(PREALLOC_LIMIT));
                for _ in 0..len {
                    items.push(self.read(reader, context)?);
                }
                Ok(Value::Array(items))
            }),
            TypeCode::Map => context.depth_step(|context| {
                let count = reader.read_map_header()?;
                let mut map = ValueMap::new();
                for _ in 0..count {
                    let key = self.read(reader, context)?;
                    let value = self.read(reader, context)?;
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }),
            TypeCode::Extension => {
                if reader.peek_extension_type()? == TIMESTAMP_EXTENSION_TYPE {
                    Ok(Value::Timestamp(reader.read_timestamp()?))
                } else {
                    let (type_code, payload) = reader.read_extension()?;
                    Ok(Value::Extension(type_code, payload.to_vec()))
                }
            }
            TypeCode::Unknown => Err(Error::InvalidCode {
                code: reader.peek_next_code()?,
                reading: "value",
            }),
        }
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &Value,
        context: &mut SerializationContext,
    ) -> Result<()> {
        match value {
            Value::Nil => writer.write_nil(),
            Value::Bool(b) => writer.write_bool(*b),
            Value::Signed(i) => writer.write_i64(*i),
            Value::Unsigned(u) => writer.write_u64(*u),
            Value::F32(v) => writer.write_f32(*v),
            Value::F64(v) => writer.write_f64(*v),
            Value::String(s) => writer.write_str(s),
            Value::Bytes(b) => writer.write_bytes(b),
            Value::Timestamp(t) => writer.write_timestamp(*t),
            Value::Extension(type_code, payload) => writer.write_extension(*type_code, payload),
            Value::Array(items) => {
                return context.depth_step(|context| {
                    writer.write_array_start(items.len());
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            writer.write_array_element_separator();
                        }
                        self.write(writer, item, context)?;
                    }
                    writer.write_array_end();
                    Ok(())
                });
            }
            Value::Map(map) => {
                return context.depth_step(|context| {
                    writer.write_map_start(map.len());
                    for (i, (k, v)) in map.iter().enumerate() {
                        if i > 0 {
                            writer.write_map_pair_separator();
                        }
                        self.write(writer, k, context)?;
                        self.write(writer, v, context)?;
                    }
                    writer.write_map_end();
                    Ok(())
                });
            }
        }
        Ok(())
    }

    fn prefer_async(&self) -> bool {
        true
    }
}

impl Shape<Value> {
    /// The singleton shape for untyped values
    #[must_use]
    pub fn value() -> Self {
        static SHAPE: LazyLock<Shape<Value>> = LazyLock::new(|| {
            Shape::from_build(
                ShapeKind::Value,
                Box::new(|_| {
                    let c: Arc<dyn Converter<Value>> = Arc::new(ValueConverter);
                    Ok(c)
                }),
            )
        });
        SHAPE.clone()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use crate::Serializer;
    use crate::value::{Value, ValueMap};
    use pretty_assertions::assert_eq;

    #[test]
    fn untyped_roundtrip() {
        let ser = Serializer::default();
        let mut map = ValueMap::new();
        map.insert(Value::from("id"), Value::from(7u8));
        map.insert(Value::from(-1i8), Value::from("negative key"));
        let value = Value::Array(vec![
            Value::Nil,
            Value::Bool(true),
            Value::from("text"),
            Value::Bytes(vec![1, 2, 3]),
            Value::F64(0.5),
            Value::Map(map),
        ]);
        let wire = ser.to_vec(&value).unwrap();
        assert_eq!(ser.from_slice::<Value>(&wire).unwrap(), value);
    }

    #[test]
    fn float_width_survives() {
        let ser = Serializer::default();
        let wire = ser.to_vec(&Value::F32(1.5)).unwrap();
        assert_eq!(wire[0], 0xca);
        assert_eq!(ser.from_slice::<Value>(&wire).unwrap(), Value::F32(1.5));
    }

    #[test]
    fn widened_lookup_after_decode() {
        let ser = Serializer::default();
        // {u8 5: "v", i8 -1: "w"} with explicit narrow tokens
        let wire = [0x82, 0x05, 0xa1, b'v', 0xff, 0xa1, b'w'];
        let value: Value = ser.from_slice(&wire).unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(
            map.get(&Value::Signed(5)).and_then(Value::as_str),
            Some("v")
        );
        assert_eq!(
            map.get(&Value::Signed(-1)).and_then(Value::as_str),
            Some("w")
        );
    }

    #[test]
    fn foreign_extension_is_opaque() {
        let ser = Serializer::default();
        let value = Value::Extension(42, vec![0xde, 0xad]);
        let wire = ser.to_vec(&value).unwrap();
        assert_eq!(wire, vec![0xd5, 42, 0xde, 0xad]);
        assert_eq!(ser.from_slice::<Value>(&wire).unwrap(), value);
    }
}
