//! Enum converters: ordinal and string encodings
// (c) 2025 Ross Younger

use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;

use super::{Converter, PrimitiveValue};
use crate::context::SerializationContext;
use crate::error::{Error, Result};
use crate::io::{Reader, Writer};
use crate::shape::{Shape, ShapeKind};

/// A thin wrapper forwarding to the underlying integer converter.
struct EnumAsOrdinalConverter<T, U: PrimitiveValue> {
    underlying: Arc<dyn Converter<U>>,
    to_ordinal: Arc<dyn Fn(&T) -> U + Send + Sync>,
    from_ordinal: Arc<dyn Fn(U) -> Option<T> + Send + Sync>,
    type_name: &'static str,
}

#[async_trait]
impl<T, U> Converter<T> for EnumAsOrdinalConverter<T, U>
where
    T: Send + Sync + 'static,
    U: PrimitiveValue + Copy + Display,
{
    fn read(&self, reader: &mut Reader<'_>, context: &mut SerializationContext) -> Result<T> {
        let ordinal = self.underlying.read(reader, context)?;
        (*self.from_ordinal)(ordinal).ok_or_else(|| Error::UnknownOrdinal {
            value: ordinal.to_string(),
            type_name: self.type_name,
        })
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        context: &mut SerializationContext,
    ) -> Result<()> {
        let ordinal = (*self.to_ordinal)(value);
        self.underlying.write(writer, &ordinal, context)
    }
}

/// Encodes an enum by its declared name.
struct EnumAsStringConverter<T> {
    to_name: Arc<dyn Fn(&T) -> &'static str + Send + Sync>,
    from_name: Arc<dyn Fn(&str) -> Option<T> + Send + Sync>,
    type_name: &'static str,
}

#[async_trait]
impl<T: Send + Sync + 'static> Converter<T> for EnumAsStringConverter<T> {
    fn read(&self, reader: &mut Reader<'_>, _context: &mut SerializationContext) -> Result<T> {
        let name = reader.read_str()?;
        (*self.from_name)(name).ok_or_else(|| Error::UnknownOrdinal {
            value: name.to_owned(),
            type_name: self.type_name,
        })
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        _context: &mut SerializationContext,
    ) -> Result<()> {
        writer.write_str((*self.to_name)(value));
        Ok(())
    }
}

impl<T: Send + Sync + 'static> Shape<T> {
    /// A shape encoding an enum as its underlying integer
    #[must_use]
    pub fn enum_as_ordinal<U>(
        to_ordinal: impl Fn(&T) -> U + Send + Sync + 'static,
        from_ordinal: impl Fn(U) -> Option<T> + Send + Sync + 'static,
    ) -> Self
    where
        U: PrimitiveValue + Copy + Display,
    {
        let to_ordinal: Arc<dyn Fn(&T) -> U + Send + Sync> = Arc::new(to_ordinal);
        let from_ordinal: Arc<dyn Fn(U) -> Option<T> + Send + Sync> = Arc::new(from_ordinal);
        Shape::from_build(
            ShapeKind::Enum,
            Box::new(move |cx| {
                let c: Arc<dyn Converter<T>> = Arc::new(EnumAsOrdinalConverter {
                    underlying: cx.converter_for(&U::shape())?,
                    to_ordinal: Arc::clone(&to_ordinal),
                    from_ordinal: Arc::clone(&from_ordinal),
                    type_name: std::any::type_name::<T>(),
                });
                Ok(c)
            }),
        )
    }

    /// A shape encoding an enum by its declared name
    #[must_use]
    pub fn enum_as_string(
        to_name: impl Fn(&T) -> &'static str + Send + Sync + 'static,
        from_name: impl Fn(&str) -> Option<T> + Send + Sync + 'static,
    ) -> Self {
        let to_name: Arc<dyn Fn(&T) -> &'static str + Send + Sync> = Arc::new(to_name);
        let from_name: Arc<dyn Fn(&str) -> Option<T> + Send + Sync> = Arc::new(from_name);
        Shape::from_build(
            ShapeKind::Enum,
            Box::new(move |_| {
                let c: Arc<dyn Converter<T>> = Arc::new(EnumAsStringConverter {
                    to_name: Arc::clone(&to_name),
                    from_name: Arc::clone(&from_name),
                    type_name: std::any::type_name::<T>(),
                });
                Ok(c)
            }),
        )
    }
}
