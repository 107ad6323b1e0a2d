//! Object converters: named-property maps and positional arrays
// (c) 2025 Ross Younger

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{Converter, read_array_header_streaming, read_map_header_streaming};
use crate::collision::PropertyCollisionDetector;
use crate::context::SerializationContext;
use crate::error::{Error, Result};
use crate::io::{AsyncReader, AsyncWriter, Reader, Writer};
use crate::options::{DeserializeDefaultValues, SerializeDefaultValues};
use crate::unused::UnusedDataPacket;

pub(crate) type WriteFn<T> =
    Box<dyn Fn(&mut Writer<'_>, &T, &mut SerializationContext) -> Result<()> + Send + Sync>;
pub(crate) type ReadIntoFn<S> =
    Box<dyn Fn(&mut Reader<'_>, &mut S, &mut SerializationContext) -> Result<()> + Send + Sync>;

/// One property, bound to its converter at cache-build time.
///
/// `T` is the finished object (read through getters when writing); `S` is
/// the deserialization state the setters write into: the object itself for
/// default-constructed types, or an argument-state aggregate for types built
/// through a constructor.
pub(crate) struct BoundProperty<T, S> {
    pub(crate) name: String,
    /// The name pre-encoded as a wire token, emitted raw for speed
    pub(crate) encoded_name: Vec<u8>,
    pub(crate) required: bool,
    pub(crate) write: WriteFn<T>,
    pub(crate) read_into: ReadIntoFn<S>,
    /// Present iff the property participates in default-skipping
    pub(crate) is_default: Option<Box<dyn Fn(&T) -> bool + Send + Sync>>,
}

/// Accessors for the unused-data opt-in.
pub(crate) struct UnusedAccess<T, S> {
    pub(crate) get: Arc<dyn Fn(&T) -> Option<&UnusedDataPacket> + Send + Sync>,
    pub(crate) set: Arc<dyn Fn(&mut S, UnusedDataPacket) + Send + Sync>,
}

/// Everything a bound object converter is made of.
pub(crate) struct ObjectParts<T, S> {
    pub(crate) type_name: &'static str,
    pub(crate) properties: Vec<BoundProperty<T, S>>,
    pub(crate) new_state: Arc<dyn Fn() -> S + Send + Sync>,
    pub(crate) finish: Arc<dyn Fn(S) -> Result<T> + Send + Sync>,
    pub(crate) unused: Option<UnusedAccess<T, S>>,
}

impl<T, S> ObjectParts<T, S> {
    /// Properties to emit for this value under the current policy
    fn emitted(&self, value: &T, context: &SerializationContext) -> Vec<&BoundProperty<T, S>> {
        self.properties
            .iter()
            .filter(|p| {
                let holds_default = p.is_default.as_ref().is_some_and(|f| f(value));
                match context.serialize_default_values() {
                    SerializeDefaultValues::Always => true,
                    SerializeDefaultValues::Required => p.required || !holds_default,
                    SerializeDefaultValues::Never => !holds_default,
                }
            })
            .collect()
    }

    /// Required-property verification, then unused-data application, then
    /// construction.
    fn finish_read(
        &self,
        mut state: S,
        seen: &PropertyCollisionDetector,
        packet: Option<UnusedDataPacket>,
        context: &SerializationContext,
    ) -> Result<T> {
        if context.deserialize_default_values() == DeserializeDefaultValues::Strict {
            let missing: Vec<&str> = self
                .properties
                .iter()
                .enumerate()
                .filter(|(i, p)| p.required && !seen.is_marked(*i))
                .map(|(_, p)| p.name.as_str())
                .collect();
            if !missing.is_empty() {
                return Err(Error::MissingRequiredProperties(missing.join(", ")));
            }
        }
        if let (Some(unused), Some(packet)) = (self.unused.as_ref(), packet) {
            (*unused.set)(&mut state, packet);
        }
        (*self.finish)(state)
    }
}

/// Object-as-map converter: `{"prop": value, …}` keyed by declared names.
pub(crate) struct ObjectMapConverter<T, S> {
    parts: ObjectParts<T, S>,
    /// Byte-span keyed dispatch: UTF-8 name payload → property position
    readers: HashMap<Vec<u8>, usize>,
}

impl<T, S> ObjectMapConverter<T, S> {
    pub(crate) fn new(parts: ObjectParts<T, S>) -> Self {
        let readers = parts
            .properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.as_bytes().to_vec(), i))
            .collect();
        Self { parts, readers }
    }

    /// Consumes one map entry: dispatch to a property, capture, or skip.
    fn read_entry(
        &self,
        reader: &mut Reader<'_>,
        state: &mut S,
        seen: &mut PropertyCollisionDetector,
        packet: &mut Option<UnusedDataPacket>,
        context: &mut SerializationContext,
    ) -> Result<()> {
        let key_start = reader.position();
        let key = reader.read_string_span()?;
        if let Some(&index) = self.readers.get(key) {
            let property = &self.parts.properties[index];
            if !seen.mark(index) {
                return Err(Error::DoublePropertyAssignment(property.name.clone()));
            }
            (property.read_into)(reader, state, context)
        } else if self.parts.unused.is_some() {
            let key_token = reader.slice_from(key_start).to_vec();
            let value_raw = reader.read_raw_structure(context)?;
            packet
                .get_or_insert_with(UnusedDataPacket::default)
                .add(key_token, value_raw);
            Ok(())
        } else {
            reader.skip(context)
        }
    }
}

#[async_trait]
impl<T, S> Converter<T> for ObjectMapConverter<T, S>
where
    T: Send + Sync + 'static,
    S: Send + 'static,
{
    fn read(&self, reader: &mut Reader<'_>, context: &mut SerializationContext) -> Result<T> {
        context.depth_step(|context| {
            let count = reader.read_map_header()?;
            let mut state = (*self.parts.new_state)();
            let mut seen = PropertyCollisionDetector::new(self.parts.properties.len());
            let mut packet = None;
            for _ in 0..count {
                self.read_entry(reader, &mut state, &mut seen, &mut packet, context)?;
            }
            self.parts.finish_read(state, &seen, packet, context)
        })
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        context: &mut SerializationContext,
    ) -> Result<()> {
        context.depth_step(|context| {
            let emit = self.parts.emitted(value, context);
            let unused = self
                .parts
                .unused
                .as_ref()
                .and_then(|u| (*u.get)(value))
                .filter(|p| !p.is_empty());
            writer.write_map_start(emit.len() + unused.map_or(0, UnusedDataPacket::len));
            for (i, property) in emit.iter().enumerate() {
                if i > 0 {
                    writer.write_map_pair_separator();
                }
                writer.write_raw(&property.encoded_name);
                (property.write)(writer, value, context)?;
            }
            if let Some(packet) = unused {
                packet.write_entries(writer);
            }
            writer.write_map_end();
            Ok(())
        })
    }

    fn prefer_async(&self) -> bool {
        true
    }

    async fn read_async(
        &self,
        reader: &mut AsyncReader,
        context: &mut SerializationContext,
    ) -> Result<T> {
        context.depth_enter()?;
        let count = read_map_header_streaming(reader, context).await?;
        let mut state = (*self.parts.new_state)();
        let mut seen = PropertyCollisionDetector::new(self.parts.properties.len());
        let mut packet = None;
        for _ in 0..count {
            // Key and value are two structures; buffer both, decode sync.
            let _ = reader.buffer_next_structures(2, 2, context).await?;
            let mut r = reader.reader();
            self.read_entry(&mut r, &mut state, &mut seen, &mut packet, context)?;
            let consumed = r.position();
            reader.commit(consumed);
        }
        let out = self.parts.finish_read(state, &seen, packet, context)?;
        context.depth_exit();
        Ok(out)
    }

    async fn write_async(
        &self,
        writer: &mut AsyncWriter,
        value: &T,
        context: &mut SerializationContext,
    ) -> Result<()> {
        context.depth_enter()?;
        let emit = self.parts.emitted(value, context);
        let unused_len = self
            .parts
            .unused
            .as_ref()
            .and_then(|u| (*u.get)(value))
            .filter(|p| !p.is_empty())
            .map_or(0, UnusedDataPacket::len);
        writer.writer().write_map_start(emit.len() + unused_len);
        for (i, property) in emit.iter().enumerate() {
            {
                let mut w = writer.writer();
                if i > 0 {
                    w.write_map_pair_separator();
                }
                w.write_raw(&property.encoded_name);
                (property.write)(&mut w, value, context)?;
            }
            writer.flush_if_appropriate(context).await?;
        }
        if unused_len > 0 {
            let mut w = writer.writer();
            if let Some(packet) = self.parts.unused.as_ref().and_then(|u| (*u.get)(value)) {
                packet.write_entries(&mut w);
            }
        }
        writer.writer().write_map_end();
        context.depth_exit();
        writer.flush_if_appropriate(context).await
    }

    fn skip_to_property(
        &self,
        reader: &mut Reader<'_>,
        name: &str,
        context: &mut SerializationContext,
    ) -> Result<bool> {
        let count = reader.read_map_header()?;
        for _ in 0..count {
            let key = reader.read_string_span()?;
            if key == name.as_bytes() {
                return Ok(true);
            }
            reader.skip(context)?;
        }
        Ok(false)
    }
}

/// Object-as-array converter: `[v0, v1, …]` with positions fixed at
/// registration.
pub(crate) struct ObjectArrayConverter<T, S> {
    parts: ObjectParts<T, S>,
}

impl<T, S> ObjectArrayConverter<T, S> {
    pub(crate) fn new(parts: ObjectParts<T, S>) -> Self {
        Self { parts }
    }

    fn read_positions(
        &self,
        reader: &mut Reader<'_>,
        count: usize,
        state: &mut S,
        seen: &mut PropertyCollisionDetector,
        context: &mut SerializationContext,
    ) -> Result<()> {
        for index in 0..count {
            if let Some(property) = self.parts.properties.get(index) {
                (property.read_into)(reader, state, context)?;
                let _ = seen.mark(index);
            } else {
                // Unexpected trailing positions are skipped
                reader.skip(context)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<T, S> Converter<T> for ObjectArrayConverter<T, S>
where
    T: Send + Sync + 'static,
    S: Send + 'static,
{
    fn read(&self, reader: &mut Reader<'_>, context: &mut SerializationContext) -> Result<T> {
        context.depth_step(|context| {
            let count = reader.read_array_header()?;
            let mut state = (*self.parts.new_state)();
            let mut seen = PropertyCollisionDetector::new(self.parts.properties.len());
            self.read_positions(reader, count, &mut state, &mut seen, context)?;
            // Positions beyond the serialized header keep their defaults
            self.parts.finish_read(state, &seen, None, context)
        })
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        context: &mut SerializationContext,
    ) -> Result<()> {
        context.depth_step(|context| {
            writer.write_array_start(self.parts.properties.len());
            for (i, property) in self.parts.properties.iter().enumerate() {
                if i > 0 {
                    writer.write_array_element_separator();
                }
                (property.write)(writer, value, context)?;
            }
            writer.write_array_end();
            Ok(())
        })
    }

    fn prefer_async(&self) -> bool {
        true
    }

    async fn read_async(
        &self,
        reader: &mut AsyncReader,
        context: &mut SerializationContext,
    ) -> Result<T> {
        context.depth_enter()?;
        let count = read_array_header_streaming(reader, context).await?;
        let mut state = (*self.parts.new_state)();
        let mut seen = PropertyCollisionDetector::new(self.parts.properties.len());
        for index in 0..count {
            reader.buffer_next_structure(context).await?;
            let mut r = reader.reader();
            if let Some(property) = self.parts.properties.get(index) {
                (property.read_into)(&mut r, &mut state, context)?;
                let _ = seen.mark(index);
            } else {
                r.skip(context)?;
            }
            let consumed = r.position();
            reader.commit(consumed);
        }
        let out = self.parts.finish_read(state, &seen, None, context)?;
        context.depth_exit();
        Ok(out)
    }

    async fn write_async(
        &self,
        writer: &mut AsyncWriter,
        value: &T,
        context: &mut SerializationContext,
    ) -> Result<()> {
        context.depth_enter()?;
        writer
            .writer()
            .write_array_start(self.parts.properties.len());
        for (i, property) in self.parts.properties.iter().enumerate() {
            {
                let mut w = writer.writer();
                if i > 0 {
                    w.write_array_element_separator();
                }
                (property.write)(&mut w, value, context)?;
            }
            writer.flush_if_appropriate(context).await?;
        }
        writer.writer().write_array_end();
        context.depth_exit();
        writer.flush_if_appropriate(context).await
    }

    fn skip_to_index(
        &self,
        reader: &mut Reader<'_>,
        index: usize,
        context: &mut SerializationContext,
    ) -> Result<bool> {
        let count = reader.read_array_header()?;
        if index >= count {
            for _ in 0..count {
                reader.skip(context)?;
            }
            return Ok(false);
        }
        for _ in 0..index {
            reader.skip(context)?;
        }
        Ok(true)
    }
}

impl<T, S> std::fmt::Debug for ObjectMapConverter<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectMapConverter")
            .field("type", &self.parts.type_name)
            .field("properties", &self.parts.properties.len())
            .finish()
    }
}

impl<T, S> std::fmt::Debug for ObjectArrayConverter<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectArrayConverter")
            .field("type", &self.parts.type_name)
            .field("properties", &self.parts.properties.len())
            .finish()
    }
}
