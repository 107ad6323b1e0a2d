//! Dictionary converters
// (c) 2025 Ross Younger
//!
//! Every dictionary writes as a map header followed by `count` key/value
//! pairs. Reading has two strategies:
//!
//! * *mutable*: default-construct the target and insert pair by pair, via
//!   the [`MapLike`] trait;
//! * *from-pairs*: accumulate pairs into a temporary and hand them to the
//!   target's constructor in one go, for frozen/immutable map types.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;

use super::{Converter, PREALLOC_LIMIT, read_map_header_streaming};
use crate::context::SerializationContext;
use crate::error::Result;
use crate::io::{AsyncReader, AsyncWriter, Reader, Writer};
use crate::shape::{Shape, ShapeKind, ShapeRef};

/// A keyed map that can be grown entry by entry and iterated for writing.
pub trait MapLike: Send + Sync + 'static {
    /// Key type
    type Key: Send + Sync + 'static;
    /// Value type
    type Value: Send + Sync + 'static;

    /// Creates an empty map sized for roughly `capacity` entries
    fn with_capacity(capacity: usize) -> Self;
    /// Inserts one entry
    fn insert_entry(&mut self, key: Self::Key, value: Self::Value);
    /// Entry count
    fn entry_count(&self) -> usize;
    /// Iterates entries in serialization order
    fn entries(&self) -> impl Iterator<Item = (&Self::Key, &Self::Value)> + Send;
}

impl<K: Send + Sync + Eq + Hash + 'static, V: Send + Sync + 'static> MapLike for HashMap<K, V> {
    type Key = K;
    type Value = V;

    fn with_capacity(capacity: usize) -> Self {
        HashMap::with_capacity(capacity)
    }

    fn insert_entry(&mut self, key: K, value: V) {
        let _ = self.insert(key, value);
    }

    fn entry_count(&self) -> usize {
        self.len()
    }

    fn entries(&self) -> impl Iterator<Item = (&K, &V)> + Send {
        self.iter()
    }
}

impl<K: Send + Sync + Ord + 'static, V: Send + Sync + 'static> MapLike for BTreeMap<K, V> {
    type Key = K;
    type Value = V;

    fn with_capacity(_capacity: usize) -> Self {
        BTreeMap::new()
    }

    fn insert_entry(&mut self, key: K, value: V) {
        let _ = self.insert(key, value);
    }

    fn entry_count(&self) -> usize {
        self.len()
    }

    fn entries(&self) -> impl Iterator<Item = (&K, &V)> + Send {
        self.iter()
    }
}

/// The mutable-target dictionary converter.
struct DictionaryConverter<M: MapLike> {
    key: Arc<dyn Converter<M::Key>>,
    value: Arc<dyn Converter<M::Value>>,
}

impl<M: MapLike> DictionaryConverter<M> {
    fn write_entries(
        &self,
        writer: &mut Writer<'_>,
        map: &M,
        context: &mut SerializationContext,
    ) -> Result<()> {
        writer.write_map_start(map.entry_count());
        for (i, (k, v)) in map.entries().enumerate() {
            if i > 0 {
                writer.write_map_pair_separator();
            }
            self.key.write(writer, k, context)?;
            self.value.write(writer, v, context)?;
        }
        writer.write_map_end();
        Ok(())
    }
}

#[async_trait]
impl<M: MapLike> Converter<M> for DictionaryConverter<M> {
    fn read(&self, reader: &mut Reader<'_>, context: &mut SerializationContext) -> Result<M> {
        context.depth_step(|context| {
            let count = reader.read_map_header()?;
            let mut map = M::with_capacity(count.min(PREALLOC_LIMIT));
            for _ in 0..count {
                let key = self.key.read(reader, context)?;
                let value = self.value.read(reader, context)?;
                map.insert_entry(key, value);
            }
            Ok(map)
        })
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &M,
        context: &mut SerializationContext,
    ) -> Result<()> {
        context.depth_step(|context| self.write_entries(writer, value, context))
    }

    fn prefer_async(&self) -> bool {
        true
    }

    async fn read_async(
        &self,
        reader: &mut AsyncReader,
        context: &mut SerializationContext,
    ) -> Result<M> {
        context.depth_enter()?;
        let count = read_map_header_streaming(reader, context).await?;
        let mut map = M::with_capacity(count.min(PREALLOC_LIMIT));
        for _ in 0..count {
            // One key and one value: buffer both structures, then decode
            // them synchronously off the buffered region.
            let _ = reader.buffer_next_structures(2, 2, context).await?;
            let mut r = reader.reader();
            let key = self.key.read(&mut r, context)?;
            let value = self.value.read(&mut r, context)?;
            let consumed = r.position();
            reader.commit(consumed);
            map.insert_entry(key, value);
        }
        context.depth_exit();
        Ok(map)
    }

    async fn write_async(
        &self,
        writer: &mut AsyncWriter,
        value: &M,
        context: &mut SerializationContext,
    ) -> Result<()> {
        context.depth_enter()?;
        writer.writer().write_map_start(value.entry_count());
        for (i, (k, v)) in value.entries().enumerate() {
            if i > 0 {
                writer.writer().write_map_pair_separator();
            }
            {
                let mut w = writer.writer();
                self.key.write(&mut w, k, context)?;
                self.value.write(&mut w, v, context)?;
            }
            writer.flush_if_appropriate(context).await?;
        }
        writer.writer().write_map_end();
        context.depth_exit();
        writer.flush_if_appropriate(context).await
    }
}

/// The from-pairs dictionary converter, for frozen targets.
///
/// The original design distinguishes "immutable" (span-taking constructor)
/// and "enumerable" (iterator-taking factory) targets; Rust constructors
/// take iterators either way, so one converter covers both.
struct PairsDictionaryConverter<M, K, V> {
    key: Arc<dyn Converter<K>>,
    value: Arc<dyn Converter<V>>,
    access: Arc<PairsAccess<M, K, V>>,
}

/// Constructor and iteration hooks for [`Shape::dictionary_from_pairs`].
pub(crate) struct PairsAccess<M, K, V> {
    build: Box<dyn Fn(Vec<(K, V)>) -> Result<M> + Send + Sync>,
    len: Box<dyn Fn(&M) -> usize + Send + Sync>,
    #[allow(clippy::type_complexity)]
    iter: Box<dyn for<'a> Fn(&'a M) -> Box<dyn Iterator<Item = (&'a K, &'a V)> + 'a> + Send + Sync>,
}

#[async_trait]
impl<M, K, V> Converter<M> for PairsDictionaryConverter<M, K, V>
where
    M: Send + Sync + 'static,
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn read(&self, reader: &mut Reader<'_>, context: &mut SerializationContext) -> Result<M> {
        context.depth_step(|context| {
            let count = reader.read_map_header()?;
            // The pair buffer is a transient; it is consumed by the
            // constructor and never escapes this call.
            let mut pairs = Vec::with_capacity(count.min(PREALLOC_LIMIT));
            for _ in 0..count {
                let key = self.key.read(reader, context)?;
                let value = self.value.read(reader, context)?;
                pairs.push((key, value));
            }
            (self.access.build)(pairs)
        })
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &M,
        context: &mut SerializationContext,
    ) -> Result<()> {
        context.depth_step(|context| {
            writer.write_map_start((self.access.len)(value));
            for (i, (k, v)) in (self.access.iter)(value).enumerate() {
                if i > 0 {
                    writer.write_map_pair_separator();
                }
                self.key.write(writer, k, context)?;
                self.value.write(writer, v, context)?;
            }
            writer.write_map_end();
            Ok(())
        })
    }

    fn prefer_async(&self) -> bool {
        true
    }
}

impl<M: MapLike> Shape<M> {
    /// A shape for a mutable map type via its [`MapLike`] implementation
    #[must_use]
    pub fn dictionary(
        key: impl Into<ShapeRef<M::Key>>,
        value: impl Into<ShapeRef<M::Value>>,
    ) -> Self {
        let key = key.into();
        let value = value.into();
        Shape::from_build(
            ShapeKind::Dictionary,
            Box::new(move |cx| {
                let c: Arc<dyn Converter<M>> = Arc::new(DictionaryConverter::<M> {
                    key: key.resolve(cx)?,
                    value: value.resolve(cx)?,
                });
                Ok(c)
            }),
        )
    }
}

impl<K, V> Shape<HashMap<K, V>>
where
    K: Send + Sync + Eq + Hash + 'static,
    V: Send + Sync + 'static,
{
    /// A shape for `HashMap<K, V>`
    #[must_use]
    pub fn hash_map(key: impl Into<ShapeRef<K>>, value: impl Into<ShapeRef<V>>) -> Self {
        Shape::dictionary(key, value)
    }
}

impl<K, V> Shape<BTreeMap<K, V>>
where
    K: Send + Sync + Ord + 'static,
    V: Send + Sync + 'static,
{
    /// A shape for `BTreeMap<K, V>`
    #[must_use]
    pub fn btree_map(key: impl Into<ShapeRef<K>>, value: impl Into<ShapeRef<V>>) -> Self {
        Shape::dictionary(key, value)
    }
}

impl<M: Send + Sync + 'static> Shape<M> {
    /// A shape for a frozen map type built from accumulated pairs
    #[must_use]
    pub fn dictionary_from_pairs<K, V>(
        key: impl Into<ShapeRef<K>>,
        value: impl Into<ShapeRef<V>>,
        build: impl Fn(Vec<(K, V)>) -> Result<M> + Send + Sync + 'static,
        len: impl Fn(&M) -> usize + Send + Sync + 'static,
        iter: impl for<'a> Fn(&'a M) -> Box<dyn Iterator<Item = (&'a K, &'a V)> + 'a>
        + Send
        + Sync
        + 'static,
    ) -> Self
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let key = key.into();
        let value = value.into();
        let access = Arc::new(PairsAccess {
            build: Box::new(build),
            len: Box::new(len),
            iter: Box::new(iter),
        });
        Shape::from_build(
            ShapeKind::Dictionary,
            Box::new(move |cx| {
                let c: Arc<dyn Converter<M>> = Arc::new(PairsDictionaryConverter {
                    key: key.resolve(cx)?,
                    value: value.resolve(cx)?,
                    access: Arc::clone(&access),
                });
                Ok(c)
            }),
        )
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use crate::shape::{Shape, ShapeRef};
    use crate::{Error, Serializer};
    use assertables::assert_matches;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    #[test]
    fn btree_map_roundtrip_and_layout() {
        let mut ser = Serializer::default();
        ser.register(Shape::<BTreeMap<String, i32>>::btree_map(
            ShapeRef::by_type(),
            ShapeRef::by_type(),
        ));
        let mut m = BTreeMap::new();
        let _ = m.insert("a".to_owned(), 1);
        let _ = m.insert("b".to_owned(), -1);
        let wire = ser.to_vec(&m).unwrap();
        // {"a": 1, "b": -1}
        assert_eq!(wire, vec![0x82, 0xa1, b'a', 0x01, 0xa1, b'b', 0xff]);
        assert_eq!(ser.from_slice::<BTreeMap<String, i32>>(&wire).unwrap(), m);
    }

    type Frozen = Box<[(String, u8)]>;

    fn iter_frozen(m: &Frozen) -> Box<dyn Iterator<Item = (&String, &u8)> + '_> {
        Box::new(m.iter().map(|(k, v)| (k, v)))
    }

    #[test]
    fn frozen_map_from_pairs() {
        // A sorted pair list standing in for an immutable map type
        let mut ser = Serializer::default();
        ser.register(Shape::<Frozen>::dictionary_from_pairs(
            ShapeRef::<String>::by_type(),
            ShapeRef::<u8>::by_type(),
            |mut pairs| {
                pairs.sort();
                Ok(pairs.into_boxed_slice())
            },
            |m| m.len(),
            iter_frozen,
        ));
        let frozen: Frozen = vec![("x".to_owned(), 7), ("y".to_owned(), 8)].into_boxed_slice();
        let wire = ser.to_vec(&frozen).unwrap();
        assert_eq!(ser.from_slice::<Frozen>(&wire).unwrap(), frozen);
    }

    #[test]
    fn non_map_token_is_invalid_code() {
        let mut ser = Serializer::default();
        ser.register(Shape::<BTreeMap<String, i32>>::btree_map(
            ShapeRef::by_type(),
            ShapeRef::by_type(),
        ));
        assert_matches!(
            ser.from_slice::<BTreeMap<String, i32>>(&[0x93]),
            Err(Error::InvalidCode { code: 0x93, .. })
        );
    }

    #[tokio::test]
    async fn async_roundtrip() {
        let mut ser = Serializer::default();
        ser.register(Shape::<BTreeMap<String, i32>>::btree_map(
            ShapeRef::by_type(),
            ShapeRef::by_type(),
        ));
        let m: BTreeMap<String, i32> = (0..50).map(|i| (format!("k{i:02}"), i)).collect();

        let (client, server) = tokio::io::duplex(1024);
        let mut aw = crate::io::AsyncWriter::new(client);
        ser.write_async(&mut aw, &m).await.unwrap();
        drop(aw);
        let mut ar = crate::io::AsyncReader::new(server);
        let back: BTreeMap<String, i32> = ser.read_async(&mut ar).await.unwrap();
        assert_eq!(back, m);
    }
}
