//! Sequence converters: Vec and other collections
// (c) 2025 Ross Younger

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;

use super::{Converter, PREALLOC_LIMIT, read_array_header_streaming};
use crate::context::SerializationContext;
use crate::error::Result;
use crate::io::{AsyncReader, AsyncWriter, Reader, Writer};
use crate::shape::{Shape, ShapeKind, ShapeRef};

/// Rank-1 array converter: header, then each element.
struct ArrayConverter<E: Send + Sync + 'static> {
    element: Arc<dyn Converter<E>>,
}

#[async_trait]
impl<E: Send + Sync + 'static> Converter<Vec<E>> for ArrayConverter<E> {
    fn read(&self, reader: &mut Reader<'_>, context: &mut SerializationContext) -> Result<Vec<E>> {
        context.depth_step(|context| {
            let len = reader.read_array_header()?;
            let mut out = Vec::with_capacity(len.min(PREALLOC_LIMIT));
            for _ in 0..len {
                out.push(self.element.read(reader, context)?);
            }
            Ok(out)
        })
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &Vec<E>,
        context: &mut SerializationContext,
    ) -> Result<()> {
        context.depth_step(|context| {
            writer.write_array_start(value.len());
            for (i, element) in value.iter().enumerate() {
                if i > 0 {
                    writer.write_array_element_separator();
                }
                self.element.write(writer, element, context)?;
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
    ) -> Result<Vec<E>> {
        context.depth_enter()?;
        let len = read_array_header_streaming(reader, context).await?;
        let mut out = Vec::with_capacity(len.min(PREALLOC_LIMIT));
        for _ in 0..len {
            out.push(self.element.read_async(reader, context).await?);
        }
        context.depth_exit();
        Ok(out)
    }

    async fn write_async(
        &self,
        writer: &mut AsyncWriter,
        value: &Vec<E>,
        context: &mut SerializationContext,
    ) -> Result<()> {
        context.depth_enter()?;
        writer.writer().write_array_start(value.len());
        for (i, element) in value.iter().enumerate() {
            if i > 0 {
                writer.writer().write_array_element_separator();
            }
            self.element.write_async(writer, element, context).await?;
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
        let len = reader.read_array_header()?;
        if index >= len {
            for _ in 0..len {
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

impl<E: Send + Sync + 'static> Shape<Vec<E>> {
    /// A shape for `Vec<E>`: an array of `E`'s encodings
    #[must_use]
    pub fn array(element: impl Into<ShapeRef<E>>) -> Self {
        let element = element.into();
        Shape::from_build(
            ShapeKind::Enumerable,
            Box::new(move |cx| {
                let c: Arc<dyn Converter<Vec<E>>> = Arc::new(ArrayConverter {
                    element: element.resolve(cx)?,
                });
                Ok(c)
            }),
        )
    }
}

/// How a collection type is grown, measured and iterated.
///
/// The general form behind [`Shape::collection`]; the set/deque convenience
/// constructors fill one of these in.
pub struct CollectionAccess<C, E> {
    /// Creates an empty collection sized for roughly `capacity` elements
    pub new: Box<dyn Fn(usize) -> C + Send + Sync>,
    /// Appends one element
    pub insert: Box<dyn Fn(&mut C, E) + Send + Sync>,
    /// Element count
    pub len: Box<dyn Fn(&C) -> usize + Send + Sync>,
    /// Iterates elements in serialization order
    #[allow(clippy::type_complexity)]
    pub iter: Box<dyn for<'a> Fn(&'a C) -> Box<dyn Iterator<Item = &'a E> + 'a> + Send + Sync>,
}

impl<C, E> std::fmt::Debug for CollectionAccess<C, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CollectionAccess")
    }
}

/// Array-layout converter for non-Vec collections.
struct CollectionConverter<C, E> {
    element: Arc<dyn Converter<E>>,
    access: Arc<CollectionAccess<C, E>>,
}

#[async_trait]
impl<C, E> Converter<C> for CollectionConverter<C, E>
where
    C: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn read(&self, reader: &mut Reader<'_>, context: &mut SerializationContext) -> Result<C> {
        context.depth_step(|context| {
            let len = reader.read_array_header()?;
            let mut out = (self.access.new)(len.min(PREALLOC_LIMIT));
            for _ in 0..len {
                let element = self.element.read(reader, context)?;
                (self.access.insert)(&mut out, element);
            }
            Ok(out)
        })
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &C,
        context: &mut SerializationContext,
    ) -> Result<()> {
        context.depth_step(|context| {
            writer.write_array_start((self.access.len)(value));
            for (i, element) in (self.access.iter)(value).enumerate() {
                if i > 0 {
                    writer.write_array_element_separator();
                }
                self.element.write(writer, element, context)?;
            }
            writer.write_array_end();
            Ok(())
        })
    }

    fn prefer_async(&self) -> bool {
        true
    }
}

impl<C: Send + Sync + 'static> Shape<C> {
    /// A shape for an arbitrary growable collection serialized as an array
    #[must_use]
    pub fn collection<E: Send + Sync + 'static>(
        element: impl Into<ShapeRef<E>>,
        access: CollectionAccess<C, E>,
    ) -> Self {
        let element = element.into();
        let access = Arc::new(access);
        Shape::from_build(
            ShapeKind::Enumerable,
            Box::new(move |cx| {
                let c: Arc<dyn Converter<C>> = Arc::new(CollectionConverter {
                    element: element.resolve(cx)?,
                    access: Arc::clone(&access),
                });
                Ok(c)
            }),
        )
    }
}

fn iter_hash_set<E>(set: &HashSet<E>) -> Box<dyn Iterator<Item = &E> + '_> {
    Box::new(set.iter())
}

fn iter_btree_set<E>(set: &BTreeSet<E>) -> Box<dyn Iterator<Item = &E> + '_> {
    Box::new(set.iter())
}

fn iter_vec_deque<E>(dq: &VecDeque<E>) -> Box<dyn Iterator<Item = &E> + '_> {
    Box::new(dq.iter())
}

impl<E: Send + Sync + Eq + std::hash::Hash + 'static> Shape<HashSet<E>> {
    /// A shape for `HashSet<E>` serialized as an array
    #[must_use]
    pub fn hash_set(element: impl Into<ShapeRef<E>>) -> Self {
        Shape::collection(
            element,
            CollectionAccess {
                new: Box::new(HashSet::with_capacity),
                insert: Box::new(|set, e| {
                    let _ = set.insert(e);
                }),
                len: Box::new(HashSet::len),
                iter: Box::new(iter_hash_set),
            },
        )
    }
}

impl<E: Send + Sync + Ord + 'static> Shape<BTreeSet<E>> {
    /// A shape for `BTreeSet<E>` serialized as an array
    #[must_use]
    pub fn btree_set(element: impl Into<ShapeRef<E>>) -> Self {
        Shape::collection(
            element,
            CollectionAccess {
                new: Box::new(|_| BTreeSet::new()),
                insert: Box::new(|set, e| {
                    let _ = set.insert(e);
                }),
                len: Box::new(BTreeSet::len),
                iter: Box::new(iter_btree_set),
            },
        )
    }
}

impl<E: Send + Sync + 'static> Shape<VecDeque<E>> {
    /// A shape for `VecDeque<E>` serialized as an array
    #[must_use]
    pub fn vec_deque(element: impl Into<ShapeRef<E>>) -> Self {
        Shape::collection(
            element,
            CollectionAccess {
                new: Box::new(VecDeque::with_capacity),
                insert: Box::new(VecDeque::push_back),
                len: Box::new(VecDeque::len),
                iter: Box::new(iter_vec_deque),
            },
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
    use std::collections::BTreeSet;

    #[test]
    fn vec_roundtrip_and_wire_layout() {
        let mut ser = Serializer::default();
        ser.register(Shape::<Vec<i32>>::array(ShapeRef::by_type()));
        let wire = ser.to_vec(&vec![1i32, 2, 3]).unwrap();
        assert_eq!(wire, vec![0x93, 0x01, 0x02, 0x03]);
        assert_eq!(ser.from_slice::<Vec<i32>>(&wire).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn nested_vec_respects_depth() {
        let mut ser = Serializer::default();
        ser.register(Shape::<Vec<i32>>::array(ShapeRef::by_type()));
        ser.register(Shape::<Vec<Vec<i32>>>::array(ShapeRef::by_type()));
        let v = vec![vec![1i32], vec![], vec![2, 3]];
        let wire = ser.to_vec(&v).unwrap();
        assert_eq!(ser.from_slice::<Vec<Vec<i32>>>(&wire).unwrap(), v);
    }

    #[test]
    fn btree_set_roundtrip() {
        let mut ser = Serializer::default();
        ser.register(Shape::<BTreeSet<String>>::btree_set(ShapeRef::by_type()));
        let set: BTreeSet<String> = ["b", "a"].iter().map(|s| (*s).to_owned()).collect();
        let wire = ser.to_vec(&set).unwrap();
        assert_eq!(ser.from_slice::<BTreeSet<String>>(&wire).unwrap(), set);
    }

    #[test]
    fn non_array_token_is_invalid_code() {
        let mut ser = Serializer::default();
        ser.register(Shape::<Vec<i32>>::array(ShapeRef::by_type()));
        assert_matches!(
            ser.from_slice::<Vec<i32>>(&[0xc0]),
            Err(Error::InvalidCode { code: 0xc0, .. })
        );
    }

    #[tokio::test]
    async fn async_roundtrip_streams_elements() {
        let mut ser = Serializer::default();
        ser.register(Shape::<Vec<i32>>::array(ShapeRef::by_type()));
        let v: Vec<i32> = (0..100).collect();

        let (client, server) = tokio::io::duplex(4096);
        let mut aw = crate::io::AsyncWriter::new(client);
        ser.write_async(&mut aw, &v).await.unwrap();
        drop(aw);

        let mut ar = crate::io::AsyncReader::new(server);
        let back: Vec<i32> = ser.read_async(&mut ar).await.unwrap();
        assert_eq!(back, v);
    }
}
