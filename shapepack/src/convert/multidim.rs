//! Multi-dimensional array converters
// (c) 2025 Ross Younger
//!
//! A [`MultiDimArray`] is a rectangular, row-major array of rank ≥ 1. Two
//! wire layouts exist:
//!
//! * [`Flattened`](MultiDimLayout::Flattened): `[[d0,d1,...], [e0,e1,...]]`,
//!   with the invariant `∏di == len(elements)`;
//! * [`Nested`](MultiDimLayout::Nested): nested arrays, one per dimension,
//!   for peers that lack flat-array support.

use std::cell::RefCell;
use std::sync::Arc;

use async_trait::async_trait;

use super::{Converter, PREALLOC_LIMIT};
use crate::context::SerializationContext;
use crate::error::{Error, Result};
use crate::io::{Reader, Writer};
use crate::shape::{Shape, ShapeKind, ShapeRef};

/// A rectangular, row-major array of rank ≥ 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiDimArray<E> {
    dims: Vec<u32>,
    elements: Vec<E>,
}

impl<E> MultiDimArray<E> {
    /// Creates an array, verifying that the dimensions multiply out to the
    /// element count.
    pub fn new(dims: Vec<u32>, elements: Vec<E>) -> Result<Self> {
        let expected = checked_product(&dims);
        if expected != Some(elements.len()) {
            return Err(Error::UnexpectedLength {
                expected: expected.unwrap_or(usize::MAX),
                actual: elements.len(),
            });
        }
        Ok(Self { dims, elements })
    }

    /// The dimension vector
    #[must_use]
    pub fn dims(&self) -> &[u32] {
        &self.dims
    }

    /// The elements in row-major order
    #[must_use]
    pub fn elements(&self) -> &[E] {
        &self.elements
    }

    /// Total element count
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// True if the array holds no elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// The element at the given multi-dimensional index
    #[must_use]
    pub fn get(&self, indices: &[u32]) -> Option<&E> {
        if indices.len() != self.dims.len() {
            return None;
        }
        let mut flat = 0usize;
        for (i, d) in indices.iter().zip(&self.dims) {
            if i >= d {
                return None;
            }
            flat = flat * (*d as usize) + (*i as usize);
        }
        self.elements.get(flat)
    }
}

fn checked_product(dims: &[u32]) -> Option<usize> {
    dims.iter()
        .try_fold(1usize, |acc, d| acc.checked_mul(*d as usize))
}

/// Wire layout selector for [`MultiDimArray`] shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiDimLayout {
    /// `[[dims…], [flat elements…]]`
    Flattened,
    /// Nested arrays, one level per dimension; the rank is fixed at
    /// registration because the wire alone cannot distinguish an element
    /// array from a dimension array
    Nested {
        /// Number of dimensions
        rank: usize,
    },
}

thread_local! {
    // Reusable dimension scratch for flattened reads. Cleared before every
    // use so no capacity-driven information leaks between calls.
    static DIMS_SCRATCH: RefCell<Vec<u32>> = const { RefCell::new(Vec::new()) };
}

/// `[[dims],[flat]]` converter.
struct FlattenedConverter<E: Send + Sync + 'static> {
    element: Arc<dyn Converter<E>>,
}

#[async_trait]
impl<E: Send + Sync + 'static> Converter<MultiDimArray<E>> for FlattenedConverter<E> {
    fn read(
        &self,
        reader: &mut Reader<'_>,
        context: &mut SerializationContext,
    ) -> Result<MultiDimArray<E>> {
        context.depth_step(|context| {
            let outer = reader.read_array_header()?;
            if outer != 2 {
                return Err(Error::UnexpectedLength {
                    expected: 2,
                    actual: outer,
                });
            }
            let dims = DIMS_SCRATCH.with_borrow_mut(|scratch| {
                scratch.clear();
                let rank = reader.read_array_header()?;
                scratch.reserve(rank.min(PREALLOC_LIMIT));
                for _ in 0..rank {
                    scratch.push(reader.read_u32()?);
                }
                Ok::<_, Error>(scratch.clone())
            })?;
            let expected = checked_product(&dims).ok_or(Error::UnexpectedLength {
                expected: usize::MAX,
                actual: 0,
            })?;
            let flat = reader.read_array_header()?;
            if flat != expected {
                return Err(Error::UnexpectedLength {
                    expected,
                    actual: flat,
                });
            }
            let mut elements = Vec::with_capacity(flat.min(PREALLOC_LIMIT));
            for _ in 0..flat {
                elements.push(self.element.read(reader, context)?);
            }
            MultiDimArray::new(dims, elements)
        })
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &MultiDimArray<E>,
        context: &mut SerializationContext,
    ) -> Result<()> {
        context.depth_step(|context| {
            writer.write_array_start(2);
            writer.write_array_start(value.dims.len());
            for (i, d) in value.dims.iter().enumerate() {
                if i > 0 {
                    writer.write_array_element_separator();
                }
                writer.write_u32(*d);
            }
            writer.write_array_end();
            writer.write_array_element_separator();
            writer.write_array_start(value.elements.len());
            for (i, element) in value.elements.iter().enumerate() {
                if i > 0 {
                    writer.write_array_element_separator();
                }
                self.element.write(writer, element, context)?;
            }
            writer.write_array_end();
            writer.write_array_end();
            Ok(())
        })
    }

    fn prefer_async(&self) -> bool {
        true
    }
}

/// Nested-arrays converter, one msgpack array per dimension.
struct NestedConverter<E: Send + Sync + 'static> {
    element: Arc<dyn Converter<E>>,
    rank: usize,
}

impl<E: Send + Sync + 'static> NestedConverter<E> {
    fn write_level(
        &self,
        writer: &mut Writer<'_>,
        context: &mut SerializationContext,
        dims: &[u32],
        slice: &[E],
    ) -> Result<()> {
        context.depth_step(|context| {
            let n = dims[0] as usize;
            writer.write_array_start(n);
            if dims.len() == 1 {
                for (i, element) in slice.iter().enumerate() {
                    if i > 0 {
                        writer.write_array_element_separator();
                    }
                    self.element.write(writer, element, context)?;
                }
            } else if n > 0 {
                let stride = slice.len() / n;
                for i in 0..n {
                    if i > 0 {
                        writer.write_array_element_separator();
                    }
                    self.write_level(
                        writer,
                        context,
                        &dims[1..],
                        &slice[i * stride..(i + 1) * stride],
                    )?;
                }
            }
            writer.write_array_end();
            Ok(())
        })
    }

    fn read_level(
        &self,
        reader: &mut Reader<'_>,
        context: &mut SerializationContext,
        level: usize,
        dims: &mut Vec<u32>,
        out: &mut Vec<E>,
    ) -> Result<()> {
        context.depth_step(|context| {
            let n = reader.read_array_header()?;
            if level == dims.len() {
                dims.push(u32::try_from(n).map_err(|_| Error::UnexpectedLength {
                    expected: u32::MAX as usize,
                    actual: n,
                })?);
            } else if dims[level] as usize != n {
                // Ragged input; the array must be rectangular
                return Err(Error::UnexpectedLength {
                    expected: dims[level] as usize,
                    actual: n,
                });
            }
            if level == self.rank - 1 {
                for _ in 0..n {
                    out.push(self.element.read(reader, context)?);
                }
            } else {
                for _ in 0..n {
                    self.read_level(reader, context, level + 1, dims, out)?;
                }
            }
            Ok(())
        })
    }
}

#[async_trait]
impl<E: Send + Sync + 'static> Converter<MultiDimArray<E>> for NestedConverter<E> {
    fn read(
        &self,
        reader: &mut Reader<'_>,
        context: &mut SerializationContext,
    ) -> Result<MultiDimArray<E>> {
        let mut dims = Vec::with_capacity(self.rank);
        let mut elements = Vec::new();
        self.read_level(reader, context, 0, &mut dims, &mut elements)?;
        // A zero-length dimension hides the deeper headers; they are zero too
        while dims.len() < self.rank {
            dims.push(0);
        }
        MultiDimArray::new(dims, elements)
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &MultiDimArray<E>,
        context: &mut SerializationContext,
    ) -> Result<()> {
        if value.dims.len() != self.rank {
            return Err(Error::UnexpectedLength {
                expected: self.rank,
                actual: value.dims.len(),
            });
        }
        self.write_level(writer, context, &value.dims, &value.elements)
    }

    fn prefer_async(&self) -> bool {
        true
    }
}

impl<E: Send + Sync + 'static> Shape<MultiDimArray<E>> {
    /// A shape for a rank ≥ 1 rectangular array in the given wire layout
    #[must_use]
    pub fn multi_dim(element: impl Into<ShapeRef<E>>, layout: MultiDimLayout) -> Self {
        let element = element.into();
        Shape::from_build(
            ShapeKind::Enumerable,
            Box::new(move |cx| {
                let element = element.resolve(cx)?;
                let c: Arc<dyn Converter<MultiDimArray<E>>> = match layout {
                    MultiDimLayout::Flattened => Arc::new(FlattenedConverter { element }),
                    MultiDimLayout::Nested { rank } => {
                        if rank == 0 {
                            return Err(Error::Shape(
                                "nested multi-dimensional layout needs rank >= 1".to_owned(),
                            ));
                        }
                        Arc::new(NestedConverter { element, rank })
                    }
                };
                Ok(c)
            }),
        )
    }
}
