//! Placeholder converter for recursive construction
// (c) 2025 Ross Younger

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use super::Converter;
use crate::context::SerializationContext;
use crate::error::{Error, Result};
use crate::io::{AsyncReader, AsyncWriter, Reader, Writer};

/// A converter holding a fill-once box.
///
/// The cache installs one of these *before* building the real converter for
/// a shape, so any recursive construction that re-encounters the shape gets
/// the placeholder and completes. Once the real converter exists the box is
/// filled; the placeholder stays wherever it was captured and all subsequent
/// dispatch is a single indirection.
pub(crate) struct DelayedConverter<T: Send + Sync + 'static> {
    cell: OnceLock<Arc<dyn Converter<T>>>,
}

impl<T: Send + Sync + 'static> std::fmt::Debug for DelayedConverter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedConverter")
            .field("filled", &self.cell.get().is_some())
            .finish()
    }
}

impl<T: Send + Sync + 'static> DelayedConverter<T> {
    pub(crate) fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Fills the box. Filling twice is a cache bug; the first value wins.
    pub(crate) fn fill(&self, converter: Arc<dyn Converter<T>>) {
        if self.cell.set(converter).is_err() {
            tracing::warn!("delayed converter filled twice; keeping the first");
        }
    }

    fn inner(&self) -> Result<&Arc<dyn Converter<T>>> {
        self.cell.get().ok_or_else(|| {
            Error::Shape("converter used before its construction completed".to_owned())
        })
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Converter<T> for DelayedConverter<T> {
    fn read(&self, reader: &mut Reader<'_>, context: &mut SerializationContext) -> Result<T> {
        self.inner()?.read(reader, context)
    }

    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        context: &mut SerializationContext,
    ) -> Result<()> {
        self.inner()?.write(writer, value, context)
    }

    fn prefer_async(&self) -> bool {
        self.cell.get().is_some_and(|c| c.prefer_async())
    }

    async fn read_async(
        &self,
        reader: &mut AsyncReader,
        context: &mut SerializationContext,
    ) -> Result<T> {
        self.inner()?.read_async(reader, context).await
    }

    async fn write_async(
        &self,
        writer: &mut AsyncWriter,
        value: &T,
        context: &mut SerializationContext,
    ) -> Result<()> {
        self.inner()?.write_async(writer, value, context).await
    }

    fn skip_to_property(
        &self,
        reader: &mut Reader<'_>,
        name: &str,
        context: &mut SerializationContext,
    ) -> Result<bool> {
        self.inner()?.skip_to_property(reader, name, context)
    }

    fn skip_to_index(
        &self,
        reader: &mut Reader<'_>,
        index: usize,
        context: &mut SerializationContext,
    ) -> Result<bool> {
        self.inner()?.skip_to_index(reader, index, context)
    }
}
