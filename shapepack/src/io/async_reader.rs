//! Long-lived async read handle
// (c) 2025 Ross Younger

use tokio::io::AsyncReadExt as _;
use tracing::{debug, trace};

use super::{ReadBuffer, Reader, ReceivingPipe, StreamingReader};
use crate::context::SerializationContext;
use crate::error::{Error, Result};
use crate::format::{DecodeResult, MSGPACK_DEFORMATTER, StreamingDeformatter};

/// Wraps a pipe and drives the buffer-refill loop for streaming decodes.
///
/// Cursor checkout works by borrowing: [`streaming`](Self::streaming) and
/// [`reader`](Self::reader) hand out cursors that borrow this handle, so the
/// borrow checker forbids suspension while one is live. Return a cursor by
/// passing its final position to [`commit`](Self::commit); dropping it
/// without committing simply abandons the bytes it consumed.
#[derive(derive_more::Debug)]
pub struct AsyncReader {
    #[debug(ignore)]
    pipe: Box<dyn ReceivingPipe>,
    buf: ReadBuffer,
    de: &'static dyn StreamingDeformatter,
}

impl AsyncReader {
    /// Wraps a pipe, decoding MessagePack
    pub fn new(pipe: impl ReceivingPipe + 'static) -> Self {
        Self::with_deformatter(pipe, &MSGPACK_DEFORMATTER)
    }

    /// Wraps a pipe with an explicit format
    pub fn with_deformatter(
        pipe: impl ReceivingPipe + 'static,
        de: &'static dyn StreamingDeformatter,
    ) -> Self {
        Self {
            pipe: Box::new(pipe),
            buf: ReadBuffer::default(),
            de,
        }
    }

    /// The deformatter this handle decodes with
    #[must_use]
    pub fn deformatter(&self) -> &'static dyn StreamingDeformatter {
        self.de
    }

    /// Number of buffered, unconsumed bytes
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buf.unread_len()
    }

    /// True once the pipe has signalled completion
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.buf.is_eof()
    }

    /// Reads from the pipe into the buffer. Returns the number of bytes
    /// fetched; 0 means end of stream (recorded, so subsequent underflows
    /// report `EmptyBuffer`).
    pub async fn fetch_more_bytes(&mut self) -> Result<usize> {
        if self.buf.is_eof() {
            return Ok(0);
        }
        self.buf.compact();
        let n = self.pipe.read_buf(self.buf.data_mut()).await?;
        if n == 0 {
            debug!("pipe reached end of stream");
            self.buf.set_eof();
        } else {
            trace!(bytes = n, "refilled");
        }
        Ok(n)
    }

    /// Checks out a streaming cursor over the buffered bytes
    #[must_use]
    pub fn streaming(&self) -> StreamingReader<'_> {
        StreamingReader::new(self.buf.unread(), self.buf.is_eof())
    }

    /// Checks out a synchronous reader over the buffered bytes.
    ///
    /// Only sound once the caller knows the buffer holds whole structures;
    /// see [`buffer_next_structure`](Self::buffer_next_structure).
    #[must_use]
    pub fn reader(&self) -> Reader<'_> {
        Reader::with_deformatter(self.buf.unread(), self.de)
    }

    /// Returns a checked-out cursor: consumes the bytes it read
    pub fn commit(&mut self, consumed: usize) {
        self.buf.advance(consumed);
    }

    /// Reads ahead until at least one full top-level structure lies in
    /// buffer memory, enabling a cheap sync reader for that region.
    pub async fn buffer_next_structure(
        &mut self,
        context: &mut SerializationContext,
    ) -> Result<()> {
        if self.buffer_next_structures(1, 1, context).await? == 0 {
            return Err(Error::NotEnoughBytes);
        }
        Ok(())
    }

    /// Greedy batch buffering: reads until the buffer holds at least `min`
    /// complete structures, counting at most `max` (to bound latency).
    ///
    /// Returns how many complete structures are buffered, which is less than
    /// `min` only if the pipe ended first.
    pub async fn buffer_next_structures(
        &mut self,
        min: usize,
        max: usize,
        context: &mut SerializationContext,
    ) -> Result<usize> {
        loop {
            context.check_cancelled()?;
            let mut have = 0;
            let mut cursor = self.streaming();
            while have < max {
                match self.de.try_skip(&mut cursor, context)? {
                    DecodeResult::Success(()) => have += 1,
                    DecodeResult::InsufficientBuffer | DecodeResult::EmptyBuffer => break,
                    DecodeResult::TokenMismatch(code) => {
                        return Err(Error::InvalidCode {
                            code,
                            reading: "structure",
                        });
                    }
                }
            }
            if have >= min || self.buf.is_eof() {
                return Ok(have);
            }
            let _ = self.fetch_more_bytes().await?;
        }
    }

    /// Drains one structure from the pipe without materializing it
    pub async fn skip_structure(&mut self, context: &mut SerializationContext) -> Result<()> {
        self.buffer_next_structure(context).await?;
        let mut cursor = self.streaming();
        let outcome = self.de.try_skip(&mut cursor, context)?;
        let consumed = cursor.consumed();
        match outcome {
            DecodeResult::Success(()) => {
                self.commit(consumed);
                Ok(())
            }
            // The structure was just verified complete; anything else is a bug
            // in the deformatter, surfaced as a decode failure.
            _ => Err(Error::NotEnoughBytes),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::AsyncReader;
    use crate::context::SerializationContext;
    use crate::error::Error;
    use assertables::assert_matches;
    use pretty_assertions::assert_eq;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn buffers_across_split_reads() {
        // [1, "ab"] delivered one byte at a time
        let wire = [0x92u8, 0x01, 0xa2, b'a', b'b'];
        let mut builder = Builder::new();
        for b in wire {
            let _ = builder.read(&[b]);
        }
        let mut ar = AsyncReader::new(builder.build());
        let mut cx = SerializationContext::default();
        ar.buffer_next_structure(&mut cx).await.unwrap();

        let mut r = ar.reader();
        assert_eq!(r.read_array_header().unwrap(), 2);
        assert_eq!(r.read_u8().unwrap(), 1);
        assert_eq!(r.read_str().unwrap(), "ab");
        let n = r.position();
        ar.commit(n);
        assert_eq!(ar.buffered_len(), 0);
    }

    #[tokio::test]
    async fn truncated_stream_is_not_enough_bytes() {
        let mut ar = AsyncReader::new(Builder::new().read(&[0x92, 0x01]).build());
        let mut cx = SerializationContext::default();
        assert_matches!(
            ar.buffer_next_structure(&mut cx).await,
            Err(Error::NotEnoughBytes)
        );
        assert!(ar.is_eof());
    }

    #[tokio::test]
    async fn batch_buffering_counts_structures() {
        let wire = [0x01u8, 0x02, 0x03];
        let mut ar = AsyncReader::new(Builder::new().read(&wire).build());
        let mut cx = SerializationContext::default();
        let n = ar.buffer_next_structures(2, 3, &mut cx).await.unwrap();
        assert_eq!(n, 3);
    }

    #[tokio::test]
    async fn skip_structure_drains_exactly_one() {
        let wire = [0x92u8, 0x01, 0x02, 0xc3];
        let mut ar = AsyncReader::new(Builder::new().read(&wire).build());
        let mut cx = SerializationContext::default();
        ar.skip_structure(&mut cx).await.unwrap();
        let mut r = ar.reader();
        assert!(r.read_bool().unwrap());
    }
}
