//! Long-lived async write handle
// (c) 2025 Ross Younger

use bytes::BytesMut;
use tokio::io::AsyncWriteExt as _;
use tracing::debug;

use super::{SendingPipe, Writer};
use crate::context::SerializationContext;
use crate::error::{Error, Result};
use crate::format::{Formatter, MSGPACK_FORMATTER};

/// Wraps a pipe and a staging buffer that sync writers append into.
///
/// Converters for large values call
/// [`flush_if_appropriate`](Self::flush_if_appropriate) between records; the
/// staging buffer is committed to the pipe once it exceeds the context's
/// unflushed-bytes threshold. As with [`AsyncReader`](super::AsyncReader),
/// a checked-out [`Writer`] borrows this handle, so no suspension is
/// possible while one is live.
#[derive(derive_more::Debug)]
pub struct AsyncWriter {
    #[debug(ignore)]
    pipe: Box<dyn SendingPipe>,
    buf: BytesMut,
    fmt: &'static dyn Formatter,
}

impl AsyncWriter {
    /// Wraps a pipe, encoding MessagePack
    pub fn new(pipe: impl SendingPipe + 'static) -> Self {
        Self::with_formatter(pipe, &MSGPACK_FORMATTER)
    }

    /// Wraps a pipe with an explicit format
    pub fn with_formatter(pipe: impl SendingPipe + 'static, fmt: &'static dyn Formatter) -> Self {
        Self {
            pipe: Box::new(pipe),
            buf: BytesMut::new(),
            fmt,
        }
    }

    /// The formatter this handle encodes with
    #[must_use]
    pub fn formatter(&self) -> &'static dyn Formatter {
        self.fmt
    }

    /// Checks out a synchronous writer over the staging buffer
    #[must_use]
    pub fn writer(&mut self) -> Writer<'_> {
        Writer::with_formatter(&mut self.buf, self.fmt)
    }

    /// Bytes staged but not yet committed to the pipe
    #[must_use]
    pub fn unflushed(&self) -> usize {
        self.buf.len()
    }

    /// True when the staged bytes plus `extra` exceed the context's
    /// unflushed-bytes threshold
    #[must_use]
    pub fn is_time_to_flush(&self, context: &SerializationContext, extra: usize) -> bool {
        self.buf.len() + extra > context.unflushed_bytes_threshold()
    }

    /// Flushes iff the threshold has been reached
    pub async fn flush_if_appropriate(&mut self, context: &SerializationContext) -> Result<()> {
        if self.is_time_to_flush(context, 0) {
            self.flush(context).await?;
        }
        Ok(())
    }

    /// Commits the staging buffer and flushes the pipe.
    ///
    /// Observes cancellation first; a pipe whose receiver has gone away
    /// surfaces [`Error::ReceiverClosed`].
    pub async fn flush(&mut self, context: &SerializationContext) -> Result<()> {
        context.check_cancelled()?;
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split();
        debug!(bytes = chunk.len(), "flushing");
        self.pipe.write_all(&chunk).await.map_err(map_pipe_error)?;
        self.pipe.flush().await.map_err(map_pipe_error)?;
        Ok(())
    }

    /// Flushes any remaining bytes and shuts the pipe down
    pub async fn finish(&mut self, context: &SerializationContext) -> Result<()> {
        self.flush(context).await?;
        self.pipe.shutdown().await.map_err(map_pipe_error)
    }
}

fn map_pipe_error(e: std::io::Error) -> Error {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionReset
        | ErrorKind::UnexpectedEof
        | ErrorKind::WriteZero => Error::ReceiverClosed,
        _ => Error::Io(e),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::AsyncWriter;
    use crate::context::SerializationContext;
    use crate::error::Error;
    use crate::options::SerializerOptions;
    use assertables::assert_matches;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn staged_bytes_reach_the_pipe_on_flush() {
        let mut aw = AsyncWriter::new(Vec::new());
        let cx = SerializationContext::default();
        {
            let mut w = aw.writer();
            w.write_str("hello");
        }
        assert_eq!(aw.unflushed(), 6);
        aw.flush(&cx).await.unwrap();
        assert_eq!(aw.unflushed(), 0);
    }

    #[tokio::test]
    async fn threshold_controls_flush_if_appropriate() {
        let mut aw = AsyncWriter::new(Vec::new());
        let options = SerializerOptions {
            unflushed_bytes_threshold: 4,
            ..SerializerOptions::default()
        };
        let cx = SerializationContext::new(&options);
        {
            let mut w = aw.writer();
            w.write_u8(1);
        }
        assert!(!aw.is_time_to_flush(&cx, 0));
        aw.flush_if_appropriate(&cx).await.unwrap();
        assert_eq!(aw.unflushed(), 1); // below threshold: kept
        {
            let mut w = aw.writer();
            w.write_str("abcdef");
        }
        assert!(aw.is_time_to_flush(&cx, 0));
        aw.flush_if_appropriate(&cx).await.unwrap();
        assert_eq!(aw.unflushed(), 0);
    }

    #[tokio::test]
    async fn cancelled_flush_raises() {
        let token = tokio_util::sync::CancellationToken::new();
        let mut aw = AsyncWriter::new(Vec::new());
        let cx = SerializationContext::default().with_cancellation(token.clone());
        {
            let mut w = aw.writer();
            w.write_u8(1);
        }
        token.cancel();
        assert_matches!(aw.flush(&cx).await, Err(Error::Cancelled));
    }

    #[tokio::test]
    async fn closed_receiver_is_reported() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut aw = AsyncWriter::new(client);
        let cx = SerializationContext::default();
        {
            let mut w = aw.writer();
            w.write_str("data");
        }
        assert_matches!(aw.flush(&cx).await, Err(Error::ReceiverClosed));
    }
}
