//! # Reader/writer cursors and the async pipe layer
// (c) 2025 Ross Younger
//!
//! Three tiers, mirroring the decode protocol split in [`format`](crate::format):
//!
//! * [`Reader`] / [`Writer`]: ephemeral, borrowed cursors used by converters
//!   once the buffer is known sufficient. Fail fast (`Result`).
//! * [`StreamingReader`]: the refillable cursor; operations report
//!   "needs more bytes" through [`DecodeResult`](crate::format::DecodeResult)
//!   instead of failing.
//! * [`AsyncReader`] / [`AsyncWriter`]: long-lived handles wrapping a pipe,
//!   driving refills and flushes at explicit suspension points.
//!
//! A sync cursor obtained from an async handle is *checked out*: it mutably
//! borrows the handle, so the borrow checker statically prevents any `await`
//! while it lives. Return it by calling `commit` with its final position.

mod buffer;
pub(crate) use buffer::ReadBuffer;

mod reader;
pub use reader::{Reader, StreamingReader};

mod writer;
pub use writer::Writer;

mod pipe;
pub use pipe::{ReceivingPipe, SendingPipe};

mod async_reader;
pub use async_reader::AsyncReader;

mod async_writer;
pub use async_writer::AsyncWriter;
