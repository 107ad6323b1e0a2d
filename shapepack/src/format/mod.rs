//! # Pluggable wire-format layer
// (c) 2025 Ross Younger
//!
//! A format is a [`Formatter`]/[`StreamingDeformatter`] pair. The pair is the
//! *only* place in the crate that knows how tokens are laid out as bytes;
//! everything above it (readers, writers, converters) composes tokens.
//!
//! Decoding follows a four-way return protocol, [`DecodeResult`], so that the
//! same token logic serves both the fail-fast synchronous [`Reader`](crate::io::Reader)
//! and the refillable [`StreamingReader`](crate::io::StreamingReader):
//!
//! * `Success`: the token was consumed and its value returned;
//! * `InsufficientBuffer`: more bytes may arrive; nothing was consumed;
//! * `EmptyBuffer`: the source has signalled completion and the buffer
//!   cannot satisfy the read;
//! * `TokenMismatch`: the next token is not of the requested kind; nothing
//!   was consumed.
//!
//! The bundled format is MessagePack ([`msgpack`]).

pub mod msgpack;

pub use msgpack::{MSGPACK_DEFORMATTER, MSGPACK_FORMATTER, MsgPackDeformatter, MsgPackFormatter};

use std::time::SystemTime;

use bytes::BytesMut;

use crate::context::SerializationContext;
use crate::error::{Error, Result};
use crate::io::StreamingReader;

/// Outcome of one streaming decode step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum DecodeResult<T> {
    /// The token was decoded; the cursor has advanced past it
    Success(T),
    /// The buffer does not (yet) hold the whole token; the cursor is unchanged
    InsufficientBuffer,
    /// The source is complete and the buffer cannot satisfy the read
    EmptyBuffer,
    /// The next token's lead byte does not match the requested operation
    TokenMismatch(u8),
}

impl<T> DecodeResult<T> {
    /// Maps a `Success` payload, passing the other outcomes through.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DecodeResult<U> {
        match self {
            DecodeResult::Success(v) => DecodeResult::Success(f(v)),
            DecodeResult::InsufficientBuffer => DecodeResult::InsufficientBuffer,
            DecodeResult::EmptyBuffer => DecodeResult::EmptyBuffer,
            DecodeResult::TokenMismatch(c) => DecodeResult::TokenMismatch(c),
        }
    }

    /// Collapses the protocol into a hard result, as the synchronous
    /// [`Reader`](crate::io::Reader) requires: a mismatch becomes
    /// [`Error::InvalidCode`], an underflow becomes [`Error::NotEnoughBytes`].
    pub fn require(self, reading: &'static str) -> Result<T> {
        match self {
            DecodeResult::Success(v) => Ok(v),
            DecodeResult::InsufficientBuffer | DecodeResult::EmptyBuffer => {
                Err(Error::NotEnoughBytes)
            }
            DecodeResult::TokenMismatch(code) => Err(Error::InvalidCode { code, reading }),
        }
    }

    /// True iff this is `Success`
    pub fn is_success(&self) -> bool {
        matches!(self, DecodeResult::Success(_))
    }
}

/// Coarse classification of the next token, for callers that dispatch on
/// token kind before committing to a typed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum TypeCode {
    /// Unrecognised lead byte
    Unknown,
    /// Any integer width, signed or unsigned
    Integer,
    /// The nil sentinel
    Nil,
    /// True or false
    Boolean,
    /// f32 or f64
    Float,
    /// UTF-8 string
    String,
    /// Raw bytes
    Binary,
    /// Length-prefixed array
    Vector,
    /// Length-prefixed map
    Map,
    /// Extension (type code + payload)
    Extension,
}

/// An integer token with its sign class preserved.
///
/// Used by untyped decoding, where a negative token must stay signed and a
/// non-negative one must stay unsigned for later widened key lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegerToken {
    /// The token encoded a negative value
    Signed(i64),
    /// The token encoded a non-negative value
    Unsigned(u64),
}

/// A float token with its wire width preserved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FloatToken {
    /// A 32-bit float token
    F32(f32),
    /// A 64-bit float token
    F64(f64),
}

/// An extension token's header: type code and payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Constructor)]
pub struct ExtensionHeader {
    /// Application-defined extension type code
    pub type_code: i8,
    /// Payload length in bytes
    pub length: u32,
}

/// Token-level encoder for a wire format.
///
/// Formatters are value-like and stateless; writes are infallible at this
/// level (failures are structural and surface from buffer allocation).
/// Each `write_*` call appends exactly one token.
pub trait Formatter: Send + Sync + std::fmt::Debug {
    /// The format's name, for diagnostics
    fn name(&self) -> &'static str;

    /// Whether container headers must carry the element count.
    ///
    /// True for MessagePack. A future format without length prefixes returns
    /// false and gives the separator/end hooks real work to do.
    fn array_length_required_in_header(&self) -> bool {
        true
    }

    /// Appends the nil sentinel
    fn write_nil(&self, buf: &mut BytesMut);
    /// Appends a boolean
    fn write_bool(&self, buf: &mut BytesMut, value: bool);
    /// Appends a non-negative integer using the narrowest encoding
    fn write_unsigned(&self, buf: &mut BytesMut, value: u64);
    /// Appends a signed integer using the narrowest encoding
    fn write_signed(&self, buf: &mut BytesMut, value: i64);
    /// Appends a 32-bit float
    fn write_f32(&self, buf: &mut BytesMut, value: f32);
    /// Appends a 64-bit float
    fn write_f64(&self, buf: &mut BytesMut, value: f64);
    /// Appends a UTF-8 string
    fn write_str(&self, buf: &mut BytesMut, value: &str);
    /// Appends a binary blob
    fn write_bytes(&self, buf: &mut BytesMut, value: &[u8]);
    /// Appends an extension token
    fn write_extension(&self, buf: &mut BytesMut, type_code: i8, payload: &[u8]);
    /// Appends a point in time
    fn write_timestamp(&self, buf: &mut BytesMut, value: SystemTime);

    /// Opens an array of `len` elements
    fn write_array_start(&self, buf: &mut BytesMut, len: usize);
    /// Separates two array elements (no-op for length-prefixed formats)
    fn write_array_element_separator(&self, _buf: &mut BytesMut) {}
    /// Closes an array (no-op for length-prefixed formats)
    fn write_array_end(&self, _buf: &mut BytesMut) {}
    /// Opens a map of `count` key/value pairs
    fn write_map_start(&self, buf: &mut BytesMut, count: usize);
    /// Separates two map entries (no-op for length-prefixed formats)
    fn write_map_pair_separator(&self, _buf: &mut BytesMut) {}
    /// Closes a map (no-op for length-prefixed formats)
    fn write_map_end(&self, _buf: &mut BytesMut) {}

    /// Encodes a string as a standalone token.
    ///
    /// Shapes use this at registration time to pre-encode property names and
    /// union aliases, which are then emitted as raw bytes for speed.
    fn encode_str_token(&self, value: &str) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.write_str(&mut buf, value);
        buf.to_vec()
    }
}

/// Token-level decoder for a wire format, in streaming form.
///
/// Stateless across calls; the end-of-source flag lives on the
/// [`StreamingReader`] so a deformatter instance can be shared freely.
/// Every operation follows the [`DecodeResult`] protocol and consumes either
/// one whole token or nothing.
pub trait StreamingDeformatter: Send + Sync + std::fmt::Debug {
    /// The format's name, for diagnostics
    fn name(&self) -> &'static str;

    /// Peeks the next token's lead byte without consuming it
    fn try_peek_next_code(&self, r: &StreamingReader<'_>) -> DecodeResult<u8>;
    /// Peeks the next token's coarse [`TypeCode`] without consuming it
    fn try_peek_next_type(&self, r: &StreamingReader<'_>) -> DecodeResult<TypeCode>;

    /// Consumes a nil token
    fn try_read_nil(&self, r: &mut StreamingReader<'_>) -> DecodeResult<()>;
    /// Consumes a nil token if one is next; `Success(true)` iff nil was consumed
    fn try_read_nil_option(&self, r: &mut StreamingReader<'_>) -> DecodeResult<bool>;
    /// Consumes a boolean token
    fn try_read_bool(&self, r: &mut StreamingReader<'_>) -> DecodeResult<bool>;

    /// Consumes any integer token as a signed value.
    ///
    /// Unsigned tokens above `i64::MAX` are a hard [`Error::IntegerOutOfRange`].
    fn try_read_signed(&self, r: &mut StreamingReader<'_>) -> Result<DecodeResult<i64>>;
    /// Consumes any integer token as an unsigned value.
    ///
    /// Negative tokens are a hard [`Error::IntegerOutOfRange`].
    fn try_read_unsigned(&self, r: &mut StreamingReader<'_>) -> Result<DecodeResult<u64>>;
    /// Consumes any integer token, preserving its sign class
    fn try_read_integer(&self, r: &mut StreamingReader<'_>) -> DecodeResult<IntegerToken>;

    /// Consumes an f32 token
    fn try_read_f32(&self, r: &mut StreamingReader<'_>) -> DecodeResult<f32>;
    /// Consumes an f64 token, widening an f32 token if that is what's next
    fn try_read_f64(&self, r: &mut StreamingReader<'_>) -> DecodeResult<f64>;
    /// Consumes a float token, preserving its wire width
    fn try_read_float(&self, r: &mut StreamingReader<'_>) -> DecodeResult<FloatToken>;

    /// Consumes a string token into an owned `String`
    fn try_read_string(&self, r: &mut StreamingReader<'_>) -> Result<DecodeResult<String>>;
    /// Consumes a string token, returning a view of its UTF-8 payload bytes.
    ///
    /// The buffer layer guarantees contiguity, so this either succeeds against
    /// a single region or reports `InsufficientBuffer`; UTF-8 is *not*
    /// validated here (byte-span key lookups don't need it).
    fn try_read_string_span<'a>(&self, r: &mut StreamingReader<'a>) -> DecodeResult<&'a [u8]>;
    /// Consumes a binary token, returning a view of its payload
    fn try_read_binary<'a>(&self, r: &mut StreamingReader<'a>) -> DecodeResult<&'a [u8]>;

    /// Consumes an array header, returning the element count
    fn try_read_array_header(&self, r: &mut StreamingReader<'_>) -> DecodeResult<usize>;
    /// Consumes a map header, returning the pair count
    fn try_read_map_header(&self, r: &mut StreamingReader<'_>) -> DecodeResult<usize>;

    /// Peeks an extension token's type code without consuming anything
    fn try_peek_extension_type(&self, r: &StreamingReader<'_>) -> DecodeResult<i8>;
    /// Consumes an extension token entirely, returning its type code and payload view
    fn try_read_extension<'a>(&self, r: &mut StreamingReader<'a>) -> DecodeResult<(i8, &'a [u8])>;
    /// Consumes a timestamp extension token
    fn try_read_timestamp(&self, r: &mut StreamingReader<'_>) -> Result<DecodeResult<SystemTime>>;

    /// Advances past one complete structure, decrementing depth as it descends
    fn try_skip(
        &self,
        r: &mut StreamingReader<'_>,
        context: &mut SerializationContext,
    ) -> Result<DecodeResult<()>>;
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::DecodeResult;
    use crate::error::Error;
    use assertables::assert_matches;
    use pretty_assertions::assert_eq;

    #[test]
    fn require_success() {
        assert_eq!(DecodeResult::Success(7).require("int").unwrap(), 7);
    }

    #[test]
    fn require_mismatch_is_invalid_code() {
        let r: DecodeResult<u8> = DecodeResult::TokenMismatch(0xc0);
        assert_matches!(
            r.require("bool"),
            Err(Error::InvalidCode { code: 0xc0, .. })
        );
    }

    #[test]
    fn require_underflow_is_not_enough_bytes() {
        let r: DecodeResult<u8> = DecodeResult::InsufficientBuffer;
        assert_matches!(r.require("bool"), Err(Error::NotEnoughBytes));
        let r: DecodeResult<u8> = DecodeResult::EmptyBuffer;
        assert_matches!(r.require("bool"), Err(Error::NotEnoughBytes));
    }

    #[test]
    fn map_passes_through() {
        let r: DecodeResult<u8> = DecodeResult::Success(2);
        assert_eq!(r.map(|v| v * 2), DecodeResult::Success(4));
        let r: DecodeResult<u8> = DecodeResult::InsufficientBuffer;
        assert_eq!(r.map(|v| v * 2), DecodeResult::InsufficientBuffer);
    }
}
