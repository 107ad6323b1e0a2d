//! Synchronous and streaming read cursors
// (c) 2025 Ross Younger

use std::time::SystemTime;

use crate::context::SerializationContext;
use crate::error::{Error, Result};
use crate::format::{
    DecodeResult, FloatToken, IntegerToken, MSGPACK_DEFORMATTER, StreamingDeformatter, TypeCode,
};

/// The refillable read cursor.
///
/// All state a streaming decode needs: the buffered bytes, the current
/// position, and whether the source has signalled completion (which turns
/// "insufficient buffer" into "empty buffer"). The deformatter itself stays
/// stateless across calls.
///
/// On a non-`Success` outcome the caller refills the buffer and reconstructs
/// a fresh `StreamingReader` around the extended bytes.
#[derive(Debug)]
pub struct StreamingReader<'a> {
    buf: &'a [u8],
    pos: usize,
    eof: bool,
}

impl<'a> StreamingReader<'a> {
    /// Creates a cursor over `buf`. `eof` declares the source complete.
    #[must_use]
    pub fn new(buf: &'a [u8], eof: bool) -> Self {
        Self { buf, pos: 0, eof }
    }

    /// Bytes consumed so far
    #[must_use]
    pub fn consumed(&self) -> usize {
        self.pos
    }

    /// The unconsumed remainder
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// True if the source has signalled completion
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Peeks the next byte without consuming it
    #[must_use]
    pub fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    /// A view of the next `n` bytes, without consuming them
    #[must_use]
    pub fn fetch(&self, n: usize) -> Option<&'a [u8]> {
        self.buf.get(self.pos..self.pos + n)
    }

    /// Consumes `n` bytes
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.pos + n <= self.buf.len());
        self.pos += n;
    }

    /// The appropriate underflow outcome for this cursor's source state
    pub fn underflow<T>(&self) -> DecodeResult<T> {
        if self.eof {
            DecodeResult::EmptyBuffer
        } else {
            DecodeResult::InsufficientBuffer
        }
    }

    /// A view of the bytes between two previously observed positions
    pub(crate) fn slice_between(&self, start: usize, end: usize) -> &'a [u8] {
        &self.buf[start..end]
    }
}

/// Narrowing integer reads, named after their target width.
macro_rules! narrowing_read {
    ($(#[$meta:meta])* $name:ident, $t:ty, $via:ident) => {
        $(#[$meta])*
        pub fn $name(&mut self) -> Result<$t> {
            let wide = self.$via()?;
            <$t>::try_from(wide).map_err(|_| Error::IntegerOutOfRange {
                value: i128::from(wide),
                target: stringify!($t),
            })
        }
    };
}

/// The synchronous read cursor used by converters.
///
/// A borrowed, fail-fast façade over the streaming deformatter: every
/// `read_*` consumes exactly one token or returns an error. Must not outlive
/// the buffer it references; not shareable across concurrency boundaries.
#[derive(Debug)]
pub struct Reader<'a> {
    cursor: StreamingReader<'a>,
    de: &'static dyn StreamingDeformatter,
}

impl<'a> Reader<'a> {
    /// Creates a MessagePack reader over a fully buffered byte slice
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_deformatter(buf, &MSGPACK_DEFORMATTER)
    }

    /// Creates a reader with an explicit format
    #[must_use]
    pub fn with_deformatter(buf: &'a [u8], de: &'static dyn StreamingDeformatter) -> Self {
        Self {
            cursor: StreamingReader::new(buf, true),
            de,
        }
    }

    /// Bytes consumed so far
    #[must_use]
    pub fn position(&self) -> usize {
        self.cursor.consumed()
    }

    /// True if every buffered byte has been consumed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cursor.remaining().is_empty()
    }

    /// The deformatter this reader decodes with
    #[must_use]
    pub fn deformatter(&self) -> &'static dyn StreamingDeformatter {
        self.de
    }

    /// A view of the raw bytes from a previously observed position
    /// (see [`position`](Self::position)) up to the current one
    #[must_use]
    pub fn slice_from(&self, mark: usize) -> &'a [u8] {
        self.cursor.slice_between(mark, self.cursor.consumed())
    }

    /// Peeks the next token's lead byte
    pub fn peek_next_code(&self) -> Result<u8> {
        self.de.try_peek_next_code(&self.cursor).require("token")
    }

    /// Peeks the next token's coarse type
    pub fn peek_next_type(&self) -> Result<TypeCode> {
        self.de.try_peek_next_type(&self.cursor).require("token")
    }

    /// Consumes a nil token
    pub fn read_nil(&mut self) -> Result<()> {
        self.de.try_read_nil(&mut self.cursor).require("nil")
    }

    /// Consumes a nil token if one is next; true iff nil was consumed
    pub fn try_consume_nil(&mut self) -> Result<bool> {
        self.de
            .try_read_nil_option(&mut self.cursor)
            .require("token")
    }

    /// Consumes a boolean token
    pub fn read_bool(&mut self) -> Result<bool> {
        self.de.try_read_bool(&mut self.cursor).require("bool")
    }

    /// Consumes any integer token as unsigned
    pub fn read_u64(&mut self) -> Result<u64> {
        self.de.try_read_unsigned(&mut self.cursor)?.require("u64")
    }

    /// Consumes any integer token as signed
    pub fn read_i64(&mut self) -> Result<i64> {
        self.de.try_read_signed(&mut self.cursor)?.require("i64")
    }

    narrowing_read!(
        /// Consumes an integer token that must fit in u8
        read_u8,
        u8,
        read_u64
    );
    narrowing_read!(
        /// Consumes an integer token that must fit in u16
        read_u16,
        u16,
        read_u64
    );
    narrowing_read!(
        /// Consumes an integer token that must fit in u32
        read_u32,
        u32,
        read_u64
    );
    narrowing_read!(
        /// Consumes an integer token that must fit in i8
        read_i8,
        i8,
        read_i64
    );
    narrowing_read!(
        /// Consumes an integer token that must fit in i16
        read_i16,
        i16,
        read_i64
    );
    narrowing_read!(
        /// Consumes an integer token that must fit in i32
        read_i32,
        i32,
        read_i64
    );

    /// Consumes any integer token, preserving its sign class
    pub fn read_integer(&mut self) -> Result<IntegerToken> {
        self.de.try_read_integer(&mut self.cursor).require("integer")
    }

    /// Consumes an f32 token
    pub fn read_f32(&mut self) -> Result<f32> {
        self.de.try_read_f32(&mut self.cursor).require("f32")
    }

    /// Consumes a float token (f32 widened as needed)
    pub fn read_f64(&mut self) -> Result<f64> {
        self.de.try_read_f64(&mut self.cursor).require("f64")
    }

    /// Consumes a float token, preserving its wire width
    pub fn read_float(&mut self) -> Result<FloatToken> {
        self.de.try_read_float(&mut self.cursor).require("float")
    }

    /// Consumes an integer token that must be a valid Unicode scalar
    pub fn read_char(&mut self) -> Result<char> {
        let v = self.read_u32()?;
        char::from_u32(v).ok_or(Error::IntegerOutOfRange {
            value: i128::from(v),
            target: "char",
        })
    }

    /// Consumes a string token into an owned `String`
    pub fn read_string(&mut self) -> Result<String> {
        self.de.try_read_string(&mut self.cursor)?.require("string")
    }

    /// Consumes a string token, returning its (unvalidated) UTF-8 payload
    pub fn read_string_span(&mut self) -> Result<&'a [u8]> {
        self.de
            .try_read_string_span(&mut self.cursor)
            .require("string")
    }

    /// Consumes a string token, returning its validated payload
    pub fn read_str(&mut self) -> Result<&'a str> {
        Ok(std::str::from_utf8(self.read_string_span()?)?)
    }

    /// Consumes a binary token, returning a view of its payload
    pub fn read_binary(&mut self) -> Result<&'a [u8]> {
        self.de.try_read_binary(&mut self.cursor).require("binary")
    }

    /// Consumes an array header
    pub fn read_array_header(&mut self) -> Result<usize> {
        self.de
            .try_read_array_header(&mut self.cursor)
            .require("array header")
    }

    /// Consumes a map header
    pub fn read_map_header(&mut self) -> Result<usize> {
        self.de
            .try_read_map_header(&mut self.cursor)
            .require("map header")
    }

    /// Peeks the type code of the next token, which must be an extension
    pub fn peek_extension_type(&self) -> Result<i8> {
        self.de
            .try_peek_extension_type(&self.cursor)
            .require("extension")
    }

    /// Consumes an extension token
    pub fn read_extension(&mut self) -> Result<(i8, &'a [u8])> {
        self.de
            .try_read_extension(&mut self.cursor)
            .require("extension")
    }

    /// Consumes a timestamp extension token
    pub fn read_timestamp(&mut self) -> Result<SystemTime> {
        self.de
            .try_read_timestamp(&mut self.cursor)?
            .require("timestamp")
    }

    /// Advances past one complete structure
    pub fn skip(&mut self, context: &mut SerializationContext) -> Result<()> {
        self.de
            .try_skip(&mut self.cursor, context)?
            .require("structure")
    }

    /// Consumes one complete structure, returning an owned copy of its raw
    /// bytes.
    ///
    /// The copy is deliberate: the source buffer may be reused as soon as
    /// this call returns, so no view escapes.
    pub fn read_raw_structure(&mut self, context: &mut SerializationContext) -> Result<Vec<u8>> {
        let mark = self.position();
        self.skip(context)?;
        Ok(self.slice_from(mark).to_vec())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::Reader;
    use crate::context::SerializationContext;
    use crate::error::Error;
    use assertables::assert_matches;
    use pretty_assertions::assert_eq;

    #[test]
    fn primitive_int_scenario() {
        // write(127) -> 7f; read 7f -> 127
        let mut r = Reader::new(&[0x7f]);
        assert_eq!(r.read_i32().unwrap(), 127);
        assert!(r.is_empty());
    }

    #[test]
    fn narrowing_rejects_out_of_range() {
        // 256 does not fit u8
        let mut r = Reader::new(&[0xcd, 0x01, 0x00]);
        assert_matches!(
            r.read_u8(),
            Err(Error::IntegerOutOfRange { value: 256, .. })
        );
    }

    #[test]
    fn widening_across_token_widths() {
        // i64 read accepts a u8 token
        let mut r = Reader::new(&[0xcc, 0x2a]);
        assert_eq!(r.read_i64().unwrap(), 42);
    }

    #[test]
    fn try_consume_nil() {
        let mut r = Reader::new(&[0xc0, 0x01]);
        assert!(r.try_consume_nil().unwrap());
        assert!(!r.try_consume_nil().unwrap());
        assert_eq!(r.read_u8().unwrap(), 1);
    }

    #[test]
    fn underflow_is_not_enough_bytes() {
        let mut r = Reader::new(&[0xcd, 0x01]);
        assert_matches!(r.read_u64(), Err(Error::NotEnoughBytes));
    }

    #[test]
    fn raw_structure_copy() {
        // ["a", 1] followed by trailing data
        let wire = [0x92, 0xa1, b'a', 0x01, 0xc3];
        let mut cx = SerializationContext::default();
        let mut r = Reader::new(&wire);
        let raw = r.read_raw_structure(&mut cx).unwrap();
        assert_eq!(raw, vec![0x92, 0xa1, b'a', 0x01]);
        assert!(r.read_bool().unwrap());
    }

    #[test]
    fn char_roundtrip_and_rejection() {
        let mut r = Reader::new(&[0xcd, 0xd8, 0x00]); // 0xd800: surrogate, not a scalar
        assert_matches!(r.read_char(), Err(Error::IntegerOutOfRange { .. }));
        let mut r = Reader::new(&[0x61]);
        assert_eq!(r.read_char().unwrap(), 'a');
    }
}
