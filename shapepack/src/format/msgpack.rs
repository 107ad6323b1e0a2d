//! MessagePack token codec
// (c) 2025 Ross Younger
//!
//! Implements [`Formatter`] and [`StreamingDeformatter`] for the MessagePack
//! wire format (<https://msgpack.org/>). Integers are written with the
//! narrowest encoding that holds the value; reads accept any integer token
//! whose value fits the requested width.
//!
//! Timestamps use the predefined extension type `-1` in all three wire sizes
//! (4, 8 and 12 bytes).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{BufMut, BytesMut};

use super::{
    DecodeResult, ExtensionHeader, FloatToken, Formatter, IntegerToken, StreamingDeformatter,
    TypeCode,
};
use crate::context::SerializationContext;
use crate::error::{Error, Result};
use crate::io::StreamingReader;

/// MessagePack lead bytes the codec dispatches on.
#[allow(missing_docs)]
pub(crate) mod code {
    pub(crate) const FIXMAP_LOW: u8 = 0x80;
    pub(crate) const FIXMAP_HIGH: u8 = 0x8f;
    pub(crate) const FIXARRAY_LOW: u8 = 0x90;
    pub(crate) const FIXARRAY_HIGH: u8 = 0x9f;
    pub(crate) const FIXSTR_LOW: u8 = 0xa0;
    pub(crate) const FIXSTR_HIGH: u8 = 0xbf;
    pub(crate) const NIL: u8 = 0xc0;
    pub(crate) const NEVER_USED: u8 = 0xc1;
    pub(crate) const FALSE: u8 = 0xc2;
    pub(crate) const TRUE: u8 = 0xc3;
    pub(crate) const BIN8: u8 = 0xc4;
    pub(crate) const BIN16: u8 = 0xc5;
    pub(crate) const BIN32: u8 = 0xc6;
    pub(crate) const EXT8: u8 = 0xc7;
    pub(crate) const EXT16: u8 = 0xc8;
    pub(crate) const EXT32: u8 = 0xc9;
    pub(crate) const F32: u8 = 0xca;
    pub(crate) const F64: u8 = 0xcb;
    pub(crate) const UINT8: u8 = 0xcc;
    pub(crate) const UINT16: u8 = 0xcd;
    pub(crate) const UINT32: u8 = 0xce;
    pub(crate) const UINT64: u8 = 0xcf;
    pub(crate) const INT8: u8 = 0xd0;
    pub(crate) const INT16: u8 = 0xd1;
    pub(crate) const INT32: u8 = 0xd2;
    pub(crate) const INT64: u8 = 0xd3;
    pub(crate) const FIXEXT1: u8 = 0xd4;
    pub(crate) const FIXEXT2: u8 = 0xd5;
    pub(crate) const FIXEXT4: u8 = 0xd6;
    pub(crate) const FIXEXT8: u8 = 0xd7;
    pub(crate) const FIXEXT16: u8 = 0xd8;
    pub(crate) const STR8: u8 = 0xd9;
    pub(crate) const STR16: u8 = 0xda;
    pub(crate) const STR32: u8 = 0xdb;
    pub(crate) const ARRAY16: u8 = 0xdc;
    pub(crate) const ARRAY32: u8 = 0xdd;
    pub(crate) const MAP16: u8 = 0xde;
    pub(crate) const MAP32: u8 = 0xdf;
    pub(crate) const NEGFIXINT_LOW: u8 = 0xe0;
}

/// Extension type code reserved by MessagePack for timestamps
pub(crate) const TIMESTAMP_EXTENSION_TYPE: i8 = -1;

/// The MessagePack [`Formatter`]. Value-like; use [`MSGPACK_FORMATTER`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackFormatter;

/// The MessagePack [`StreamingDeformatter`]. Value-like; use [`MSGPACK_DEFORMATTER`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackDeformatter;

/// Shared formatter instance
pub static MSGPACK_FORMATTER: MsgPackFormatter = MsgPackFormatter;
/// Shared deformatter instance
pub static MSGPACK_DEFORMATTER: MsgPackDeformatter = MsgPackDeformatter;

impl Formatter for MsgPackFormatter {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn write_nil(&self, buf: &mut BytesMut) {
        buf.put_u8(code::NIL);
    }

    fn write_bool(&self, buf: &mut BytesMut, value: bool) {
        buf.put_u8(if value { code::TRUE } else { code::FALSE });
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_unsigned(&self, buf: &mut BytesMut, value: u64) {
        match value {
            0..=0x7f => buf.put_u8(value as u8),
            0x80..=0xff => {
                buf.put_u8(code::UINT8);
                buf.put_u8(value as u8);
            }
            0x100..=0xffff => {
                buf.put_u8(code::UINT16);
                buf.put_u16(value as u16);
            }
            0x1_0000..=0xffff_ffff => {
                buf.put_u8(code::UINT32);
                buf.put_u32(value as u32);
            }
            _ => {
                buf.put_u8(code::UINT64);
                buf.put_u64(value);
            }
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn write_signed(&self, buf: &mut BytesMut, value: i64) {
        if value >= 0 {
            self.write_unsigned(buf, value as u64);
            return;
        }
        if value >= -32 {
            buf.put_u8(value as i8 as u8);
        } else if value >= i64::from(i8::MIN) {
            buf.put_u8(code::INT8);
            buf.put_i8(value as i8);
        } else if value >= i64::from(i16::MIN) {
            buf.put_u8(code::INT16);
            buf.put_i16(value as i16);
        } else if value >= i64::from(i32::MIN) {
            buf.put_u8(code::INT32);
            buf.put_i32(value as i32);
        } else {
            buf.put_u8(code::INT64);
            buf.put_i64(value);
        }
    }

    fn write_f32(&self, buf: &mut BytesMut, value: f32) {
        buf.put_u8(code::F32);
        buf.put_f32(value);
    }

    fn write_f64(&self, buf: &mut BytesMut, value: f64) {
        buf.put_u8(code::F64);
        buf.put_f64(value);
    }

    fn write_str(&self, buf: &mut BytesMut, value: &str) {
        let bytes = value.as_bytes();
        #[allow(clippy::cast_possible_truncation)]
        match bytes.len() {
            0..=31 => buf.put_u8(code::FIXSTR_LOW | bytes.len() as u8),
            32..=0xff => {
                buf.put_u8(code::STR8);
                buf.put_u8(bytes.len() as u8);
            }
            0x100..=0xffff => {
                buf.put_u8(code::STR16);
                buf.put_u16(bytes.len() as u16);
            }
            _ => {
                buf.put_u8(code::STR32);
                buf.put_u32(bytes.len() as u32);
            }
        }
        buf.put_slice(bytes);
    }

    fn write_bytes(&self, buf: &mut BytesMut, value: &[u8]) {
        #[allow(clippy::cast_possible_truncation)]
        match value.len() {
            0..=0xff => {
                buf.put_u8(code::BIN8);
                buf.put_u8(value.len() as u8);
            }
            0x100..=0xffff => {
                buf.put_u8(code::BIN16);
                buf.put_u16(value.len() as u16);
            }
            _ => {
                buf.put_u8(code::BIN32);
                buf.put_u32(value.len() as u32);
            }
        }
        buf.put_slice(value);
    }

    fn write_extension(&self, buf: &mut BytesMut, type_code: i8, payload: &[u8]) {
        #[allow(clippy::cast_possible_truncation)]
        match payload.len() {
            1 => buf.put_u8(code::FIXEXT1),
            2 => buf.put_u8(code::FIXEXT2),
            4 => buf.put_u8(code::FIXEXT4),
            8 => buf.put_u8(code::FIXEXT8),
            16 => buf.put_u8(code::FIXEXT16),
            0..=0xff => {
                buf.put_u8(code::EXT8);
                buf.put_u8(payload.len() as u8);
            }
            0x100..=0xffff => {
                buf.put_u8(code::EXT16);
                buf.put_u16(payload.len() as u16);
            }
            _ => {
                buf.put_u8(code::EXT32);
                buf.put_u32(payload.len() as u32);
            }
        }
        buf.put_i8(type_code);
        buf.put_slice(payload);
    }

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn write_timestamp(&self, buf: &mut BytesMut, value: SystemTime) {
        let (secs, nanos) = decompose_timestamp(value);
        if secs >= 0 && (secs as u64) >> 34 == 0 {
            let packed = (u64::from(nanos) << 34) | secs as u64;
            if packed & 0xffff_ffff_0000_0000 == 0 {
                buf.put_u8(code::FIXEXT4);
                buf.put_i8(TIMESTAMP_EXTENSION_TYPE);
                buf.put_u32(packed as u32);
            } else {
                buf.put_u8(code::FIXEXT8);
                buf.put_i8(TIMESTAMP_EXTENSION_TYPE);
                buf.put_u64(packed);
            }
        } else {
            buf.put_u8(code::EXT8);
            buf.put_u8(12);
            buf.put_i8(TIMESTAMP_EXTENSION_TYPE);
            buf.put_u32(nanos);
            buf.put_i64(secs);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_array_start(&self, buf: &mut BytesMut, len: usize) {
        match len {
            0..=15 => buf.put_u8(code::FIXARRAY_LOW | len as u8),
            16..=0xffff => {
                buf.put_u8(code::ARRAY16);
                buf.put_u16(len as u16);
            }
            _ => {
                buf.put_u8(code::ARRAY32);
                buf.put_u32(len as u32);
            }
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_map_start(&self, buf: &mut BytesMut, count: usize) {
        match count {
            0..=15 => buf.put_u8(code::FIXMAP_LOW | count as u8),
            16..=0xffff => {
                buf.put_u8(code::MAP16);
                buf.put_u16(count as u16);
            }
            _ => {
                buf.put_u8(code::MAP32);
                buf.put_u32(count as u32);
            }
        }
    }
}

/// Splits a `SystemTime` into (seconds, nanoseconds) relative to the Unix
/// epoch, normalised so `0 <= nanos < 1e9` even for pre-epoch instants.
#[allow(clippy::cast_possible_wrap)]
fn decompose_timestamp(value: SystemTime) -> (i64, u32) {
    match value.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, d.subsec_nanos()),
        Err(e) => {
            let before = e.duration();
            let mut secs = -(before.as_secs() as i64);
            let mut nanos = 0;
            if before.subsec_nanos() > 0 {
                secs -= 1;
                nanos = 1_000_000_000 - before.subsec_nanos();
            }
            (secs, nanos)
        }
    }
}

/// Reassembles a `SystemTime` from normalised (seconds, nanoseconds).
#[allow(clippy::cast_sign_loss)]
fn compose_timestamp(secs: i64, nanos: u32) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nanos)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + Duration::from_nanos(u64::from(nanos))
    }
}

/// Consumes and returns the next `n` bytes, or `None` on underflow.
fn take_bytes<'a>(r: &mut StreamingReader<'a>, n: usize) -> Option<&'a [u8]> {
    let bytes = r.fetch(n)?;
    r.advance(n);
    Some(bytes)
}

fn be16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}
fn be32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}
fn be64(b: &[u8]) -> u64 {
    u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

impl MsgPackDeformatter {
    /// Classifies a lead byte.
    fn classify(code: u8) -> TypeCode {
        use self::code as c;
        match code {
            0x00..=0x7f | c::NEGFIXINT_LOW..=0xff => TypeCode::Integer,
            c::FIXMAP_LOW..=c::FIXMAP_HIGH | c::MAP16 | c::MAP32 => TypeCode::Map,
            c::FIXARRAY_LOW..=c::FIXARRAY_HIGH | c::ARRAY16 | c::ARRAY32 => TypeCode::Vector,
            c::FIXSTR_LOW..=c::FIXSTR_HIGH | c::STR8 | c::STR16 | c::STR32 => TypeCode::String,
            c::NIL => TypeCode::Nil,
            c::TRUE | c::FALSE => TypeCode::Boolean,
            c::BIN8 | c::BIN16 | c::BIN32 => TypeCode::Binary,
            c::F32 | c::F64 => TypeCode::Float,
            c::UINT8 | c::UINT16 | c::UINT32 | c::UINT64 | c::INT8 | c::INT16 | c::INT32
            | c::INT64 => TypeCode::Integer,
            c::FIXEXT1 | c::FIXEXT2 | c::FIXEXT4 | c::FIXEXT8 | c::FIXEXT16 | c::EXT8
            | c::EXT16 | c::EXT32 => TypeCode::Extension,
            c::NEVER_USED => TypeCode::Unknown,
        }
    }

    /// Parses an extension header without consuming anything.
    ///
    /// Returns (header length in bytes, extension header).
    #[allow(clippy::cast_possible_wrap)]
    fn peek_extension_header(
        r: &StreamingReader<'_>,
    ) -> DecodeResult<(usize, ExtensionHeader)> {
        use self::code as c;
        let Some(lead) = r.peek() else {
            return r.underflow();
        };
        let fixed = |len: u32| -> DecodeResult<(usize, ExtensionHeader)> {
            match r.fetch(2) {
                #[allow(clippy::cast_possible_wrap)]
                Some(b) => DecodeResult::Success((2, ExtensionHeader::new(b[1] as i8, len))),
                None => r.underflow(),
            }
        };
        match lead {
            c::FIXEXT1 => fixed(1),
            c::FIXEXT2 => fixed(2),
            c::FIXEXT4 => fixed(4),
            c::FIXEXT8 => fixed(8),
            c::FIXEXT16 => fixed(16),
            c::EXT8 => match r.fetch(3) {
                Some(b) => DecodeResult::Success((
                    3,
                    ExtensionHeader::new(b[2] as i8, u32::from(b[1])),
                )),
                None => r.underflow(),
            },
            c::EXT16 => match r.fetch(4) {
                Some(b) => DecodeResult::Success((
                    4,
                    ExtensionHeader::new(b[3] as i8, u32::from(be16(&b[1..]))),
                )),
                None => r.underflow(),
            },
            c::EXT32 => match r.fetch(6) {
                Some(b) => {
                    DecodeResult::Success((6, ExtensionHeader::new(b[5] as i8, be32(&b[1..]))))
                }
                None => r.underflow(),
            },
            other => DecodeResult::TokenMismatch(other),
        }
    }

    /// Reads the payload of a length-prefixed token (str or bin family).
    ///
    /// `header_of` maps the lead byte to `Some(header length)` for accepted
    /// codes; the payload length is decoded from the header.
    fn read_length_prefixed<'a>(
        r: &mut StreamingReader<'a>,
        accept: impl Fn(u8) -> Option<(usize, LengthWidth)>,
    ) -> DecodeResult<&'a [u8]> {
        let Some(lead) = r.peek() else {
            return r.underflow();
        };
        let Some((header_len, width)) = accept(lead) else {
            return DecodeResult::TokenMismatch(lead);
        };
        let Some(header) = r.fetch(header_len) else {
            return r.underflow();
        };
        let payload_len = match width {
            LengthWidth::Fix(n) => n,
            LengthWidth::U8 => header[header_len - 1] as usize,
            LengthWidth::U16 => be16(&header[header_len - 2..]) as usize,
            LengthWidth::U32 => be32(&header[header_len - 4..]) as usize,
        };
        let total = header_len + payload_len;
        match r.fetch(total) {
            Some(token) => {
                r.advance(total);
                DecodeResult::Success(&token[header_len..])
            }
            None => r.underflow(),
        }
    }
}

/// How a token's payload length is encoded in its header.
enum LengthWidth {
    Fix(usize),
    U8,
    U16,
    U32,
}

impl StreamingDeformatter for MsgPackDeformatter {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn try_peek_next_code(&self, r: &StreamingReader<'_>) -> DecodeResult<u8> {
        match r.peek() {
            Some(c) => DecodeResult::Success(c),
            None => r.underflow(),
        }
    }

    fn try_peek_next_type(&self, r: &StreamingReader<'_>) -> DecodeResult<TypeCode> {
        self.try_peek_next_code(r).map(Self::classify)
    }

    fn try_read_nil(&self, r: &mut StreamingReader<'_>) -> DecodeResult<()> {
        match r.peek() {
            Some(code::NIL) => {
                r.advance(1);
                DecodeResult::Success(())
            }
            Some(other) => DecodeResult::TokenMismatch(other),
            None => r.underflow(),
        }
    }

    fn try_read_nil_option(&self, r: &mut StreamingReader<'_>) -> DecodeResult<bool> {
        match r.peek() {
            Some(code::NIL) => {
                r.advance(1);
                DecodeResult::Success(true)
            }
            Some(_) => DecodeResult::Success(false),
            None => r.underflow(),
        }
    }

    fn try_read_bool(&self, r: &mut StreamingReader<'_>) -> DecodeResult<bool> {
        match r.peek() {
            Some(code::TRUE) => {
                r.advance(1);
                DecodeResult::Success(true)
            }
            Some(code::FALSE) => {
                r.advance(1);
                DecodeResult::Success(false)
            }
            Some(other) => DecodeResult::TokenMismatch(other),
            None => r.underflow(),
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn try_read_integer(&self, r: &mut StreamingReader<'_>) -> DecodeResult<IntegerToken> {
        use self::code as c;
        let Some(lead) = r.peek() else {
            return r.underflow();
        };
        // Sign class is decided by the decoded *value*, not the token width:
        // a non-negative int8 widens to unsigned.
        #[allow(clippy::cast_sign_loss)]
        let signed = |v: i64| {
            if v >= 0 {
                IntegerToken::Unsigned(v as u64)
            } else {
                IntegerToken::Signed(v)
            }
        };
        match lead {
            0x00..=0x7f => {
                r.advance(1);
                DecodeResult::Success(IntegerToken::Unsigned(u64::from(lead)))
            }
            c::NEGFIXINT_LOW..=0xff => {
                r.advance(1);
                DecodeResult::Success(IntegerToken::Signed(i64::from(lead as i8)))
            }
            c::UINT8 => match take_bytes(r, 2) {
                Some(b) => DecodeResult::Success(IntegerToken::Unsigned(u64::from(b[1]))),
                None => r.underflow(),
            },
            c::UINT16 => match take_bytes(r, 3) {
                Some(b) => DecodeResult::Success(IntegerToken::Unsigned(u64::from(be16(&b[1..])))),
                None => r.underflow(),
            },
            c::UINT32 => match take_bytes(r, 5) {
                Some(b) => DecodeResult::Success(IntegerToken::Unsigned(u64::from(be32(&b[1..])))),
                None => r.underflow(),
            },
            c::UINT64 => match take_bytes(r, 9) {
                Some(b) => DecodeResult::Success(IntegerToken::Unsigned(be64(&b[1..]))),
                None => r.underflow(),
            },
            c::INT8 => match take_bytes(r, 2) {
                Some(b) => DecodeResult::Success(signed(i64::from(b[1] as i8))),
                None => r.underflow(),
            },
            c::INT16 => match take_bytes(r, 3) {
                Some(b) => DecodeResult::Success(signed(i64::from(be16(&b[1..]) as i16))),
                None => r.underflow(),
            },
            c::INT32 => match take_bytes(r, 5) {
                Some(b) => DecodeResult::Success(signed(i64::from(be32(&b[1..]) as i32))),
                None => r.underflow(),
            },
            c::INT64 => match take_bytes(r, 9) {
                Some(b) => DecodeResult::Success(signed(be64(&b[1..]) as i64)),
                None => r.underflow(),
            },
            other => DecodeResult::TokenMismatch(other),
        }
    }

    fn try_read_signed(&self, r: &mut StreamingReader<'_>) -> Result<DecodeResult<i64>> {
        Ok(match self.try_read_integer(r) {
            DecodeResult::Success(IntegerToken::Signed(v)) => DecodeResult::Success(v),
            DecodeResult::Success(IntegerToken::Unsigned(v)) => {
                let v = i64::try_from(v).map_err(|_| Error::IntegerOutOfRange {
                    value: i128::from(v),
                    target: "i64",
                })?;
                DecodeResult::Success(v)
            }
            other => other.map(|_| unreachable!()),
        })
    }

    fn try_read_unsigned(&self, r: &mut StreamingReader<'_>) -> Result<DecodeResult<u64>> {
        Ok(match self.try_read_integer(r) {
            DecodeResult::Success(IntegerToken::Unsigned(v)) => DecodeResult::Success(v),
            DecodeResult::Success(IntegerToken::Signed(v)) => {
                return Err(Error::IntegerOutOfRange {
                    value: i128::from(v),
                    target: "u64",
                });
            }
            other => other.map(|_| unreachable!()),
        })
    }

    fn try_read_f32(&self, r: &mut StreamingReader<'_>) -> DecodeResult<f32> {
        // Peek first: an f64 token must not be consumed by a mismatching read
        match r.peek() {
            Some(code::F32) => match self.try_read_float(r) {
                DecodeResult::Success(FloatToken::F32(v)) => DecodeResult::Success(v),
                other => other.map(|_| unreachable!()),
            },
            Some(other) => DecodeResult::TokenMismatch(other),
            None => r.underflow(),
        }
    }

    fn try_read_f64(&self, r: &mut StreamingReader<'_>) -> DecodeResult<f64> {
        match self.try_read_float(r) {
            DecodeResult::Success(FloatToken::F32(v)) => DecodeResult::Success(f64::from(v)),
            DecodeResult::Success(FloatToken::F64(v)) => DecodeResult::Success(v),
            other => other.map(|_| unreachable!()),
        }
    }

    fn try_read_float(&self, r: &mut StreamingReader<'_>) -> DecodeResult<FloatToken> {
        match r.peek() {
            Some(code::F32) => match r.fetch(5) {
                Some(b) => {
                    let v = f32::from_bits(be32(&b[1..]));
                    r.advance(5);
                    DecodeResult::Success(FloatToken::F32(v))
                }
                None => r.underflow(),
            },
            Some(code::F64) => match r.fetch(9) {
                Some(b) => {
                    let v = f64::from_bits(be64(&b[1..]));
                    r.advance(9);
                    DecodeResult::Success(FloatToken::F64(v))
                }
                None => r.underflow(),
            },
            Some(other) => DecodeResult::TokenMismatch(other),
            None => r.underflow(),
        }
    }

    fn try_read_string(&self, r: &mut StreamingReader<'_>) -> Result<DecodeResult<String>> {
        Ok(match self.try_read_string_span(r) {
            DecodeResult::Success(span) => {
                let s = std::str::from_utf8(span)?;
                DecodeResult::Success(s.to_owned())
            }
            other => other.map(|_| unreachable!()),
        })
    }

    fn try_read_string_span<'a>(&self, r: &mut StreamingReader<'a>) -> DecodeResult<&'a [u8]> {
        use self::code as c;
        Self::read_length_prefixed(r, |lead| match lead {
            c::FIXSTR_LOW..=c::FIXSTR_HIGH => {
                Some((1, LengthWidth::Fix((lead & 0x1f) as usize)))
            }
            c::STR8 => Some((2, LengthWidth::U8)),
            c::STR16 => Some((3, LengthWidth::U16)),
            c::STR32 => Some((5, LengthWidth::U32)),
            _ => None,
        })
    }

    fn try_read_binary<'a>(&self, r: &mut StreamingReader<'a>) -> DecodeResult<&'a [u8]> {
        use self::code as c;
        Self::read_length_prefixed(r, |lead| match lead {
            c::BIN8 => Some((2, LengthWidth::U8)),
            c::BIN16 => Some((3, LengthWidth::U16)),
            c::BIN32 => Some((5, LengthWidth::U32)),
            _ => None,
        })
    }

    fn try_read_array_header(&self, r: &mut StreamingReader<'_>) -> DecodeResult<usize> {
        use self::code as c;
        let Some(lead) = r.peek() else {
            return r.underflow();
        };
        match lead {
            c::FIXARRAY_LOW..=c::FIXARRAY_HIGH => {
                r.advance(1);
                DecodeResult::Success((lead & 0x0f) as usize)
            }
            c::ARRAY16 => match r.fetch(3) {
                Some(b) => {
                    let n = be16(&b[1..]) as usize;
                    r.advance(3);
                    DecodeResult::Success(n)
                }
                None => r.underflow(),
            },
            c::ARRAY32 => match r.fetch(5) {
                Some(b) => {
                    let n = be32(&b[1..]) as usize;
                    r.advance(5);
                    DecodeResult::Success(n)
                }
                None => r.underflow(),
            },
            other => DecodeResult::TokenMismatch(other),
        }
    }

    fn try_read_map_header(&self, r: &mut StreamingReader<'_>) -> DecodeResult<usize> {
        use self::code as c;
        let Some(lead) = r.peek() else {
            return r.underflow();
        };
        match lead {
            c::FIXMAP_LOW..=c::FIXMAP_HIGH => {
                r.advance(1);
                DecodeResult::Success((lead & 0x0f) as usize)
            }
            c::MAP16 => match r.fetch(3) {
                Some(b) => {
                    let n = be16(&b[1..]) as usize;
                    r.advance(3);
                    DecodeResult::Success(n)
                }
                None => r.underflow(),
            },
            c::MAP32 => match r.fetch(5) {
                Some(b) => {
                    let n = be32(&b[1..]) as usize;
                    r.advance(5);
                    DecodeResult::Success(n)
                }
                None => r.underflow(),
            },
            other => DecodeResult::TokenMismatch(other),
        }
    }

    fn try_peek_extension_type(&self, r: &StreamingReader<'_>) -> DecodeResult<i8> {
        Self::peek_extension_header(r).map(|(_, header)| header.type_code)
    }

    fn try_read_extension<'a>(&self, r: &mut StreamingReader<'a>) -> DecodeResult<(i8, &'a [u8])> {
        let (header_len, header) = match Self::peek_extension_header(r) {
            DecodeResult::Success(v) => v,
            other => return other.map(|_| unreachable!()),
        };
        let total = header_len + header.length as usize;
        match r.fetch(total) {
            Some(token) => {
                r.advance(total);
                DecodeResult::Success((header.type_code, &token[header_len..]))
            }
            None => r.underflow(),
        }
    }

    fn try_read_timestamp(&self, r: &mut StreamingReader<'_>) -> Result<DecodeResult<SystemTime>> {
        let (_, header) = match Self::peek_extension_header(r) {
            DecodeResult::Success(v) => v,
            other => return Ok(other.map(|_| unreachable!())),
        };
        if header.type_code != TIMESTAMP_EXTENSION_TYPE {
            return Ok(DecodeResult::TokenMismatch(
                self.try_peek_next_code(r).require("extension")?,
            ));
        }
        let (_, payload) = match self.try_read_extension(r) {
            DecodeResult::Success(v) => v,
            other => return Ok(other.map(|_| unreachable!())),
        };
        #[allow(clippy::cast_possible_wrap)]
        let (secs, nanos) = match payload.len() {
            4 => (i64::from(be32(payload)), 0),
            8 => {
                let packed = be64(payload);
                ((packed & 0x3_ffff_ffff) as i64, (packed >> 34) as u32)
            }
            12 => (be64(&payload[4..]) as i64, be32(payload)),
            other => {
                return Err(Error::UnexpectedLength {
                    expected: 12,
                    actual: other,
                });
            }
        };
        Ok(DecodeResult::Success(compose_timestamp(secs, nanos)))
    }

    fn try_skip(
        &self,
        r: &mut StreamingReader<'_>,
        context: &mut SerializationContext,
    ) -> Result<DecodeResult<()>> {
        use self::code as c;
        let Some(lead) = r.peek() else {
            return Ok(r.underflow());
        };
        // Scalar tokens have a statically known total length.
        let fixed_len = match lead {
            0x00..=0x7f | c::NEGFIXINT_LOW..=0xff | c::NIL | c::TRUE | c::FALSE => Some(1),
            c::UINT8 | c::INT8 => Some(2),
            c::UINT16 | c::INT16 => Some(3),
            c::UINT32 | c::INT32 | c::F32 => Some(5),
            c::UINT64 | c::INT64 | c::F64 => Some(9),
            _ => None,
        };
        if let Some(n) = fixed_len {
            return Ok(match r.fetch(n) {
                Some(_) => {
                    r.advance(n);
                    DecodeResult::Success(())
                }
                None => r.underflow(),
            });
        }
        match Self::classify(lead) {
            TypeCode::String => Ok(self.try_read_string_span(r).map(|_| ())),
            TypeCode::Binary => Ok(self.try_read_binary(r).map(|_| ())),
            TypeCode::Extension => Ok(self.try_read_extension(r).map(|_| ())),
            TypeCode::Vector => {
                let n = match self.try_read_array_header(r) {
                    DecodeResult::Success(n) => n,
                    other => return Ok(other.map(|_| unreachable!())),
                };
                self.skip_children(r, context, n)
            }
            TypeCode::Map => {
                let n = match self.try_read_map_header(r) {
                    DecodeResult::Success(n) => n,
                    other => return Ok(other.map(|_| unreachable!())),
                };
                self.skip_children(r, context, n.saturating_mul(2))
            }
            _ => Ok(DecodeResult::TokenMismatch(lead)),
        }
    }
}

impl MsgPackDeformatter {
    /// Skips `count` child structures, one depth step down.
    ///
    /// On a non-`Success` outcome the cursor may have advanced past some of
    /// the children; callers of [`StreamingDeformatter::try_skip`] retry with
    /// a fresh cursor after refilling.
    fn skip_children(
        &self,
        r: &mut StreamingReader<'_>,
        context: &mut SerializationContext,
        count: usize,
    ) -> Result<DecodeResult<()>> {
        context.depth_step(|context| {
            for _ in 0..count {
                match self.try_skip(r, context)? {
                    DecodeResult::Success(()) => (),
                    other => return Ok(other),
                }
            }
            Ok(DecodeResult::Success(()))
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::super::{DecodeResult, FloatToken, IntegerToken, StreamingDeformatter, TypeCode};
    use super::{MSGPACK_DEFORMATTER, MSGPACK_FORMATTER};
    use crate::context::SerializationContext;
    use crate::format::Formatter;
    use crate::io::StreamingReader;
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn encode(f: impl FnOnce(&mut BytesMut)) -> Vec<u8> {
        let mut buf = BytesMut::new();
        f(&mut buf);
        buf.to_vec()
    }

    #[rstest]
    #[case(0, vec![0x00])]
    #[case(127, vec![0x7f])]
    #[case(128, vec![0xcc, 0x80])]
    #[case(255, vec![0xcc, 0xff])]
    #[case(256, vec![0xcd, 0x01, 0x00])]
    #[case(65_535, vec![0xcd, 0xff, 0xff])]
    #[case(65_536, vec![0xce, 0x00, 0x01, 0x00, 0x00])]
    #[case(u64::from(u32::MAX) + 1, vec![0xcf, 0, 0, 0, 1, 0, 0, 0, 0])]
    fn unsigned_minimal_encoding(#[case] value: u64, #[case] expected: Vec<u8>) {
        let wire = encode(|b| MSGPACK_FORMATTER.write_unsigned(b, value));
        assert_eq!(wire, expected);
        let mut r = StreamingReader::new(&wire, true);
        assert_eq!(
            MSGPACK_DEFORMATTER.try_read_unsigned(&mut r).unwrap(),
            DecodeResult::Success(value)
        );
        assert_eq!(r.consumed(), wire.len());
    }

    #[rstest]
    #[case(-1, vec![0xff])]
    #[case(-32, vec![0xe0])]
    #[case(-33, vec![0xd0, 0xdf])]
    #[case(-128, vec![0xd0, 0x80])]
    #[case(-129, vec![0xd1, 0xff, 0x7f])]
    #[case(-32_768, vec![0xd1, 0x80, 0x00])]
    #[case(-32_769, vec![0xd2, 0xff, 0xff, 0x7f, 0xff])]
    #[case(i64::from(i32::MIN) - 1, vec![0xd3, 0xff, 0xff, 0xff, 0xff, 0x7f, 0xff, 0xff, 0xff])]
    fn signed_minimal_encoding(#[case] value: i64, #[case] expected: Vec<u8>) {
        let wire = encode(|b| MSGPACK_FORMATTER.write_signed(b, value));
        assert_eq!(wire, expected);
        let mut r = StreamingReader::new(&wire, true);
        assert_eq!(
            MSGPACK_DEFORMATTER.try_read_signed(&mut r).unwrap(),
            DecodeResult::Success(value)
        );
    }

    #[test]
    fn nonnegative_signed_uses_unsigned_tokens() {
        let wire = encode(|b| MSGPACK_FORMATTER.write_signed(b, 127));
        assert_eq!(wire, vec![0x7f]);
    }

    #[test]
    fn integer_sign_class_follows_value() {
        // An int8 token holding 5 widens to the unsigned class.
        let wire = vec![0xd0, 0x05];
        let mut r = StreamingReader::new(&wire, true);
        assert_eq!(
            MSGPACK_DEFORMATTER.try_read_integer(&mut r),
            DecodeResult::Success(IntegerToken::Unsigned(5))
        );
    }

    #[test]
    fn string_tokens() {
        let wire = encode(|b| MSGPACK_FORMATTER.write_str(b, "hello"));
        assert_eq!(wire, vec![0xa5, b'h', b'e', b'l', b'l', b'o']);
        let mut r = StreamingReader::new(&wire, true);
        assert_eq!(
            MSGPACK_DEFORMATTER.try_read_string(&mut r).unwrap(),
            DecodeResult::Success("hello".to_owned())
        );

        let long = "x".repeat(40);
        let wire = encode(|b| MSGPACK_FORMATTER.write_str(b, &long));
        assert_eq!(wire[0], 0xd9);
        assert_eq!(wire[1], 40);
    }

    #[test]
    fn binary_tokens() {
        let wire = encode(|b| MSGPACK_FORMATTER.write_bytes(b, &[1, 2, 3]));
        assert_eq!(wire, vec![0xc4, 3, 1, 2, 3]);
        let mut r = StreamingReader::new(&wire, true);
        assert_eq!(
            MSGPACK_DEFORMATTER.try_read_binary(&mut r),
            DecodeResult::Success(&[1u8, 2, 3][..])
        );
    }

    #[test]
    fn container_headers() {
        let wire = encode(|b| MSGPACK_FORMATTER.write_array_start(b, 3));
        assert_eq!(wire, vec![0x93]);
        let wire = encode(|b| MSGPACK_FORMATTER.write_array_start(b, 16));
        assert_eq!(wire, vec![0xdc, 0x00, 0x10]);
        let wire = encode(|b| MSGPACK_FORMATTER.write_map_start(b, 2));
        assert_eq!(wire, vec![0x82]);
    }

    #[test]
    fn float_width_is_preserved() {
        let wire = encode(|b| MSGPACK_FORMATTER.write_f32(b, 1.5));
        let mut r = StreamingReader::new(&wire, true);
        assert_eq!(
            MSGPACK_DEFORMATTER.try_read_float(&mut r),
            DecodeResult::Success(FloatToken::F32(1.5))
        );
        // f64 read widens an f32 token
        let mut r = StreamingReader::new(&wire, true);
        assert_eq!(
            MSGPACK_DEFORMATTER.try_read_f64(&mut r),
            DecodeResult::Success(1.5)
        );
    }

    #[rstest]
    #[case(UNIX_EPOCH + Duration::from_secs(1_700_000_000))] // 4-byte form
    #[case(UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789))] // 8-byte form
    #[case(UNIX_EPOCH + Duration::from_secs(1 << 35))] // 12-byte form
    #[case(UNIX_EPOCH - Duration::from_nanos(1))] // pre-epoch
    #[case(UNIX_EPOCH - Duration::new(3, 500_000_000))]
    fn timestamp_roundtrip(#[case] t: SystemTime) {
        let wire = encode(|b| MSGPACK_FORMATTER.write_timestamp(b, t));
        let mut r = StreamingReader::new(&wire, true);
        assert_eq!(
            MSGPACK_DEFORMATTER.try_read_timestamp(&mut r).unwrap(),
            DecodeResult::Success(t)
        );
        assert_eq!(r.consumed(), wire.len());
    }

    #[test]
    fn timestamp_4_byte_form_is_fixext4() {
        let t = UNIX_EPOCH + Duration::from_secs(1);
        let wire = encode(|b| MSGPACK_FORMATTER.write_timestamp(b, t));
        assert_eq!(wire, vec![0xd6, 0xff, 0, 0, 0, 1]);
    }

    #[test]
    fn peek_classification() {
        for (byte, expected) in [
            (0x00u8, TypeCode::Integer),
            (0xe5, TypeCode::Integer),
            (0xc0, TypeCode::Nil),
            (0xc2, TypeCode::Boolean),
            (0xca, TypeCode::Float),
            (0xa1, TypeCode::String),
            (0xc4, TypeCode::Binary),
            (0x91, TypeCode::Vector),
            (0x81, TypeCode::Map),
            (0xd6, TypeCode::Extension),
            (0xc1, TypeCode::Unknown),
        ] {
            let wire = [byte];
            let r = StreamingReader::new(&wire, true);
            assert_eq!(
                MSGPACK_DEFORMATTER.try_peek_next_type(&r),
                DecodeResult::Success(expected),
                "lead byte {byte:#04x}"
            );
        }
    }

    #[test]
    fn insufficient_vs_empty() {
        // A u16 token cut short: more may arrive
        let wire = [0xcdu8, 0x01];
        let mut r = StreamingReader::new(&wire, false);
        assert_eq!(
            MSGPACK_DEFORMATTER.try_read_unsigned(&mut r).unwrap(),
            DecodeResult::InsufficientBuffer
        );
        assert_eq!(r.consumed(), 0);
        // Same bytes at end-of-source
        let mut r = StreamingReader::new(&wire, true);
        assert_eq!(
            MSGPACK_DEFORMATTER.try_read_unsigned(&mut r).unwrap(),
            DecodeResult::EmptyBuffer
        );
    }

    #[test]
    fn mismatch_consumes_nothing() {
        let wire = [0xc0u8]; // nil where a bool was wanted
        let mut r = StreamingReader::new(&wire, true);
        assert_eq!(
            MSGPACK_DEFORMATTER.try_read_bool(&mut r),
            DecodeResult::TokenMismatch(0xc0)
        );
        assert_eq!(r.consumed(), 0);
    }

    #[test]
    fn skip_whole_structures() {
        // [1, "ab", {"k": [true]}]
        let wire = [
            0x93, 0x01, 0xa2, b'a', b'b', 0x81, 0xa1, b'k', 0x91, 0xc3,
        ];
        let mut cx = SerializationContext::default();
        let mut r = StreamingReader::new(&wire, true);
        assert_eq!(
            MSGPACK_DEFORMATTER.try_skip(&mut r, &mut cx).unwrap(),
            DecodeResult::Success(())
        );
        assert_eq!(r.consumed(), wire.len());
    }

    #[test]
    fn skip_respects_depth_bound() {
        // 3 nested arrays with max_depth 2
        let wire = [0x91, 0x91, 0x91, 0xc0];
        let mut cx = SerializationContext::with_max_depth(2);
        let mut r = StreamingReader::new(&wire, true);
        let e = MSGPACK_DEFORMATTER.try_skip(&mut r, &mut cx).unwrap_err();
        assert!(matches!(e, crate::Error::DepthExceeded));
    }
}
