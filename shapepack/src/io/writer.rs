//! Synchronous write cursor
// (c) 2025 Ross Younger

use std::time::SystemTime;

use bytes::BytesMut;

use crate::format::{Formatter, MSGPACK_FORMATTER};

/// The synchronous write cursor used by converters.
///
/// A borrowed façade over a [`Formatter`]: every `write_*` appends exactly
/// one token to the target buffer. Writes are infallible at this level;
/// failures are structural and surface from allocation.
#[derive(Debug)]
pub struct Writer<'a> {
    buf: &'a mut BytesMut,
    fmt: &'static dyn Formatter,
}

impl<'a> Writer<'a> {
    /// Creates a MessagePack writer appending to `buf`
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self::with_formatter(buf, &MSGPACK_FORMATTER)
    }

    /// Creates a writer with an explicit format
    pub fn with_formatter(buf: &'a mut BytesMut, fmt: &'static dyn Formatter) -> Self {
        Self { buf, fmt }
    }

    /// The formatter this writer encodes with
    #[must_use]
    pub fn formatter(&self) -> &'static dyn Formatter {
        self.fmt
    }

    /// Bytes in the target buffer so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if the target buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Appends the nil sentinel
    pub fn write_nil(&mut self) {
        self.fmt.write_nil(self.buf);
    }

    /// Appends a boolean
    pub fn write_bool(&mut self, value: bool) {
        self.fmt.write_bool(self.buf, value);
    }

    /// Appends an unsigned integer (narrowest encoding)
    pub fn write_u64(&mut self, value: u64) {
        self.fmt.write_unsigned(self.buf, value);
    }

    /// Appends a signed integer (narrowest encoding)
    pub fn write_i64(&mut self, value: i64) {
        self.fmt.write_signed(self.buf, value);
    }

    /// Appends a u8
    pub fn write_u8(&mut self, value: u8) {
        self.write_u64(u64::from(value));
    }
    /// Appends a u16
    pub fn write_u16(&mut self, value: u16) {
        self.write_u64(u64::from(value));
    }
    /// Appends a u32
    pub fn write_u32(&mut self, value: u32) {
        self.write_u64(u64::from(value));
    }
    /// Appends an i8
    pub fn write_i8(&mut self, value: i8) {
        self.write_i64(i64::from(value));
    }
    /// Appends an i16
    pub fn write_i16(&mut self, value: i16) {
        self.write_i64(i64::from(value));
    }
    /// Appends an i32
    pub fn write_i32(&mut self, value: i32) {
        self.write_i64(i64::from(value));
    }

    /// Appends an f32
    pub fn write_f32(&mut self, value: f32) {
        self.fmt.write_f32(self.buf, value);
    }

    /// Appends an f64
    pub fn write_f64(&mut self, value: f64) {
        self.fmt.write_f64(self.buf, value);
    }

    /// Appends a char as its unsigned scalar value
    pub fn write_char(&mut self, value: char) {
        self.write_u64(u64::from(u32::from(value)));
    }

    /// Appends a UTF-8 string
    pub fn write_str(&mut self, value: &str) {
        self.fmt.write_str(self.buf, value);
    }

    /// Appends a binary blob
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.fmt.write_bytes(self.buf, value);
    }

    /// Appends an extension token
    pub fn write_extension(&mut self, type_code: i8, payload: &[u8]) {
        self.fmt.write_extension(self.buf, type_code, payload);
    }

    /// Appends a point in time
    pub fn write_timestamp(&mut self, value: SystemTime) {
        self.fmt.write_timestamp(self.buf, value);
    }

    /// Opens an array of `len` elements
    pub fn write_array_start(&mut self, len: usize) {
        self.fmt.write_array_start(self.buf, len);
    }

    /// Separates two array elements
    pub fn write_array_element_separator(&mut self) {
        self.fmt.write_array_element_separator(self.buf);
    }

    /// Closes an array
    pub fn write_array_end(&mut self) {
        self.fmt.write_array_end(self.buf);
    }

    /// Opens a map of `count` pairs
    pub fn write_map_start(&mut self, count: usize) {
        self.fmt.write_map_start(self.buf, count);
    }

    /// Separates two map entries
    pub fn write_map_pair_separator(&mut self) {
        self.fmt.write_map_pair_separator(self.buf);
    }

    /// Closes a map
    pub fn write_map_end(&mut self) {
        self.fmt.write_map_end(self.buf);
    }

    /// Appends pre-encoded bytes verbatim.
    ///
    /// The caller asserts the bytes form whole tokens of this writer's format
    /// (pre-encoded property names, captured unknown fields, raw payloads).
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::Writer;
    use crate::io::Reader;
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;

    #[test]
    fn tokens_roundtrip_through_reader() {
        let mut buf = BytesMut::new();
        let mut w = Writer::new(&mut buf);
        w.write_array_start(4);
        w.write_i32(-7);
        w.write_str("hi");
        w.write_bool(true);
        w.write_nil();
        w.write_array_end();

        let wire = buf.to_vec();
        let mut r = Reader::new(&wire);
        assert_eq!(r.read_array_header().unwrap(), 4);
        assert_eq!(r.read_i32().unwrap(), -7);
        assert_eq!(r.read_str().unwrap(), "hi");
        assert!(r.read_bool().unwrap());
        r.read_nil().unwrap();
        assert!(r.is_empty());
    }

    #[test]
    fn raw_passthrough() {
        let mut buf = BytesMut::new();
        let mut w = Writer::new(&mut buf);
        w.write_raw(&[0x92, 0x01, 0x02]);
        assert_eq!(buf.to_vec(), vec![0x92, 0x01, 0x02]);
    }
}
