//! Error taxonomy for the converter pipeline
// (c) 2025 Ross Younger

/// Convenience alias used throughout this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while converting values to or from the wire.
///
/// There is no in-converter recovery: any error unwinds the current
/// (de)serialization call to the caller.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The next token is of a type the converter cannot consume
    #[error("unexpected code {code:#04x} while decoding {reading}")]
    InvalidCode {
        /// The offending lead byte
        code: u8,
        /// What the converter was trying to decode
        reading: &'static str,
    },

    /// Buffer underflow on a synchronous read.
    ///
    /// The async paths never surface this directly; they fetch more bytes and retry.
    #[error("ran out of bytes while decoding")]
    NotEnoughBytes,

    /// An array or map header length does not match the required shape
    #[error("unexpected length {actual} (expected {expected})")]
    UnexpectedLength {
        /// The length the shape demands
        expected: usize,
        /// The length found on the wire
        actual: usize,
    },

    /// A union alias was not found in the subtype table
    #[error("unknown union alias {0}")]
    UnknownAlias(String),

    /// A value's concrete type is not among the declared subtypes of the union base
    #[error("value type is not among the declared subtypes of {0}")]
    UnknownSubtype(&'static str),

    /// An enum ordinal (or name) read from the wire is not a declared member
    #[error("{value} is not a declared member of {type_name}")]
    UnknownOrdinal {
        /// The undeclared wire value
        value: String,
        /// The enum being decoded
        type_name: &'static str,
    },

    /// Nesting depth breached the context's `max_depth`
    #[error("maximum serialization depth exceeded")]
    DepthExceeded,

    /// The cancellation signal was observed
    #[error("operation was cancelled")]
    Cancelled,

    /// The async writer's pipe was flushed but the receiver has gone away
    #[error("receiver has stopped listening")]
    ReceiverClosed,

    /// A property key occurred more than once in an object-as-map payload
    #[error("property {0} was assigned more than once")]
    DoublePropertyAssignment(String),

    /// Required properties were absent at the end of deserialization
    #[error("missing required properties: {0}")]
    MissingRequiredProperties(String),

    /// The operation is not supported by this converter
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// An integer token's value does not fit the requested width
    #[error("integer {value} does not fit in {target}")]
    IntegerOutOfRange {
        /// The decoded value
        value: i128,
        /// The requested target type
        target: &'static str,
    },

    /// A string payload was not valid UTF-8
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Shape registration or converter construction failed
    #[error("shape error: {0}")]
    Shape(String),

    /// An I/O error from the underlying pipe
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::Error;
    use assertables::assert_contains;

    #[test]
    fn display_renders_code_in_hex() {
        let e = Error::InvalidCode {
            code: 0xc1,
            reading: "bool",
        };
        assert_contains!(e.to_string(), "0xc1");
        assert_contains!(e.to_string(), "bool");
    }

    #[test]
    fn io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let e = Error::from(io);
        assert!(matches!(e, Error::Io(_)));
    }
}
