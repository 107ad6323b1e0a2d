//! Refillable byte buffer underlying the async reader
// (c) 2025 Ross Younger

use bytes::BytesMut;

/// Owns the byte sequence being decoded: a growable region, a consumed-prefix
/// cursor, and the end-of-source flag.
///
/// Appends extend the unread region; [`advance`](Self::advance) consumes from
/// its front; [`compact`](Self::compact) reclaims the consumed prefix.
#[derive(Debug, Default)]
pub(crate) struct ReadBuffer {
    data: BytesMut,
    pos: usize,
    eof: bool,
}

impl ReadBuffer {
    /// The unread region
    pub(crate) fn unread(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    /// Number of unread bytes
    pub(crate) fn unread_len(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Consumes `n` bytes from the front of the unread region
    pub(crate) fn advance(&mut self, n: usize) {
        debug_assert!(self.pos + n <= self.data.len());
        self.pos += n;
    }

    /// Releases the consumed prefix so its memory can be reused
    pub(crate) fn compact(&mut self) {
        if self.pos > 0 {
            drop(self.data.split_to(self.pos));
            self.pos = 0;
        }
    }

    /// Mutable access for refills; new bytes land after the unread region
    pub(crate) fn data_mut(&mut self) -> &mut BytesMut {
        &mut self.data
    }

    /// Records that the source has signalled completion
    pub(crate) fn set_eof(&mut self) {
        self.eof = true;
    }

    /// True once the source has signalled completion
    pub(crate) fn is_eof(&self) -> bool {
        self.eof
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::ReadBuffer;
    use bytes::BufMut;
    use pretty_assertions::assert_eq;

    #[test]
    fn advance_and_compact() {
        let mut b = ReadBuffer::default();
        b.data_mut().put_slice(&[1, 2, 3, 4]);
        assert_eq!(b.unread(), &[1, 2, 3, 4]);
        b.advance(3);
        assert_eq!(b.unread(), &[4]);
        b.compact();
        assert_eq!(b.unread(), &[4]);
        assert_eq!(b.unread_len(), 1);
        b.data_mut().put_u8(5);
        assert_eq!(b.unread(), &[4, 5]);
    }
}
