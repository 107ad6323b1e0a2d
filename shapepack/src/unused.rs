//! Round-trip capture of unknown object properties
// (c) 2025 Ross Younger

use crate::io::Writer;

/// An opaque, order-preserving capture of unknown properties seen while
/// deserializing an object-as-map payload.
///
/// Both the key and the value are held as raw encoded tokens, so re-emitting
/// them reproduces the original bytes verbatim. Types opt in through
/// [`ObjectShapeBuilder::unused_data`](crate::shape::ObjectShapeBuilder::unused_data);
/// without the opt-in, unknown properties are skipped.
///
/// On re-emit, captured entries are appended after all known properties, in
/// their original relative order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnusedDataPacket {
    entries: Vec<UnusedEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UnusedEntry {
    /// The full encoded key token (string family)
    key: Vec<u8>,
    /// The full encoded value structure
    value: Vec<u8>,
}

impl UnusedDataPacket {
    /// Captures one unknown property, appending it in arrival order
    pub(crate) fn add(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.push(UnusedEntry { key, value });
    }

    /// Number of captured properties
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The captured entries as (raw key token, raw value structure) pairs
    pub fn entries(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries
            .iter()
            .map(|e| (e.key.as_slice(), e.value.as_slice()))
    }

    /// Re-emits every captured entry verbatim
    pub(crate) fn write_entries(&self, writer: &mut Writer<'_>) {
        for entry in &self.entries {
            writer.write_raw(&entry.key);
            writer.write_raw(&entry.value);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::UnusedDataPacket;
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;

    #[test]
    fn entries_reemit_verbatim_in_order() {
        let mut p = UnusedDataPacket::default();
        p.add(vec![0xa1, b'b'], vec![0x02]);
        p.add(vec![0xa1, b'a'], vec![0x01]);
        assert_eq!(p.len(), 2);

        let mut buf = BytesMut::new();
        let mut w = crate::io::Writer::new(&mut buf);
        p.write_entries(&mut w);
        assert_eq!(buf.to_vec(), vec![0xa1, b'b', 0x02, 0xa1, b'a', 0x01]);
    }
}
