//! Serializer configuration surface
// (c) 2025 Ross Younger

use serde::{Deserialize, Serialize};

/// The set of configurable options applied at serializer construction.
///
/// This is a process-agnostic record: it carries no notion of where the
/// values came from. Hosts may deserialize it from whatever configuration
/// mechanism they use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializerOptions {
    /// Maximum nesting depth before (de)serialization raises
    /// [`DepthExceeded`](crate::Error::DepthExceeded). [default: 64]
    pub max_depth: u32,

    /// Number of staged-but-unflushed bytes an async writer tolerates before
    /// [`flush_if_appropriate`](crate::io::AsyncWriter::flush_if_appropriate)
    /// commits to the pipe. [default: 65536]
    pub unflushed_bytes_threshold: usize,

    /// Replace repeated `Arc` references with backward indexes on the wire,
    /// preserving object identity across a round trip. [default: false]
    pub preserve_references: bool,

    /// Whether properties at their default value are emitted. [default: Always]
    pub serialize_default_values: SerializeDefaultValues,

    /// Whether missing required properties raise on deserialization.
    /// [default: Strict]
    pub deserialize_default_values: DeserializeDefaultValues,
}

impl Default for SerializerOptions {
    fn default() -> Self {
        Self {
            max_depth: 64,
            unflushed_bytes_threshold: 65_536,
            preserve_references: false,
            serialize_default_values: SerializeDefaultValues::default(),
            deserialize_default_values: DeserializeDefaultValues::default(),
        }
    }
}

/// Policy for emitting properties that hold their default value.
///
/// Only properties registered with a default-detecting accessor
/// (see [`ObjectShapeBuilder::property_skipping_default`](crate::shape::ObjectShapeBuilder::property_skipping_default))
/// participate; everything else is always emitted.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
pub enum SerializeDefaultValues {
    /// Emit every property
    #[default]
    Always,
    /// Emit defaulted properties only when the property is required
    Required,
    /// Skip every defaulted property
    Never,
}

/// Policy for required properties absent from the wire.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
pub enum DeserializeDefaultValues {
    /// A missing required property raises
    /// [`MissingRequiredProperties`](crate::Error::MissingRequiredProperties)
    #[default]
    Strict,
    /// Missing required properties keep their default values
    AllowMissingRequired,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::{DeserializeDefaultValues, SerializeDefaultValues, SerializerOptions};
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let o = SerializerOptions::default();
        assert_eq!(o.max_depth, 64);
        assert_eq!(o.unflushed_bytes_threshold, 65_536);
        assert!(!o.preserve_references);
        assert_eq!(o.serialize_default_values, SerializeDefaultValues::Always);
        assert_eq!(
            o.deserialize_default_values,
            DeserializeDefaultValues::Strict
        );
    }

    #[test]
    fn partial_config_roundtrip() {
        // Unspecified fields take their defaults
        let o: SerializerOptions = serde_json::from_str(r#"{"max_depth": 8}"#).unwrap();
        assert_eq!(o.max_depth, 8);
        assert_eq!(o.unflushed_bytes_threshold, 65_536);

        let json = serde_json::to_string(&o).unwrap();
        let back: SerializerOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(o, back);
    }
}
