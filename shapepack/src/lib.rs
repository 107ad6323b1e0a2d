// (c) 2025 Ross Younger

//! `shapepack` is a schema-driven MessagePack serializer: it maps arbitrary
//! in-memory types to and from the MessagePack wire format, driven by
//! structural type descriptors ("shapes") registered at startup rather than
//! by derive macros or runtime reflection.
//!
//! ## 📖 Overview
//!
//! * Describe each of your types once with a [`Shape`](shape::Shape):
//!   objects with named or positional properties, dictionaries, sequences,
//!   enums, unions (polymorphic dispatch by alias), nullables, and more.
//! * Register the shapes with a [`Serializer`]; it builds and interns one
//!   [`Converter`](convert::Converter) per type, resolving recursive type
//!   graphs through a delayed-construction cache.
//! * Convert with [`to_vec`](Serializer::to_vec) /
//!   [`from_slice`](Serializer::from_slice), or stream to and from pipes
//!   with [`write_async`](Serializer::write_async) /
//!   [`read_async`](Serializer::read_async). One converter implementation
//!   serves both paths, thanks to a streaming decoder protocol that reports
//!   "needs more bytes" instead of failing.
//!
//! ## Example
//!
//! ```rust
//! use shapepack::{Serializer, shape::{Shape, ShapeRef}};
//!
//! #[derive(Debug, Default, PartialEq)]
//! struct Point { x: i32, y: i32 }
//!
//! let mut ser = Serializer::default();
//! ser.register(
//!     Shape::<Point>::object()
//!         .required("x", ShapeRef::by_type(), |p: &Point| &p.x, |p, v| p.x = v)
//!         .required("y", ShapeRef::by_type(), |p: &Point| &p.y, |p, v| p.y = v)
//!         .build(),
//! );
//!
//! let wire = ser.to_vec(&Point { x: 10, y: 20 }).unwrap();
//! // {"x": 10, "y": 20}
//! assert_eq!(wire, b"\x82\xa1x\x0a\xa1y\x14");
//! let back: Point = ser.from_slice(&wire).unwrap();
//! assert_eq!(back, Point { x: 10, y: 20 });
//! ```
//!
//! ## Guarantees
//!
//! * Every successful read consumes, and every successful write emits,
//!   exactly one top-level MessagePack structure.
//! * Nesting depth is bounded (`max_depth`, default 64); breach raises
//!   [`Error::DepthExceeded`].
//! * Duplicate property keys in an object payload are rejected rather than
//!   silently resolved first- or last-wins.
//! * Unknown properties are skipped, or captured verbatim into an
//!   [`UnusedDataPacket`] for types that opt in.
//! * With `preserve_references`, repeated [`Arc`](std::sync::Arc)s serialize
//!   once and round-trip with identity intact via backref extensions.
//!
//! Configuration lives in [`SerializerOptions`](options::SerializerOptions);
//! cancellation uses [`CancellationToken`](tokio_util::sync::CancellationToken).
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod error;
pub use error::{Error, Result};

mod options;
pub use options::{DeserializeDefaultValues, SerializeDefaultValues, SerializerOptions};

mod context;
pub use context::{Extensions, SerializationContext};

pub mod format;
pub mod io;

pub mod shape;
pub mod convert;

pub(crate) mod cache;
pub(crate) mod collision;
pub(crate) mod track;

mod unused;
pub use unused::UnusedDataPacket;

mod value;
pub use value::{Value, ValueMap};

mod serializer;
pub use serializer::Serializer;
