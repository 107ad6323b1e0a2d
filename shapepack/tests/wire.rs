//! End-to-end wire scenarios
// (c) 2025 Ross Younger

use assertables::assert_matches;
use pretty_assertions::assert_eq;
use shapepack::convert::Converter as _;
use shapepack::shape::{ObjectLayout, Shape, ShapeRef, SubTypesBuilder};
use shapepack::{
    DeserializeDefaultValues, Error, SerializationContext, Serializer, SerializerOptions,
    UnusedDataPacket,
};

// ===========================================================================
// Polymorphic dispatch

#[derive(Debug, Clone, PartialEq, Default)]
struct Base {
    label: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Sub {
    x: i32,
}

#[derive(Debug, Clone, PartialEq)]
enum Animal {
    Base(Base),
    Sub(Sub),
}

fn union_serializer() -> Serializer {
    let mut ser = Serializer::default();
    let base_shape = Shape::<Base>::object()
        .property(
            "label",
            ShapeRef::<String>::by_type(),
            |b: &Base| &b.label,
            |b, v| b.label = v,
        )
        .build();
    let sub_shape = Shape::<Sub>::object()
        .layout(ObjectLayout::Array)
        .required("x", ShapeRef::<i32>::by_type(), |s: &Sub| &s.x, |s, v| {
            s.x = v;
        })
        .build();
    ser.register(Shape::union(
        SubTypesBuilder::<Animal>::new()
            .base_as(
                base_shape,
                |a: &Animal| match a {
                    Animal::Base(b) => Some(b),
                    Animal::Sub(_) => None,
                },
                Animal::Base,
            )
            .subtype(
                5,
                sub_shape,
                |a: &Animal| match a {
                    Animal::Sub(s) => Some(s),
                    Animal::Base(_) => None,
                },
                Animal::Sub,
            ),
    ));
    ser
}

#[test]
fn union_with_integer_alias() {
    let ser = union_serializer();
    let animal = Animal::Sub(Sub { x: 42 });
    let wire = ser.to_vec(&animal).unwrap();
    // [5, [42]]
    assert_eq!(wire, vec![0x92, 0x05, 0x91, 0x2a]);
    let back: Animal = ser.from_slice(&wire).unwrap();
    assert_eq!(back, animal);
}

#[test]
fn union_base_type_uses_nil_alias() {
    let ser = union_serializer();
    let animal = Animal::Base(Base {
        label: "b".to_owned(),
    });
    let wire = ser.to_vec(&animal).unwrap();
    // [nil, {"label": "b"}]
    assert_eq!(
        wire,
        vec![0x92, 0xc0, 0x81, 0xa5, b'l', b'a', b'b', b'e', b'l', 0xa1, b'b']
    );
    let back: Animal = ser.from_slice(&wire).unwrap();
    assert_eq!(back, animal);
}

#[test]
fn union_rejects_unknown_alias_and_bad_arity() {
    let ser = union_serializer();
    // [9, [42]]: alias 9 undeclared
    assert_matches!(
        ser.from_slice::<Animal>(&[0x92, 0x09, 0x91, 0x2a]),
        Err(Error::UnknownAlias(_))
    );
    // [5]: not length 2
    assert_matches!(
        ser.from_slice::<Animal>(&[0x91, 0x05]),
        Err(Error::UnexpectedLength {
            expected: 2,
            actual: 1
        })
    );
}

#[test]
fn nullable_union_nil_idempotence() {
    let mut ser = union_serializer();
    ser.register(Shape::<Option<Animal>>::nullable(ShapeRef::by_type()));
    let wire = ser.to_vec(&None::<Animal>).unwrap();
    assert_eq!(wire, vec![0xc0]);
    assert_eq!(ser.from_slice::<Option<Animal>>(&wire).unwrap(), None);
}

// ===========================================================================
// Recursive types and the depth bound

#[derive(Debug, Default, PartialEq)]
struct Node {
    next: Option<Box<Node>>,
}

fn chain(len: usize) -> Node {
    let mut node = Node { next: None };
    for _ in 1..len {
        node = Node {
            next: Some(Box::new(node)),
        };
    }
    node
}

fn node_serializer(max_depth: u32) -> Serializer {
    let mut ser = Serializer::new(SerializerOptions {
        max_depth,
        ..SerializerOptions::default()
    });
    ser.register(
        Shape::<Node>::object()
            .property(
                "next",
                Shape::<Option<Box<Node>>>::nullable(Shape::<Box<Node>>::boxed(
                    ShapeRef::<Node>::by_type(),
                )),
                |n: &Node| &n.next,
                |n, v| n.next = v,
            )
            .build(),
    );
    ser
}

#[test]
fn recursive_type_roundtrips_within_bound() {
    let ser = node_serializer(64);
    let list = chain(64);
    let wire = ser.to_vec(&list).unwrap();
    let back: Node = ser.from_slice(&wire).unwrap();
    assert_eq!(back, list);
}

#[test]
fn depth_breach_raises_on_the_65th_step() {
    let ser = node_serializer(64);
    let list = chain(65);
    assert_matches!(ser.to_vec(&list), Err(Error::DepthExceeded));
}

#[test]
fn depth_breach_on_read_too() {
    let deep = node_serializer(80);
    let wire = deep.to_vec(&chain(65)).unwrap();
    let shallow = node_serializer(64);
    assert_matches!(shallow.from_slice::<Node>(&wire), Err(Error::DepthExceeded));
}

// ===========================================================================
// Property collision and required properties

#[derive(Debug, Default, PartialEq)]
struct OneProp {
    x: i32,
}

#[test]
fn duplicate_property_raises() {
    let mut ser = Serializer::default();
    ser.register(
        Shape::<OneProp>::object()
            .property("x", ShapeRef::<i32>::by_type(), |o: &OneProp| &o.x, |o, v| {
                o.x = v;
            })
            .build(),
    );
    // {"x": 1, "x": 2}
    let wire = [0x82, 0xa1, 0x78, 0x01, 0xa1, 0x78, 0x02];
    let e = ser.from_slice::<OneProp>(&wire).unwrap_err();
    assert_matches!(e, Error::DoublePropertyAssignment(_));
    assertables::assert_contains!(e.to_string(), "x");
}

#[derive(Debug, Default, PartialEq)]
struct TwoRequired {
    x: i32,
    y: i32,
}

fn two_required(options: SerializerOptions) -> Serializer {
    let mut ser = Serializer::new(options);
    ser.register(
        Shape::<TwoRequired>::object()
            .required(
                "x",
                ShapeRef::<i32>::by_type(),
                |o: &TwoRequired| &o.x,
                |o, v| o.x = v,
            )
            .required(
                "y",
                ShapeRef::<i32>::by_type(),
                |o: &TwoRequired| &o.y,
                |o, v| o.y = v,
            )
            .build(),
    );
    ser
}

#[test]
fn missing_required_property_raises() {
    let ser = two_required(SerializerOptions::default());
    // {"x": 1}
    let wire = [0x81, 0xa1, b'x', 0x01];
    let e = ser.from_slice::<TwoRequired>(&wire).unwrap_err();
    assert_matches!(e, Error::MissingRequiredProperties(_));
    assertables::assert_contains!(e.to_string(), "y");
}

#[test]
fn lenient_policy_fills_defaults() {
    let ser = two_required(SerializerOptions {
        deserialize_default_values: DeserializeDefaultValues::AllowMissingRequired,
        ..SerializerOptions::default()
    });
    let wire = [0x81, 0xa1, b'x', 0x01];
    assert_eq!(
        ser.from_slice::<TwoRequired>(&wire).unwrap(),
        TwoRequired { x: 1, y: 0 }
    );
}

// ===========================================================================
// Constructor-built objects

#[derive(Debug, PartialEq)]
struct Frozen {
    id: u32,
    name: String,
}

#[derive(Default, Debug)]
struct FrozenArgs {
    id: u32,
    name: Option<String>,
}

fn frozen_serializer() -> Serializer {
    let mut ser = Serializer::default();
    ser.register(
        Shape::<Frozen>::object_with(|args: FrozenArgs| {
            Ok(Frozen {
                id: args.id,
                name: args.name.unwrap_or_default(),
            })
        })
        .required(
            "id",
            ShapeRef::<u32>::by_type(),
            |f: &Frozen| &f.id,
            |a, v| a.id = v,
        )
        .required(
            "name",
            ShapeRef::<String>::by_type(),
            |f: &Frozen| &f.name,
            |a, v| a.name = Some(v),
        )
        .build(),
    );
    ser
}

#[test]
fn constructor_object_roundtrip() {
    let ser = frozen_serializer();
    let value = Frozen {
        id: 9,
        name: "nine".to_owned(),
    };
    let wire = ser.to_vec(&value).unwrap();
    assert_eq!(ser.from_slice::<Frozen>(&wire).unwrap(), value);
}

#[test]
fn constructor_object_verifies_required_before_construction() {
    let ser = frozen_serializer();
    // {"id": 9}: name missing
    let wire = [0x81, 0xa2, b'i', b'd', 0x09];
    assert_matches!(
        ser.from_slice::<Frozen>(&wire),
        Err(Error::MissingRequiredProperties(_))
    );
}

// ===========================================================================
// Positional (array-layout) objects

#[derive(Debug, Default, PartialEq)]
struct Pair {
    a: u8,
    b: u8,
}

fn pair_serializer() -> Serializer {
    let mut ser = Serializer::default();
    ser.register(
        Shape::<Pair>::object()
            .layout(ObjectLayout::Array)
            .property("a", ShapeRef::<u8>::by_type(), |p: &Pair| &p.a, |p, v| {
                p.a = v;
            })
            .property("b", ShapeRef::<u8>::by_type(), |p: &Pair| &p.b, |p, v| {
                p.b = v;
            })
            .build(),
    );
    ser
}

#[test]
fn array_layout_roundtrip() {
    let ser = pair_serializer();
    let wire = ser.to_vec(&Pair { a: 1, b: 2 }).unwrap();
    assert_eq!(wire, vec![0x92, 0x01, 0x02]);
    assert_eq!(
        ser.from_slice::<Pair>(&wire).unwrap(),
        Pair { a: 1, b: 2 }
    );
}

#[test]
fn array_layout_trailing_defaults_and_extras() {
    let ser = pair_serializer();
    // [7]: position b keeps its default
    assert_eq!(
        ser.from_slice::<Pair>(&[0x91, 0x07]).unwrap(),
        Pair { a: 7, b: 0 }
    );
    // [7, 8, 9]: the unexpected extra is skipped
    assert_eq!(
        ser.from_slice::<Pair>(&[0x93, 0x07, 0x08, 0x09]).unwrap(),
        Pair { a: 7, b: 8 }
    );
}

// ===========================================================================
// Unknown-key capture

#[derive(Debug, Default, PartialEq)]
struct Extensible {
    id: u32,
    unused: Option<UnusedDataPacket>,
}

fn extensible_serializer() -> Serializer {
    let mut ser = Serializer::default();
    ser.register(
        Shape::<Extensible>::object()
            .required(
                "id",
                ShapeRef::<u32>::by_type(),
                |e: &Extensible| &e.id,
                |e, v| e.id = v,
            )
            .unused_data(
                |e: &Extensible| e.unused.as_ref(),
                |e, packet| e.unused = Some(packet),
            )
            .build(),
    );
    ser
}

#[test]
fn unknown_keys_roundtrip_verbatim_in_order() {
    let ser = extensible_serializer();
    // {"z": 3, "id": 1, "a": [true]}
    let wire = [
        0x83, 0xa1, b'z', 0x03, 0xa2, b'i', b'd', 0x01, 0xa1, b'a', 0x91, 0xc3,
    ];
    let value: Extensible = ser.from_slice(&wire).unwrap();
    assert_eq!(value.id, 1);
    let packet = value.unused.as_ref().unwrap();
    assert_eq!(packet.len(), 2);

    // Re-emit: knowns first, then the unknowns in arrival order, verbatim
    let rewritten = ser.to_vec(&value).unwrap();
    assert_eq!(
        rewritten,
        vec![
            0x83, 0xa2, b'i', b'd', 0x01, // known
            0xa1, b'z', 0x03, // unknown #1
            0xa1, b'a', 0x91, 0xc3, // unknown #2
        ]
    );

    // And a second read sees the same structure again
    let again: Extensible = ser.from_slice(&rewritten).unwrap();
    assert_eq!(again, value);
}

#[test]
fn unknown_keys_are_skipped_without_opt_in() {
    let ser = two_required(SerializerOptions::default());
    // {"x": 1, "junk": {"deep": [1,2]}, "y": 2}
    let wire = [
        0x83, 0xa1, b'x', 0x01, 0xa4, b'j', b'u', b'n', b'k', 0x81, 0xa4, b'd', b'e', b'e', b'p',
        0x92, 0x01, 0x02, 0xa1, b'y', 0x02,
    ];
    assert_eq!(
        ser.from_slice::<TwoRequired>(&wire).unwrap(),
        TwoRequired { x: 1, y: 2 }
    );
}

// ===========================================================================
// Partial access

#[test]
fn skip_to_property_positions_at_value() {
    let ser = two_required(SerializerOptions::default());
    let wire = ser.to_vec(&TwoRequired { x: 10, y: 20 }).unwrap();
    let converter = ser.converter::<TwoRequired>().unwrap();
    let mut context = SerializationContext::new(ser.options());

    let mut reader = shapepack::io::Reader::new(&wire);
    assert!(
        converter
            .skip_to_property(&mut reader, "y", &mut context)
            .unwrap()
    );
    assert_eq!(reader.read_i32().unwrap(), 20);

    let mut reader = shapepack::io::Reader::new(&wire);
    assert!(
        !converter
            .skip_to_property(&mut reader, "absent", &mut context)
            .unwrap()
    );
}

#[test]
fn skip_to_index_positions_at_element() {
    let ser = pair_serializer();
    let wire = ser.to_vec(&Pair { a: 1, b: 2 }).unwrap();
    let converter = ser.converter::<Pair>().unwrap();
    let mut context = SerializationContext::new(ser.options());

    let mut reader = shapepack::io::Reader::new(&wire);
    assert!(
        converter
            .skip_to_index(&mut reader, 1, &mut context)
            .unwrap()
    );
    assert_eq!(reader.read_u8().unwrap(), 2);
}

// ===========================================================================
// Async end-to-end

#[tokio::test]
async fn async_object_stream_roundtrip() {
    let ser = std::sync::Arc::new(frozen_serializer());
    let (client, server) = tokio::io::duplex(256);

    let writer_ser = ser.clone();
    let write_task = tokio::spawn(async move {
        let mut writer = shapepack::io::AsyncWriter::new(client);
        for i in 0..10u32 {
            let value = Frozen {
                id: i,
                name: format!("item-{i}"),
            };
            writer_ser.write_async(&mut writer, &value).await.unwrap();
        }
    });

    let mut reader = shapepack::io::AsyncReader::new(server);
    for i in 0..10u32 {
        let value: Frozen = ser.read_async(&mut reader).await.unwrap();
        assert_eq!(value.id, i);
        assert_eq!(value.name, format!("item-{i}"));
    }
    write_task.await.unwrap();
}

#[tokio::test]
async fn async_union_roundtrip() {
    let ser = union_serializer();
    let (client, server) = tokio::io::duplex(64);
    let mut writer = shapepack::io::AsyncWriter::new(client);
    ser.write_async(&mut writer, &Animal::Sub(Sub { x: -3 }))
        .await
        .unwrap();
    drop(writer);

    let mut reader = shapepack::io::AsyncReader::new(server);
    let back: Animal = ser.read_async(&mut reader).await.unwrap();
    assert_eq!(back, Animal::Sub(Sub { x: -3 }));
}
