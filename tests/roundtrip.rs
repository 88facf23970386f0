//! Round-trip and bound-enforcement tests over representative schemas.

use cdr_codec::{
    Endianness, Error, PrimitiveKind, StructDescriptor, TypeKind, TypeRegistry, UnionDescriptor,
    Value,
};
use paste::paste;
use rand::{rngs::StdRng, Rng, SeedableRng};

fn single_field(name: &str, kind: TypeKind) -> TypeRegistry {
    let mut reg = TypeRegistry::new();
    reg.register(StructDescriptor::new(
        name,
        vec![("v".to_string(), kind)],
    ));
    reg
}

fn wrap(value: Value) -> Value {
    Value::Struct(vec![("v".to_string(), value)])
}

fn roundtrip(reg: &TypeRegistry, name: &str, value: &Value) {
    for endian in [Endianness::Big, Endianness::Little] {
        let wire = reg.encode(name, value, endian).unwrap();
        let decoded = reg.decode(name, &wire, endian).unwrap();
        assert_eq!(&decoded, value, "round trip failed ({endian:?})");
    }
}

macro_rules! primitive_roundtrip_test {
    ($kind:ident, $variant:ident, $ty:ty) => {
        paste! {
            #[test]
            fn [<test_roundtrip_ $ty>]() {
                let reg = single_field("t", TypeKind::Primitive(PrimitiveKind::$kind));
                let mut rng = StdRng::seed_from_u64(0x5EED);
                let mut values: Vec<$ty> = vec![0 as $ty, <$ty>::MAX, <$ty>::MIN];
                for _ in 0..16 {
                    values.push(rng.gen());
                }
                for value in values {
                    roundtrip(&reg, "t", &wrap(Value::$variant(value)));
                }
            }
        }
    };
}

primitive_roundtrip_test!(Int8, I8, i8);
primitive_roundtrip_test!(UInt8, U8, u8);
primitive_roundtrip_test!(Int16, I16, i16);
primitive_roundtrip_test!(UInt16, U16, u16);
primitive_roundtrip_test!(Int32, I32, i32);
primitive_roundtrip_test!(UInt32, U32, u32);
primitive_roundtrip_test!(Int64, I64, i64);
primitive_roundtrip_test!(UInt64, U64, u64);
primitive_roundtrip_test!(Float32, F32, f32);
primitive_roundtrip_test!(Float64, F64, f64);

#[test]
fn test_roundtrip_bool_char() {
    let reg = single_field("t", TypeKind::Primitive(PrimitiveKind::Bool));
    roundtrip(&reg, "t", &wrap(Value::Bool(true)));
    roundtrip(&reg, "t", &wrap(Value::Bool(false)));

    let reg = single_field("t", TypeKind::Char);
    roundtrip(&reg, "t", &wrap(Value::Char('A')));
    roundtrip(&reg, "t", &wrap(Value::Char('\0')));
    roundtrip(&reg, "t", &wrap(Value::Char('\x7f')));
}

#[test]
fn test_char_rejects_non_ascii() {
    let reg = single_field("t", TypeKind::Char);
    // U+00E9 fits in a byte but is outside the ASCII range.
    let err = reg
        .encode("t", &wrap(Value::Char('é')), Endianness::Big)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Context(_, inner) if matches!(*inner, Error::InvalidChar('é'))
    ));

    // The decode side holds the same line: a high byte is not a char.
    let err = reg.decode("t", &[0x80], Endianness::Big).unwrap_err();
    assert!(matches!(
        err,
        Error::Context(_, inner) if matches!(*inner, Error::InvalidChar(_))
    ));
}

#[test]
fn test_roundtrip_strings() {
    let reg = single_field("t", TypeKind::string());
    for s in ["", "hello", "héllo wörld", "a\u{1F980}b"] {
        roundtrip(&reg, "t", &wrap(Value::from(s)));
    }
}

#[test]
fn test_string_bound_enforced() {
    let reg = single_field("t", TypeKind::bounded_string(5));
    // Exactly at the bound succeeds.
    roundtrip(&reg, "t", &wrap(Value::from("hello")));
    // Over the bound fails.
    let err = reg
        .encode("t", &wrap(Value::from("toolong")), Endianness::Big)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Context(_, inner) if matches!(*inner, Error::BoundExceeded(7, 5))
    ));
}

#[test]
fn test_bytes_and_bounds() {
    let reg = single_field("t", TypeKind::bounded_bytes(4));
    roundtrip(&reg, "t", &wrap(Value::Bytes(vec![])));
    roundtrip(&reg, "t", &wrap(Value::Bytes(vec![1, 2, 3, 4])));
    let err = reg
        .encode("t", &wrap(Value::Bytes(vec![0; 5])), Endianness::Big)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Context(_, inner) if matches!(*inner, Error::BoundExceeded(5, 4))
    ));
}

#[test]
fn test_fixed_bytes_validates_length() {
    let reg = single_field("t", TypeKind::FixedBytes { len: 4 });
    roundtrip(&reg, "t", &wrap(Value::Bytes(vec![9, 8, 7, 6])));
    let err = reg
        .encode("t", &wrap(Value::Bytes(vec![9])), Endianness::Big)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Context(_, inner) if matches!(*inner, Error::LengthMismatch(1, 4))
    ));
}

#[test]
fn test_array_validates_length() {
    let kind = TypeKind::array(TypeKind::Primitive(PrimitiveKind::UInt16), 3);
    let reg = single_field("t", kind);
    roundtrip(
        &reg,
        "t",
        &wrap(Value::List(vec![
            Value::U16(1),
            Value::U16(2),
            Value::U16(3),
        ])),
    );
    let err = reg
        .encode(
            "t",
            &wrap(Value::List(vec![Value::U16(1)])),
            Endianness::Big,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Context(_, inner) if matches!(*inner, Error::LengthMismatch(1, 3))
    ));
}

#[test]
fn test_sequence_bound_enforced() {
    let kind = TypeKind::bounded_sequence(TypeKind::Primitive(PrimitiveKind::UInt8), 2);
    let reg = single_field("t", kind);
    roundtrip(&reg, "t", &wrap(Value::List(vec![])));
    roundtrip(
        &reg,
        "t",
        &wrap(Value::List(vec![Value::U8(1), Value::U8(2)])),
    );
    let err = reg
        .encode(
            "t",
            &wrap(Value::List(vec![Value::U8(1), Value::U8(2), Value::U8(3)])),
            Endianness::Big,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Context(_, inner) if matches!(*inner, Error::BoundExceeded(3, 2))
    ));
}

#[test]
fn test_roundtrip_optional() {
    let reg = single_field(
        "t",
        TypeKind::optional(TypeKind::Primitive(PrimitiveKind::UInt32)),
    );
    roundtrip(&reg, "t", &wrap(Value::U32(42)));
    roundtrip(&reg, "t", &wrap(Value::Null));

    // Absent optionals cost a single flag byte.
    let wire = reg
        .encode("t", &wrap(Value::Null), Endianness::Big)
        .unwrap();
    assert_eq!(&wire[..], &[0x00]);
}

#[test]
fn test_roundtrip_enum() {
    let reg = single_field("t", TypeKind::Enum);
    roundtrip(&reg, "t", &wrap(Value::Enum(0)));
    roundtrip(&reg, "t", &wrap(Value::Enum(u32::MAX)));
}

#[test]
fn test_roundtrip_mapping() {
    let kind = TypeKind::mapping(TypeKind::string(), TypeKind::Primitive(PrimitiveKind::UInt64));
    let reg = single_field("t", kind);
    roundtrip(
        &reg,
        "t",
        &wrap(Value::Map(vec![
            (Value::from("b"), Value::U64(2)),
            (Value::from("a"), Value::U64(1)),
        ])),
    );
}

#[test]
fn test_roundtrip_union_all_cases() {
    let desc = UnionDescriptor::new(
        "u",
        TypeKind::Primitive(PrimitiveKind::UInt8),
        vec![
            (1, TypeKind::Primitive(PrimitiveKind::Int32)),
            (2, TypeKind::string()),
        ],
    )
    .with_default(TypeKind::Primitive(PrimitiveKind::Bool));
    let reg = single_field("t", TypeKind::Union(Box::new(desc)));

    roundtrip(&reg, "t", &wrap(Value::union_case(1, Value::I32(-9))));
    roundtrip(&reg, "t", &wrap(Value::union_case(2, Value::from("hi"))));
    roundtrip(&reg, "t", &wrap(Value::union_default(Value::Bool(false))));
}

#[test]
fn test_union_unknown_label_falls_to_default() {
    // Discriminator uint8, cases 1 and 2 -> int32, default -> bool. An
    // active (label=3, value=true) state decodes back as the default case.
    let desc = UnionDescriptor::new(
        "u",
        TypeKind::Primitive(PrimitiveKind::UInt8),
        vec![
            (1, TypeKind::Primitive(PrimitiveKind::Int32)),
            (2, TypeKind::Primitive(PrimitiveKind::Int32)),
        ],
    )
    .with_default(TypeKind::Primitive(PrimitiveKind::Bool));
    let reg = single_field("t", TypeKind::Union(Box::new(desc)));

    let value = wrap(Value::union_case(3, Value::Bool(true)));
    let wire = reg.encode("t", &value, Endianness::Big).unwrap();
    assert_eq!(
        reg.decode("t", &wire, Endianness::Big).unwrap(),
        wrap(Value::union_default(Value::Bool(true)))
    );
}

#[test]
fn test_truncated_input() {
    let reg = single_field("t", TypeKind::Primitive(PrimitiveKind::UInt64));
    let value = wrap(Value::U64(7));
    let wire = reg.encode("t", &value, Endianness::Big).unwrap();
    let err = reg
        .decode("t", &wire[..wire.len() - 1], Endianness::Big)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Context(_, inner) if matches!(*inner, Error::EndOfBuffer)
    ));
}

#[test]
fn test_error_context_names_nested_field() {
    let mut reg = TypeRegistry::new();
    reg.register(StructDescriptor::new(
        "inner",
        vec![("y".to_string(), TypeKind::bounded_string(2))],
    ));
    reg.register(StructDescriptor::new(
        "outer",
        vec![("child".to_string(), TypeKind::nested("inner"))],
    ));
    let value = Value::Struct(vec![(
        "child".to_string(),
        Value::Struct(vec![("y".to_string(), Value::from("abc"))]),
    )]);
    let err = reg.encode("outer", &value, Endianness::Big).unwrap_err();
    assert_eq!(
        err.to_string(),
        "in child: in inner: in y: bound exceeded: 3 > 2"
    );
}

#[test]
fn test_randomized_nested_roundtrip() {
    let mut reg = TypeRegistry::new();
    reg.register(StructDescriptor::new(
        "sample",
        vec![
            ("id".to_string(), TypeKind::Primitive(PrimitiveKind::UInt64)),
            ("name".to_string(), TypeKind::bounded_string(32)),
            (
                "readings".to_string(),
                TypeKind::sequence(TypeKind::Primitive(PrimitiveKind::Float64)),
            ),
            (
                "tags".to_string(),
                TypeKind::array(TypeKind::Primitive(PrimitiveKind::UInt8), 4),
            ),
        ],
    ));
    let mut rng = StdRng::seed_from_u64(0xC0DEC);
    for _ in 0..64 {
        let name_len = rng.gen_range(0..32);
        let name: String = (0..name_len)
            .map(|_| rng.gen_range(b'a'..=b'z') as char)
            .collect();
        let readings = (0..rng.gen_range(0..8))
            .map(|_| Value::F64(rng.gen()))
            .collect();
        let tags = (0..4).map(|_| Value::U8(rng.gen())).collect();
        let value = Value::Struct(vec![
            ("id".to_string(), Value::U64(rng.gen())),
            ("name".to_string(), Value::String(name)),
            ("readings".to_string(), Value::List(readings)),
            ("tags".to_string(), Value::List(tags)),
        ]);
        roundtrip(&reg, "sample", &value);
    }
}
