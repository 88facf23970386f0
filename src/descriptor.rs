//! Type descriptions consumed by the codec.
//!
//! A [`StructDescriptor`] is an ordered field list where every field carries a
//! [`TypeKind`] selecting its machine, plus an optional key-field subset. How
//! these descriptions are produced from source-level declarations is out of
//! scope; the codec only consumes them.

use crate::error::Error;

/// Fixed-width primitive kinds. Alignment equals wire width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
}

impl PrimitiveKind {
    /// Encoded width in bytes.
    pub fn width(&self) -> usize {
        match self {
            PrimitiveKind::Bool | PrimitiveKind::Int8 | PrimitiveKind::UInt8 => 1,
            PrimitiveKind::Int16 | PrimitiveKind::UInt16 => 2,
            PrimitiveKind::Int32 | PrimitiveKind::UInt32 | PrimitiveKind::Float32 => 4,
            PrimitiveKind::Int64 | PrimitiveKind::UInt64 | PrimitiveKind::Float64 => 8,
        }
    }

    /// CDR alignment requirement, identical to the width.
    pub fn alignment(&self) -> usize {
        self.width()
    }
}

/// Machine-selecting type tag for a field.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Primitive(PrimitiveKind),
    /// Single ASCII code point, one byte, no alignment.
    Char,
    /// Length-prefixed UTF-8 with trailing NUL, optionally bounded.
    String { bound: Option<usize> },
    /// Length-prefixed raw bytes, optionally bounded.
    Bytes { bound: Option<usize> },
    /// Unprefixed fixed-length raw bytes.
    FixedBytes { len: usize },
    /// Fixed element count of a sub-type.
    Array { elem: Box<TypeKind>, len: usize },
    /// 4-byte count prefix plus elements, optionally bounded.
    Sequence {
        elem: Box<TypeKind>,
        bound: Option<usize>,
    },
    /// 2-byte count prefix plus key/value pairs, insertion order preserved.
    Mapping {
        key: Box<TypeKind>,
        value: Box<TypeKind>,
    },
    /// 4-byte unsigned ordinal.
    Enum,
    /// 1-byte presence flag plus payload iff present.
    Optional(Box<TypeKind>),
    /// Discriminated union, described inline.
    Union(Box<UnionDescriptor>),
    /// Reference to another registered type, resolved lazily through the
    /// registry so self- and mutually-referential graphs work.
    Nested(String),
}

impl TypeKind {
    pub fn string() -> Self {
        TypeKind::String { bound: None }
    }

    pub fn bounded_string(bound: usize) -> Self {
        TypeKind::String { bound: Some(bound) }
    }

    pub fn bytes() -> Self {
        TypeKind::Bytes { bound: None }
    }

    pub fn bounded_bytes(bound: usize) -> Self {
        TypeKind::Bytes { bound: Some(bound) }
    }

    pub fn array(elem: TypeKind, len: usize) -> Self {
        TypeKind::Array {
            elem: Box::new(elem),
            len,
        }
    }

    pub fn sequence(elem: TypeKind) -> Self {
        TypeKind::Sequence {
            elem: Box::new(elem),
            bound: None,
        }
    }

    pub fn bounded_sequence(elem: TypeKind, bound: usize) -> Self {
        TypeKind::Sequence {
            elem: Box::new(elem),
            bound: Some(bound),
        }
    }

    pub fn mapping(key: TypeKind, value: TypeKind) -> Self {
        TypeKind::Mapping {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    pub fn optional(inner: TypeKind) -> Self {
        TypeKind::Optional(Box::new(inner))
    }

    pub fn nested(name: impl Into<String>) -> Self {
        TypeKind::Nested(name.into())
    }
}

/// Ordered field list for a record type, with an optional key subset.
///
/// An empty/absent key list means every field is part of the key.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDescriptor {
    pub name: String,
    pub fields: Vec<(String, TypeKind)>,
    pub keys: Option<Vec<String>>,
}

impl StructDescriptor {
    pub fn new(name: impl Into<String>, fields: Vec<(String, TypeKind)>) -> Self {
        Self {
            name: name.into(),
            fields,
            keys: None,
        }
    }

    /// Restricts the key encoding to the named fields.
    pub fn with_keys(mut self, keys: Vec<&str>) -> Self {
        self.keys = Some(keys.into_iter().map(String::from).collect());
        self
    }
}

/// Discriminated union description.
///
/// Labels must be unique across cases. The discriminator must be an integer
/// primitive or an enum.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionDescriptor {
    pub name: String,
    pub discriminator: TypeKind,
    pub cases: Vec<(i128, TypeKind)>,
    pub default: Option<Box<TypeKind>>,
    /// When set, the discriminator alone represents the key and branch
    /// payloads are omitted from key encodings.
    pub discriminator_is_key: bool,
}

impl UnionDescriptor {
    pub fn new(
        name: impl Into<String>,
        discriminator: TypeKind,
        cases: Vec<(i128, TypeKind)>,
    ) -> Self {
        Self {
            name: name.into(),
            discriminator,
            cases,
            default: None,
            discriminator_is_key: false,
        }
    }

    pub fn with_default(mut self, default: TypeKind) -> Self {
        self.default = Some(Box::new(default));
        self
    }

    pub fn key_by_discriminator(mut self) -> Self {
        self.discriminator_is_key = true;
        self
    }
}

/// Finds an unused discriminator value to encode for the default case.
///
/// Stateless: probes -1 downward for signed discriminators, 0 upward for
/// unsigned ones, and from the top of the ordinal space downward for enums,
/// returning the first value not claimed by a labeled case.
pub fn union_default_label(discriminator: &TypeKind, used: &[i128]) -> Result<i128, Error> {
    let (start, step, end): (i128, i128, i128) = match discriminator {
        TypeKind::Primitive(kind) => match kind {
            PrimitiveKind::Int8 => (-1, -1, i8::MIN as i128),
            PrimitiveKind::Int16 => (-1, -1, i16::MIN as i128),
            PrimitiveKind::Int32 => (-1, -1, i32::MIN as i128),
            PrimitiveKind::Int64 => (-1, -1, i64::MIN as i128),
            PrimitiveKind::UInt8 => (0, 1, u8::MAX as i128),
            PrimitiveKind::UInt16 => (0, 1, u16::MAX as i128),
            PrimitiveKind::UInt32 => (0, 1, u32::MAX as i128),
            PrimitiveKind::UInt64 => (0, 1, u64::MAX as i128),
            _ => return Err(Error::InvalidDiscriminator("non-integer primitive")),
        },
        TypeKind::Enum => (u32::MAX as i128, -1, 0),
        _ => return Err(Error::InvalidDiscriminator("expected integer or enum")),
    };

    let mut value = start;
    loop {
        if !used.contains(&value) {
            return Ok(value);
        }
        if value == end {
            return Err(Error::NoDefaultLabel);
        }
        value += step;
    }
}
