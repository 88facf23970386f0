//! Dynamic values carried through the codec.
//!
//! The codec is schema-driven: a [`crate::machine::Machine`] walks a value at
//! runtime rather than a derived trait impl. [`Value`] is the closed set of
//! shapes machines know how to encode and decode.

use crate::error::Error;

/// A dynamically typed value matching one machine shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Char(char),
    String(String),
    Bytes(Vec<u8>),
    /// Elements of an array or sequence.
    List(Vec<Value>),
    /// Key/value pairs in insertion order. Keys are unique.
    Map(Vec<(Value, Value)>),
    /// Fields in declaration order.
    Struct(Vec<(String, Value)>),
    /// Exactly one active case: a labeled one, or the default when `label`
    /// is `None`.
    Union {
        label: Option<i128>,
        value: Box<Value>,
    },
    /// Enumeration ordinal.
    Enum(u32),
    /// An absent optional.
    Null,
}

macro_rules! impl_accessor {
    ($fn:ident, $variant:ident, $ty:ty, $name:literal) => {
        pub fn $fn(&self) -> Result<$ty, Error> {
            match self {
                Value::$variant(v) => Ok(*v),
                _ => Err(Error::TypeMismatch($name)),
            }
        }
    };
}

impl Value {
    impl_accessor!(as_bool, Bool, bool, "bool");
    impl_accessor!(as_i8, I8, i8, "i8");
    impl_accessor!(as_u8, U8, u8, "u8");
    impl_accessor!(as_i16, I16, i16, "i16");
    impl_accessor!(as_u16, U16, u16, "u16");
    impl_accessor!(as_i32, I32, i32, "i32");
    impl_accessor!(as_u32, U32, u32, "u32");
    impl_accessor!(as_i64, I64, i64, "i64");
    impl_accessor!(as_u64, U64, u64, "u64");
    impl_accessor!(as_f32, F32, f32, "f32");
    impl_accessor!(as_f64, F64, f64, "f64");
    impl_accessor!(as_char, Char, char, "char");
    impl_accessor!(as_enum, Enum, u32, "enum");

    pub fn as_str(&self) -> Result<&str, Error> {
        match self {
            Value::String(s) => Ok(s),
            _ => Err(Error::TypeMismatch("string")),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8], Error> {
        match self {
            Value::Bytes(b) => Ok(b),
            _ => Err(Error::TypeMismatch("bytes")),
        }
    }

    pub fn as_list(&self) -> Result<&[Value], Error> {
        match self {
            Value::List(items) => Ok(items),
            _ => Err(Error::TypeMismatch("list")),
        }
    }

    pub fn as_map(&self) -> Result<&[(Value, Value)], Error> {
        match self {
            Value::Map(entries) => Ok(entries),
            _ => Err(Error::TypeMismatch("map")),
        }
    }

    pub fn as_fields(&self) -> Result<&[(String, Value)], Error> {
        match self {
            Value::Struct(fields) => Ok(fields),
            _ => Err(Error::TypeMismatch("struct")),
        }
    }

    /// Looks up a struct field by name.
    pub fn field(&self, name: &str) -> Result<&Value, Error> {
        self.as_fields()?
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| Error::MissingField(name.to_string()))
    }

    /// Constructs a union with the labeled case active.
    pub fn union_case(label: i128, value: Value) -> Self {
        Value::Union {
            label: Some(label),
            value: Box::new(value),
        }
    }

    /// Constructs a union with the default case active.
    pub fn union_default(value: Value) -> Self {
        Value::Union {
            label: None,
            value: Box::new(value),
        }
    }

    /// Returns the active (label, value) pair.
    pub fn union_get(&self) -> Result<(Option<i128>, &Value), Error> {
        match self {
            Value::Union { label, value } => Ok((*label, value)),
            _ => Err(Error::TypeMismatch("union")),
        }
    }

    /// Accessor for one labeled case. Fails if that case is not active.
    pub fn union_case_value(&self, label: i128) -> Result<&Value, Error> {
        match self.union_get()? {
            (Some(active), value) if active == label => Ok(value),
            _ => Err(Error::InactiveCase),
        }
    }

    /// Accessor for the default case. Fails if a labeled case is active.
    pub fn union_default_value(&self) -> Result<&Value, Error> {
        match self.union_get()? {
            (None, value) => Ok(value),
            _ => Err(Error::InactiveCase),
        }
    }

    /// Replaces the active case, leaving exactly one case represented.
    pub fn union_set(&mut self, label: Option<i128>, value: Value) -> Result<(), Error> {
        match self {
            Value::Union {
                label: slot,
                value: inner,
            } => {
                *slot = label;
                *inner = Box::new(value);
                Ok(())
            }
            _ => Err(Error::TypeMismatch("union")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
