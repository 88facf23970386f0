//! Schema-driven CDR codec with bytecode key extraction.
//!
//! # Overview
//!
//! A binary serialization library for the Common Data Representation (CDR)
//! wire format, designed to:
//! - Encode structured values with alignment-correct, endianness-selectable
//!   CDR encoding
//! - Decode untrusted encoded bytes back into structured values
//! - Extract a stable "instance key" from a value, either through the type's
//!   machine tree or straight from raw encoded bytes via a compiled
//!   bytecode program — with byte-identical results on both paths
//!
//! # Supported Shapes
//!
//! Primitives, ASCII chars, bounded/unbounded strings and byte sequences,
//! fixed byte arrays, fixed arrays, variable sequences, mappings,
//! discriminated unions, enumerations, optionals, and nested (including
//! mutually recursive) record types.
//!
//! # Example
//!
//! ```
//! use cdr_codec::{
//!     Endianness, PrimitiveKind, StructDescriptor, TypeKind, TypeRegistry, Value,
//! };
//!
//! // Describe a record type with a key subset.
//! let mut registry = TypeRegistry::new();
//! registry.register(
//!     StructDescriptor::new(
//!         "sensor",
//!         vec![
//!             ("id".to_string(), TypeKind::Primitive(PrimitiveKind::UInt32)),
//!             ("label".to_string(), TypeKind::bounded_string(16)),
//!         ],
//!     )
//!     .with_keys(vec!["id"]),
//! );
//!
//! // Encode a value.
//! let value = Value::Struct(vec![
//!     ("id".to_string(), Value::U32(7)),
//!     ("label".to_string(), Value::from("hello")),
//! ]);
//! let wire = registry.encode("sensor", &value, Endianness::Little).unwrap();
//!
//! // The key contains only the key fields, and both key paths agree.
//! let via_tree = registry.encode_key("sensor", &value, Endianness::Big).unwrap();
//! let via_vm = registry
//!     .extract_key("sensor", &wire, Endianness::Little, Endianness::Big)
//!     .unwrap();
//! assert_eq!(via_tree, via_vm);
//! assert_eq!(&via_tree[..], &[0x00, 0x00, 0x00, 0x07]);
//! ```

pub mod buffer;
pub mod descriptor;
pub mod error;
pub mod keyvm;
pub mod machine;
pub mod registry;
pub mod sizer;
pub mod value;

// Re-export main types.
pub use buffer::{Buffer, Endianness};
pub use descriptor::{
    union_default_label, PrimitiveKind, StructDescriptor, TypeKind, UnionDescriptor,
};
pub use error::Error;
pub use keyvm::{extract_key, KeyOp};
pub use machine::Machine;
pub use registry::TypeRegistry;
pub use sizer::{MaxSizeFinder, UNBOUNDED_KEY_SIZE};
pub use value::Value;
