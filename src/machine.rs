//! Per-type encode/decode machinery.
//!
//! A [`Machine`] is the capability bundle for one type shape: it can
//! serialize a [`Value`] into a [`Buffer`], deserialize one back, accumulate
//! a worst-case key size into a [`MaxSizeFinder`], and compile itself into a
//! flat [`KeyOp`] stream for the key-VM. The variants form a closed set
//! dispatched by `match`; sub-machines are owned except for
//! [`Machine::Nested`], which holds only a type name and resolves through
//! the [`TypeRegistry`] on every call so self- and mutually-referential type
//! graphs work without infinite construction.

use crate::buffer::Buffer;
use crate::descriptor::{
    union_default_label, PrimitiveKind, StructDescriptor, TypeKind, UnionDescriptor,
};
use crate::error::Error;
use crate::keyvm::KeyOp;
use crate::registry::TypeRegistry;
use crate::sizer::{MaxSizeFinder, UNBOUNDED_KEY_SIZE};
use crate::value::Value;

/// Encoder/decoder for one type shape.
#[derive(Debug, Clone)]
pub enum Machine {
    Primitive(PrimitiveKind),
    Char,
    Str { bound: Option<usize> },
    Bytes { bound: Option<usize> },
    FixedBytes { len: usize },
    Array { elem: Box<Machine>, len: usize },
    Sequence { elem: Box<Machine>, bound: Option<usize> },
    Mapping { key: Box<Machine>, value: Box<Machine> },
    Struct(StructMachine),
    Union(UnionMachine),
    Enum,
    Optional(Box<Machine>),
    Nested { name: String },
}

/// One struct field: machine plus key membership.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub machine: Machine,
    pub key: bool,
}

#[derive(Debug, Clone)]
pub struct StructMachine {
    pub name: String,
    pub fields: Vec<Field>,
    /// True when a non-empty key list restricts the key encoding. Without
    /// one, every field is part of the key.
    pub has_key_subset: bool,
}

#[derive(Debug, Clone)]
pub struct UnionMachine {
    pub name: String,
    pub discriminator: Box<Machine>,
    pub cases: Vec<(i128, Machine)>,
    pub default: Option<Box<Machine>>,
    /// Discriminator value written when the default case is active,
    /// precomputed so it never collides with a labeled case.
    pub default_label: Option<i128>,
    pub discriminator_is_key: bool,
}

impl Machine {
    /// Builds the machine tree for a type tag.
    pub fn build(kind: &TypeKind) -> Result<Self, Error> {
        Ok(match kind {
            TypeKind::Primitive(kind) => Machine::Primitive(*kind),
            TypeKind::Char => Machine::Char,
            TypeKind::String { bound } => Machine::Str { bound: *bound },
            TypeKind::Bytes { bound } => Machine::Bytes { bound: *bound },
            TypeKind::FixedBytes { len } => Machine::FixedBytes { len: *len },
            TypeKind::Array { elem, len } => Machine::Array {
                elem: Box::new(Machine::build(elem)?),
                len: *len,
            },
            TypeKind::Sequence { elem, bound } => Machine::Sequence {
                elem: Box::new(Machine::build(elem)?),
                bound: *bound,
            },
            TypeKind::Mapping { key, value } => Machine::Mapping {
                key: Box::new(Machine::build(key)?),
                value: Box::new(Machine::build(value)?),
            },
            TypeKind::Enum => Machine::Enum,
            TypeKind::Optional(inner) => Machine::Optional(Box::new(Machine::build(inner)?)),
            TypeKind::Union(desc) => Machine::Union(UnionMachine::build(desc)?),
            TypeKind::Nested(name) => Machine::Nested { name: name.clone() },
        })
    }

    /// Builds the machine tree for a registered record type.
    pub fn build_struct(desc: &StructDescriptor) -> Result<Self, Error> {
        if let Some(keys) = &desc.keys {
            for key in keys {
                if !desc.fields.iter().any(|(name, _)| name == key) {
                    return Err(Error::UnknownKeyField(key.clone()));
                }
            }
        }
        let has_key_subset = desc.keys.as_ref().is_some_and(|keys| !keys.is_empty());
        let mut fields = Vec::with_capacity(desc.fields.len());
        for (name, kind) in &desc.fields {
            let key = match &desc.keys {
                Some(keys) if !keys.is_empty() => keys.contains(name),
                _ => true,
            };
            fields.push(Field {
                name: name.clone(),
                machine: Machine::build(kind).map_err(|e| e.context(name))?,
                key,
            });
        }
        Ok(Machine::Struct(StructMachine {
            name: desc.name.clone(),
            fields,
            has_key_subset,
        }))
    }

    /// CDR alignment required before this machine's first byte.
    pub fn alignment(&self) -> usize {
        match self {
            Machine::Primitive(kind) => kind.alignment(),
            Machine::Char => 1,
            Machine::Str { .. } => 4,
            Machine::Bytes { .. } => 4,
            Machine::FixedBytes { .. } => 1,
            Machine::Array { elem, .. } => elem.alignment(),
            Machine::Sequence { .. } => 4,
            Machine::Mapping { .. } => 2,
            Machine::Struct(sm) => sm
                .fields
                .iter()
                .map(|f| f.machine.alignment())
                .max()
                .unwrap_or(1),
            Machine::Union(um) => um
                .cases
                .iter()
                .map(|(_, m)| m.alignment())
                .chain(um.default.iter().map(|m| m.alignment()))
                .chain(std::iter::once(um.discriminator.alignment()))
                .max()
                .unwrap_or(1),
            Machine::Enum => 4,
            Machine::Optional(_) => 1,
            Machine::Nested { .. } => 1,
        }
    }

    /// Encodes `value` into `buf`. With `for_key` set, struct fields outside
    /// the key subset are omitted entirely and a union whose discriminator
    /// represents the key writes only the discriminator.
    pub fn serialize(
        &self,
        buf: &mut Buffer,
        value: &Value,
        for_key: bool,
        reg: &TypeRegistry,
    ) -> Result<(), Error> {
        match self {
            Machine::Primitive(kind) => {
                buf.align(kind.alignment());
                match kind {
                    PrimitiveKind::Bool => buf.write_bool(value.as_bool()?),
                    PrimitiveKind::Int8 => buf.write_i8(value.as_i8()?),
                    PrimitiveKind::UInt8 => buf.write_u8(value.as_u8()?),
                    PrimitiveKind::Int16 => buf.write_i16(value.as_i16()?),
                    PrimitiveKind::UInt16 => buf.write_u16(value.as_u16()?),
                    PrimitiveKind::Int32 => buf.write_i32(value.as_i32()?),
                    PrimitiveKind::UInt32 => buf.write_u32(value.as_u32()?),
                    PrimitiveKind::Int64 => buf.write_i64(value.as_i64()?),
                    PrimitiveKind::UInt64 => buf.write_u64(value.as_u64()?),
                    PrimitiveKind::Float32 => buf.write_f32(value.as_f32()?),
                    PrimitiveKind::Float64 => buf.write_f64(value.as_f64()?),
                }
                Ok(())
            }
            Machine::Char => {
                let c = value.as_char()?;
                let code = u32::from(c);
                if code > 0x7F {
                    return Err(Error::InvalidChar(c));
                }
                buf.write_u8(code as u8);
                Ok(())
            }
            Machine::Str { bound } => {
                let s = value.as_str()?;
                if let Some(bound) = bound {
                    let chars = s.chars().count();
                    if chars > *bound {
                        return Err(Error::BoundExceeded(chars, *bound));
                    }
                }
                let count = u32::try_from(s.len() + 1)
                    .map_err(|_| Error::BoundExceeded(s.len(), u32::MAX as usize))?;
                buf.align(4);
                buf.write_u32(count);
                buf.write_bytes(s.as_bytes());
                buf.write_u8(0);
                Ok(())
            }
            Machine::Bytes { bound } => {
                let bytes = value.as_bytes()?;
                if let Some(bound) = bound {
                    if bytes.len() > *bound {
                        return Err(Error::BoundExceeded(bytes.len(), *bound));
                    }
                }
                let count = u32::try_from(bytes.len())
                    .map_err(|_| Error::BoundExceeded(bytes.len(), u32::MAX as usize))?;
                buf.align(4);
                buf.write_u32(count);
                buf.write_bytes(bytes);
                Ok(())
            }
            Machine::FixedBytes { len } => {
                let bytes = value.as_bytes()?;
                if bytes.len() != *len {
                    return Err(Error::LengthMismatch(bytes.len(), *len));
                }
                buf.write_bytes(bytes);
                Ok(())
            }
            Machine::Array { elem, len } => {
                let items = value.as_list()?;
                if items.len() != *len {
                    return Err(Error::LengthMismatch(items.len(), *len));
                }
                for item in items {
                    elem.serialize(buf, item, for_key, reg)?;
                }
                Ok(())
            }
            Machine::Sequence { elem, bound } => {
                let items = value.as_list()?;
                if let Some(bound) = bound {
                    if items.len() > *bound {
                        return Err(Error::BoundExceeded(items.len(), *bound));
                    }
                }
                let count = u32::try_from(items.len())
                    .map_err(|_| Error::BoundExceeded(items.len(), u32::MAX as usize))?;
                buf.align(4);
                buf.write_u32(count);
                for item in items {
                    elem.serialize(buf, item, for_key, reg)?;
                }
                Ok(())
            }
            Machine::Mapping { key, value: val } => {
                let entries = value.as_map()?;
                let count = u16::try_from(entries.len())
                    .map_err(|_| Error::BoundExceeded(entries.len(), u16::MAX as usize))?;
                buf.align(2);
                buf.write_u16(count);
                for (k, v) in entries {
                    key.serialize(buf, k, for_key, reg)?;
                    val.serialize(buf, v, for_key, reg)?;
                }
                Ok(())
            }
            Machine::Struct(sm) => {
                for field in &sm.fields {
                    if for_key && sm.has_key_subset && !field.key {
                        continue;
                    }
                    let v = value.field(&field.name)?;
                    field
                        .machine
                        .serialize(buf, v, for_key, reg)
                        .map_err(|e| e.context(&field.name))?;
                }
                Ok(())
            }
            Machine::Union(um) => um
                .serialize(buf, value, for_key, reg)
                .map_err(|e| e.context(&um.name)),
            Machine::Enum => {
                buf.align(4);
                buf.write_u32(value.as_enum()?);
                Ok(())
            }
            Machine::Optional(sub) => {
                if matches!(value, Value::Null) {
                    buf.write_bool(false);
                } else {
                    buf.write_bool(true);
                    sub.serialize(buf, value, for_key, reg)?;
                }
                Ok(())
            }
            Machine::Nested { name } => {
                let machine = reg.machine(name)?;
                machine
                    .serialize(buf, value, for_key, reg)
                    .map_err(|e| e.context(name))
            }
        }
    }

    /// Decodes one value at the buffer cursor.
    pub fn deserialize(&self, buf: &mut Buffer, reg: &TypeRegistry) -> Result<Value, Error> {
        match self {
            Machine::Primitive(kind) => {
                buf.align(kind.alignment());
                Ok(match kind {
                    PrimitiveKind::Bool => Value::Bool(buf.read_bool()?),
                    PrimitiveKind::Int8 => Value::I8(buf.read_i8()?),
                    PrimitiveKind::UInt8 => Value::U8(buf.read_u8()?),
                    PrimitiveKind::Int16 => Value::I16(buf.read_i16()?),
                    PrimitiveKind::UInt16 => Value::U16(buf.read_u16()?),
                    PrimitiveKind::Int32 => Value::I32(buf.read_i32()?),
                    PrimitiveKind::UInt32 => Value::U32(buf.read_u32()?),
                    PrimitiveKind::Int64 => Value::I64(buf.read_i64()?),
                    PrimitiveKind::UInt64 => Value::U64(buf.read_u64()?),
                    PrimitiveKind::Float32 => Value::F32(buf.read_f32()?),
                    PrimitiveKind::Float64 => Value::F64(buf.read_f64()?),
                })
            }
            Machine::Char => {
                let byte = buf.read_u8()?;
                if byte > 0x7F {
                    return Err(Error::InvalidChar(char::from(byte)));
                }
                Ok(Value::Char(char::from(byte)))
            }
            Machine::Str { .. } => {
                buf.align(4);
                let count = buf.read_u32()? as usize;
                // The count includes the trailing NUL.
                let len = count.checked_sub(1).ok_or(Error::EndOfBuffer)?;
                let payload = buf.read_bytes(len)?.to_vec();
                buf.read_u8()?;
                String::from_utf8(payload)
                    .map(Value::String)
                    .map_err(|_| Error::InvalidUtf8)
            }
            Machine::Bytes { .. } => {
                buf.align(4);
                let count = buf.read_u32()? as usize;
                Ok(Value::Bytes(buf.read_bytes(count)?.to_vec()))
            }
            Machine::FixedBytes { len } => Ok(Value::Bytes(buf.read_bytes(*len)?.to_vec())),
            Machine::Array { elem, len } => {
                let mut items = Vec::with_capacity(*len);
                for _ in 0..*len {
                    items.push(elem.deserialize(buf, reg)?);
                }
                Ok(Value::List(items))
            }
            Machine::Sequence { elem, .. } => {
                buf.align(4);
                let count = buf.read_u32()? as usize;
                // The count is trusted as received; cap the preallocation so
                // a hostile prefix cannot reserve unbounded memory.
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(elem.deserialize(buf, reg)?);
                }
                Ok(Value::List(items))
            }
            Machine::Mapping { key, value } => {
                buf.align(2);
                let count = buf.read_u16()? as usize;
                let mut entries: Vec<(Value, Value)> = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let k = key.deserialize(buf, reg)?;
                    let v = value.deserialize(buf, reg)?;
                    if entries.iter().any(|(existing, _)| *existing == k) {
                        return Err(Error::DuplicateKey);
                    }
                    entries.push((k, v));
                }
                Ok(Value::Map(entries))
            }
            Machine::Struct(sm) => {
                let mut fields = Vec::with_capacity(sm.fields.len());
                for field in &sm.fields {
                    let v = field
                        .machine
                        .deserialize(buf, reg)
                        .map_err(|e| e.context(&field.name))?;
                    fields.push((field.name.clone(), v));
                }
                Ok(Value::Struct(fields))
            }
            Machine::Union(um) => um
                .deserialize(buf, reg)
                .map_err(|e| e.context(&um.name)),
            Machine::Enum => {
                buf.align(4);
                Ok(Value::Enum(buf.read_u32()?))
            }
            Machine::Optional(sub) => {
                if buf.read_bool()? {
                    sub.deserialize(buf, reg)
                } else {
                    Ok(Value::Null)
                }
            }
            Machine::Nested { name } => {
                let machine = reg.machine(name)?;
                machine.deserialize(buf, reg).map_err(|e| e.context(name))
            }
        }
    }

    /// Accumulates this type's worst-case key encoding size. `stack` holds
    /// the nested type names currently being measured; revisiting one means
    /// the type can contain itself, which charges the unbounded sentinel.
    pub fn max_key_size(
        &self,
        finder: &mut MaxSizeFinder,
        reg: &TypeRegistry,
        stack: &mut Vec<String>,
    ) -> Result<(), Error> {
        match self {
            Machine::Primitive(kind) => {
                finder.increase(kind.width() as u64, kind.alignment());
                Ok(())
            }
            Machine::Char => {
                finder.increase(1, 1);
                Ok(())
            }
            Machine::Str { bound } => {
                // Count prefix (4) plus trailing NUL (1).
                match bound {
                    Some(bound) => finder.increase(*bound as u64 + 5, 4),
                    None => finder.increase(u64::from(u32::MAX) + 5, 4),
                }
                Ok(())
            }
            Machine::Bytes { bound } => {
                match bound {
                    Some(bound) => finder.increase(*bound as u64 + 4, 4),
                    None => finder.increase(65535 + 4, 4),
                }
                Ok(())
            }
            Machine::FixedBytes { len } => {
                finder.increase(*len as u64, 1);
                Ok(())
            }
            Machine::Array { elem, len } => {
                if *len == 0 {
                    return Ok(());
                }
                finder.align(self.alignment());
                let pre = finder.size;
                elem.max_key_size(finder, reg, stack)?;
                let stride = align_up(finder.size - pre, elem.alignment());
                finder.size = pre.saturating_add(stride.saturating_mul(*len as u64));
                Ok(())
            }
            Machine::Sequence { elem, bound } => {
                if *bound == Some(0) {
                    return Ok(());
                }
                finder.align(4);
                let pre = finder.size;
                elem.max_key_size(finder, reg, stack)?;
                let stride = align_up(finder.size - pre, elem.alignment());
                let count = bound.unwrap_or(65535) as u64;
                finder.size = pre
                    .saturating_add(stride.saturating_mul(count))
                    .saturating_add(2);
                Ok(())
            }
            Machine::Mapping { key, value } => {
                finder.increase(2, 2);
                let pre = finder.size;
                key.max_key_size(finder, reg, stack)?;
                value.max_key_size(finder, reg, stack)?;
                let per_entry = finder.size - pre;
                finder.size = pre.saturating_add(per_entry.saturating_mul(65535));
                Ok(())
            }
            Machine::Struct(sm) => {
                for field in &sm.fields {
                    if sm.has_key_subset && !field.key {
                        continue;
                    }
                    field.machine.max_key_size(finder, reg, stack)?;
                }
                Ok(())
            }
            Machine::Union(um) => {
                um.discriminator.max_key_size(finder, reg, stack)?;
                if !um.discriminator_is_key {
                    // Only one branch is ever active: charge the maximum,
                    // never the sum.
                    let mut worst = 0u64;
                    for (_, machine) in &um.cases {
                        let mut sub = MaxSizeFinder::new();
                        machine.max_key_size(&mut sub, reg, stack)?;
                        worst = worst.max(sub.size());
                    }
                    if let Some(default) = &um.default {
                        let mut sub = MaxSizeFinder::new();
                        default.max_key_size(&mut sub, reg, stack)?;
                        worst = worst.max(sub.size());
                    }
                    finder.increase(worst, self.alignment());
                }
                Ok(())
            }
            Machine::Enum => {
                finder.increase(4, 4);
                Ok(())
            }
            Machine::Optional(sub) => {
                finder.increase(1, 1);
                sub.max_key_size(finder, reg, stack)
            }
            Machine::Nested { name } => {
                if stack.iter().any(|n| n == name) {
                    finder.increase(UNBOUNDED_KEY_SIZE, 1);
                    return Ok(());
                }
                let machine = reg.machine(name)?;
                stack.push(name.clone());
                let result = machine.max_key_size(finder, reg, stack);
                stack.pop();
                result
            }
        }
    }

    /// Compiles this machine into key-VM instructions.
    ///
    /// With `skip` set the emitted instructions traverse this type's bytes
    /// without copying them to the key output; the flag is forced on for
    /// non-key struct fields and for union payloads when the discriminator
    /// alone is the key, and propagates through the whole subtree.
    pub fn key_ops(
        &self,
        skip: bool,
        reg: &TypeRegistry,
        stack: &mut Vec<String>,
    ) -> Result<Vec<KeyOp>, Error> {
        match self {
            Machine::Primitive(kind) => {
                let width = kind.width();
                let mut ops = vec![KeyOp::StreamStatic {
                    skip,
                    len: width,
                    align: width,
                }];
                if !skip && width > 1 {
                    ops.push(KeyOp::ByteSwap { width });
                }
                Ok(ops)
            }
            Machine::Char => Ok(vec![KeyOp::StreamStatic {
                skip,
                len: 1,
                align: 1,
            }]),
            Machine::Str { .. } | Machine::Bytes { .. } => Ok(vec![KeyOp::Stream4ByteSize {
                skip,
                width: 1,
                align: 1,
            }]),
            Machine::FixedBytes { len } => Ok(vec![KeyOp::StreamStatic {
                skip,
                len: *len,
                align: 1,
            }]),
            Machine::Array { elem, len } => {
                // Primitive elements pack tightly: flatten the whole array
                // into one stream instead of a one-iteration-per-element loop.
                if let Machine::Primitive(kind) = elem.as_ref() {
                    let width = kind.width();
                    let mut ops = vec![KeyOp::StreamStatic {
                        skip,
                        len: width * len,
                        align: width,
                    }];
                    if !skip && width > 1 {
                        ops.push(KeyOp::ByteSwap { width });
                    }
                    return Ok(ops);
                }
                let sub = elem.key_ops(skip, reg, stack)?;
                let mut ops = Vec::with_capacity(sub.len() + 2);
                ops.push(KeyOp::RepeatStatic {
                    skip,
                    count: *len,
                    block: sub.len() + 2,
                });
                let back = sub.len();
                ops.extend(sub);
                ops.push(KeyOp::EndRepeat { back });
                Ok(ops)
            }
            Machine::Sequence { elem, .. } => {
                if let Machine::Primitive(kind) = elem.as_ref() {
                    let width = kind.width();
                    let mut ops = vec![KeyOp::Stream4ByteSize {
                        skip,
                        width,
                        align: width,
                    }];
                    if !skip && width > 1 {
                        ops.push(KeyOp::ByteSwap { width });
                    }
                    return Ok(ops);
                }
                let sub = elem.key_ops(skip, reg, stack)?;
                let mut ops = Vec::with_capacity(sub.len() + 2);
                ops.push(KeyOp::Repeat4ByteSize {
                    skip,
                    block: sub.len() + 2,
                });
                let back = sub.len();
                ops.extend(sub);
                ops.push(KeyOp::EndRepeat { back });
                Ok(ops)
            }
            Machine::Mapping { .. } => Err(Error::UnsupportedKeyType("mapping")),
            Machine::Struct(sm) => {
                let mut ops = Vec::new();
                for field in &sm.fields {
                    let field_skip = skip || (sm.has_key_subset && !field.key);
                    ops.extend(field.machine.key_ops(field_skip, reg, stack)?);
                }
                Ok(ops)
            }
            Machine::Union(um) => um.key_ops(skip, reg, stack),
            Machine::Enum => {
                let mut ops = vec![KeyOp::StreamStatic {
                    skip,
                    len: 4,
                    align: 4,
                }];
                if !skip {
                    ops.push(KeyOp::ByteSwap { width: 4 });
                }
                Ok(ops)
            }
            Machine::Optional(sub) => {
                // The payload instructions always execute after the flag
                // byte: an absent optional's wire form (flag only, no
                // payload) cannot be replayed by the VM, so keys containing
                // optionals are only extractable when the value is present.
                let mut ops = vec![KeyOp::StreamStatic {
                    skip,
                    len: 1,
                    align: 1,
                }];
                ops.extend(sub.key_ops(skip, reg, stack)?);
                Ok(ops)
            }
            Machine::Nested { name } => {
                if stack.iter().any(|n| n == name) {
                    return Err(Error::RecursiveType(name.clone()));
                }
                let machine = reg.machine(name)?;
                stack.push(name.clone());
                let result = machine.key_ops(skip, reg, stack);
                stack.pop();
                result
            }
        }
    }
}

impl UnionMachine {
    fn build(desc: &UnionDescriptor) -> Result<Self, Error> {
        if desc.cases.is_empty() {
            return Err(Error::EmptyUnion(desc.name.clone()));
        }
        let discriminator = Machine::build(&desc.discriminator)?;
        match discriminator {
            Machine::Primitive(kind) if !matches!(kind, PrimitiveKind::Float32 | PrimitiveKind::Float64 | PrimitiveKind::Bool) => {}
            Machine::Enum => {}
            _ => return Err(Error::InvalidDiscriminator("expected integer or enum")),
        }
        let mut cases = Vec::with_capacity(desc.cases.len());
        let mut labels = Vec::with_capacity(desc.cases.len());
        for (label, kind) in &desc.cases {
            if labels.contains(label) {
                return Err(Error::DuplicateLabel(*label));
            }
            labels.push(*label);
            cases.push((*label, Machine::build(kind)?));
        }
        let default = match &desc.default {
            Some(kind) => Some(Box::new(Machine::build(kind)?)),
            None => None,
        };
        let default_label = if default.is_some() {
            Some(union_default_label(&desc.discriminator, &labels)?)
        } else {
            None
        };
        Ok(UnionMachine {
            name: desc.name.clone(),
            discriminator: Box::new(discriminator),
            cases,
            default,
            default_label,
            discriminator_is_key: desc.discriminator_is_key,
        })
    }

    fn serialize(
        &self,
        buf: &mut Buffer,
        value: &Value,
        for_key: bool,
        reg: &TypeRegistry,
    ) -> Result<(), Error> {
        let (label, inner) = value.union_get()?;

        if for_key && self.discriminator_is_key {
            // The discriminator alone is the key: write it and omit the
            // branch payload entirely.
            let wire_label = match label {
                Some(label) => label,
                None => self.default_label.ok_or(Error::InactiveCase)?,
            };
            return self.write_discriminator(buf, wire_label);
        }

        // Resolve which discriminator value goes on the wire and which
        // machine encodes the payload. A label that matches no case falls to
        // the default machine, mirroring the decode side.
        let (wire_label, machine) = match label {
            Some(label) => match self.cases.iter().find(|(l, _)| *l == label) {
                Some((_, machine)) => (label, machine),
                None => match &self.default {
                    Some(default) => (label, default.as_ref()),
                    None => return Err(Error::UnknownDiscriminator(label)),
                },
            },
            None => match (&self.default, self.default_label) {
                (Some(default), Some(label)) => (label, default.as_ref()),
                _ => return Err(Error::InactiveCase),
            },
        };

        self.write_discriminator(buf, wire_label)?;
        machine.serialize(buf, inner, for_key, reg)
    }

    fn deserialize(&self, buf: &mut Buffer, reg: &TypeRegistry) -> Result<Value, Error> {
        let raw = self.read_discriminator(buf)?;
        match self.cases.iter().find(|(l, _)| *l == raw) {
            Some((label, machine)) => {
                let value = machine.deserialize(buf, reg)?;
                Ok(Value::union_case(*label, value))
            }
            None => match &self.default {
                // An unmatched label is recorded as the default case, not
                // surfaced as the raw value.
                Some(default) => {
                    let value = default.deserialize(buf, reg)?;
                    Ok(Value::union_default(value))
                }
                None => Err(Error::UnknownDiscriminator(raw)),
            },
        }
    }

    fn write_discriminator(&self, buf: &mut Buffer, label: i128) -> Result<(), Error> {
        let out_of_range = Error::UnknownDiscriminator(label);
        match self.discriminator.as_ref() {
            Machine::Primitive(kind) => {
                buf.align(kind.alignment());
                match kind {
                    PrimitiveKind::Int8 => {
                        buf.write_i8(i8::try_from(label).map_err(|_| out_of_range)?)
                    }
                    PrimitiveKind::UInt8 => {
                        buf.write_u8(u8::try_from(label).map_err(|_| out_of_range)?)
                    }
                    PrimitiveKind::Int16 => {
                        buf.write_i16(i16::try_from(label).map_err(|_| out_of_range)?)
                    }
                    PrimitiveKind::UInt16 => {
                        buf.write_u16(u16::try_from(label).map_err(|_| out_of_range)?)
                    }
                    PrimitiveKind::Int32 => {
                        buf.write_i32(i32::try_from(label).map_err(|_| out_of_range)?)
                    }
                    PrimitiveKind::UInt32 => {
                        buf.write_u32(u32::try_from(label).map_err(|_| out_of_range)?)
                    }
                    PrimitiveKind::Int64 => {
                        buf.write_i64(i64::try_from(label).map_err(|_| out_of_range)?)
                    }
                    PrimitiveKind::UInt64 => {
                        buf.write_u64(u64::try_from(label).map_err(|_| out_of_range)?)
                    }
                    _ => return Err(Error::InvalidDiscriminator("non-integer primitive")),
                }
            }
            Machine::Enum => {
                buf.align(4);
                buf.write_u32(u32::try_from(label).map_err(|_| out_of_range)?);
            }
            _ => return Err(Error::InvalidDiscriminator("expected integer or enum")),
        }
        Ok(())
    }

    fn read_discriminator(&self, buf: &mut Buffer) -> Result<i128, Error> {
        match self.discriminator.as_ref() {
            Machine::Primitive(kind) => {
                buf.align(kind.alignment());
                Ok(match kind {
                    PrimitiveKind::Int8 => i128::from(buf.read_i8()?),
                    PrimitiveKind::UInt8 => i128::from(buf.read_u8()?),
                    PrimitiveKind::Int16 => i128::from(buf.read_i16()?),
                    PrimitiveKind::UInt16 => i128::from(buf.read_u16()?),
                    PrimitiveKind::Int32 => i128::from(buf.read_i32()?),
                    PrimitiveKind::UInt32 => i128::from(buf.read_u32()?),
                    PrimitiveKind::Int64 => i128::from(buf.read_i64()?),
                    PrimitiveKind::UInt64 => i128::from(buf.read_u64()?),
                    _ => return Err(Error::InvalidDiscriminator("non-integer primitive")),
                })
            }
            Machine::Enum => {
                buf.align(4);
                Ok(i128::from(buf.read_u32()?))
            }
            _ => Err(Error::InvalidDiscriminator("expected integer or enum")),
        }
    }

    /// The discriminator's raw wire bytes for `label`, as an unsigned
    /// integer of the discriminator's width. This is what a union-tag
    /// instruction compares against at runtime.
    fn discriminator_bits(&self, label: i128) -> u64 {
        let width = self.discriminator.alignment();
        let bits = label as u64;
        if width == 8 {
            bits
        } else {
            bits & ((1u64 << (8 * width)) - 1)
        }
    }

    /// Compiles the union into straight-line branch blocks plus forward
    /// jumps: `[tag, branch ops..., jump]` per labeled case, then an
    /// optional headerless default block. The instruction stream has no
    /// random-access indexing, so dispatch is first-match-wins over the
    /// headers in declared order.
    fn key_ops(
        &self,
        skip: bool,
        reg: &TypeRegistry,
        stack: &mut Vec<String>,
    ) -> Result<Vec<KeyOp>, Error> {
        let width = self.discriminator.alignment();
        let value_skip = skip || self.discriminator_is_key;

        let mut blocks = Vec::with_capacity(self.cases.len() + 1);
        for (_, machine) in &self.cases {
            blocks.push(machine.key_ops(value_skip, reg, stack)?);
        }

        // Instruction count per block: header + ops + jump for labeled
        // branches; the default block carries neither.
        let mut lens: Vec<usize> = blocks.iter().map(|ops| ops.len() + 2).collect();
        if let Some(default) = &self.default {
            let mut default_ops = self.discriminator.key_ops(skip, reg, stack)?;
            default_ops.extend(default.key_ops(value_skip, reg, stack)?);
            lens.push(default_ops.len());
            blocks.push(default_ops);
        } else {
            // No default: the final branch drops its jump, falling through
            // past the union when nothing matched.
            *lens.last_mut().expect("cases are non-empty") -= 1;
        }

        // jumps[i] = instructions from block i to the end of the union.
        let mut jumps = vec![0usize; lens.len() + 1];
        for i in (0..lens.len()).rev() {
            jumps[i] = jumps[i + 1] + lens[i];
        }

        let total = blocks.len();
        let mut ops = Vec::with_capacity(jumps[0]);
        for (i, mut block) in blocks.into_iter().enumerate() {
            if i < self.cases.len() {
                ops.push(KeyOp::UnionTag {
                    skip,
                    width,
                    value: self.discriminator_bits(self.cases[i].0),
                    block: lens[i],
                });
                ops.append(&mut block);
                if i != total - 1 {
                    ops.push(KeyOp::Jump {
                        ahead: jumps[i + 1] + 1,
                    });
                }
            } else {
                ops.append(&mut block);
            }
        }
        Ok(ops)
    }
}

fn align_up(size: u64, alignment: usize) -> u64 {
    let alignment = alignment as u64;
    let rem = size % alignment;
    if rem == 0 {
        size
    } else {
        size + (alignment - rem)
    }
}
