//! Type registry: descriptor storage plus memoized machines, key programs,
//! and key-size bounds.
//!
//! A type description is compiled once into a [`Machine`] tree on first use
//! and then reused immutably; the same goes for its compiled key program and
//! its worst-case key size. Registration requires `&mut self`, so
//! construction of the registry itself is serialized while the caches behind
//! `RwLock`s support concurrent read-side use.

use crate::buffer::{Buffer, Endianness};
use crate::descriptor::StructDescriptor;
use crate::error::Error;
use crate::keyvm::{self, KeyOp};
use crate::machine::Machine;
use crate::sizer::MaxSizeFinder;
use crate::value::Value;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registry of record types and their compiled artifacts.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    descriptors: HashMap<String, StructDescriptor>,
    machines: RwLock<HashMap<String, Arc<Machine>>>,
    programs: RwLock<HashMap<String, Arc<Vec<KeyOp>>>>,
    key_sizes: RwLock<HashMap<String, u64>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a record type. Re-registering a name replaces the previous
    /// descriptor and drops every cached artifact, since other types may
    /// embed the replaced one.
    pub fn register(&mut self, desc: StructDescriptor) {
        self.descriptors.insert(desc.name.clone(), desc);
        self.machines.write().expect("poisoned lock").clear();
        self.programs.write().expect("poisoned lock").clear();
        self.key_sizes.write().expect("poisoned lock").clear();
    }

    /// Returns the machine tree for a registered type, building and caching
    /// it on first use.
    pub fn machine(&self, name: &str) -> Result<Arc<Machine>, Error> {
        if let Some(machine) = self.machines.read().expect("poisoned lock").get(name) {
            return Ok(machine.clone());
        }
        let desc = self
            .descriptors
            .get(name)
            .ok_or_else(|| Error::UnknownType(name.to_string()))?;
        let machine = Arc::new(Machine::build_struct(desc)?);
        let mut cache = self.machines.write().expect("poisoned lock");
        Ok(cache
            .entry(name.to_string())
            .or_insert(machine)
            .clone())
    }

    /// Encodes a value of the named type.
    pub fn encode(
        &self,
        name: &str,
        value: &Value,
        endian: Endianness,
    ) -> Result<Bytes, Error> {
        let machine = self.machine(name)?;
        let mut buf = Buffer::new(endian);
        machine.serialize(&mut buf, value, false, self)?;
        Ok(buf.freeze())
    }

    /// Decodes a value of the named type from encoded bytes.
    pub fn decode(&self, name: &str, wire: &[u8], endian: Endianness) -> Result<Value, Error> {
        let machine = self.machine(name)?;
        let mut buf = Buffer::from_slice(wire, endian);
        machine.deserialize(&mut buf, self)
    }

    /// Encodes only the key fields of a value (the machine-tree key path).
    pub fn encode_key(
        &self,
        name: &str,
        value: &Value,
        endian: Endianness,
    ) -> Result<Bytes, Error> {
        let machine = self.machine(name)?;
        let mut buf = Buffer::new(endian);
        machine.serialize(&mut buf, value, true, self)?;
        Ok(buf.freeze())
    }

    /// Returns the compiled key program for a registered type, compiling and
    /// caching it on first use.
    pub fn key_ops(&self, name: &str) -> Result<Arc<Vec<KeyOp>>, Error> {
        if let Some(ops) = self.programs.read().expect("poisoned lock").get(name) {
            return Ok(ops.clone());
        }
        let machine = self.machine(name)?;
        let mut stack = vec![name.to_string()];
        let ops = Arc::new(machine.key_ops(false, self, &mut stack)?);
        let mut cache = self.programs.write().expect("poisoned lock");
        Ok(cache.entry(name.to_string()).or_insert(ops).clone())
    }

    /// Extracts the key encoding directly from raw encoded bytes by running
    /// the compiled key program (the VM key path).
    ///
    /// `wire_endian` is the endianness the bytes were encoded with;
    /// `key_endian` selects the normalization of the key output. The result
    /// is byte-identical to [`TypeRegistry::encode_key`] called with
    /// `key_endian` on the decoded value.
    pub fn extract_key(
        &self,
        name: &str,
        wire: &[u8],
        wire_endian: Endianness,
        key_endian: Endianness,
    ) -> Result<Bytes, Error> {
        let ops = self.key_ops(name)?;
        keyvm::extract_key(&ops, wire, wire_endian, key_endian)
    }

    /// Returns a worst-case upper bound on the named type's key encoding
    /// size, cached after the first computation. Results at or above
    /// [`crate::sizer::UNBOUNDED_KEY_SIZE`] are only nominally bounded
    /// (the type can contain itself).
    pub fn max_key_size(&self, name: &str) -> Result<u64, Error> {
        if let Some(size) = self.key_sizes.read().expect("poisoned lock").get(name) {
            return Ok(*size);
        }
        let machine = self.machine(name)?;
        let mut finder = MaxSizeFinder::new();
        let mut stack = vec![name.to_string()];
        machine.max_key_size(&mut finder, self, &mut stack)?;
        let size = finder.size();
        self.key_sizes
            .write()
            .expect("poisoned lock")
            .insert(name.to_string(), size);
        Ok(size)
    }
}
