//! Alignment-aware byte buffer with a cursor and selectable endianness.
//!
//! CDR requires every scalar to start at an offset that is a multiple of its
//! own width, with zero padding inserted to get there. [`Buffer`] owns the
//! byte store, the read/write cursor, and the endianness flag; machines only
//! ever touch bytes through it.

use crate::error::Error;
use bytes::{Bytes, BytesMut};

/// Byte order used for scalar encoding.
///
/// Selected explicitly per buffer, never auto-detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness {
    Big,
    Little,
}

impl Endianness {
    /// The host's native byte order.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }
}

impl Default for Endianness {
    fn default() -> Self {
        Endianness::native()
    }
}

/// An ordered, resizable byte store with a cursor.
///
/// Writes past the end grow the store; `align` inserts zero padding so the
/// cursor lands on the next multiple of the requested alignment. The cursor
/// always satisfies `pos <= len`.
#[derive(Debug, Clone)]
pub struct Buffer {
    data: BytesMut,
    pos: usize,
    endian: Endianness,
}

macro_rules! impl_scalar {
    ($write:ident, $read:ident, $ty:ty) => {
        pub fn $write(&mut self, value: $ty) {
            let bytes = match self.endian {
                Endianness::Big => value.to_be_bytes(),
                Endianness::Little => value.to_le_bytes(),
            };
            self.write_bytes(&bytes);
        }

        pub fn $read(&mut self) -> Result<$ty, Error> {
            let src = self.read_bytes(std::mem::size_of::<$ty>())?;
            let mut bytes = [0u8; std::mem::size_of::<$ty>()];
            bytes.copy_from_slice(src);
            Ok(match self.endian {
                Endianness::Big => <$ty>::from_be_bytes(bytes),
                Endianness::Little => <$ty>::from_le_bytes(bytes),
            })
        }
    };
}

impl Buffer {
    /// Creates an empty buffer with the given endianness.
    pub fn new(endian: Endianness) -> Self {
        Self {
            data: BytesMut::new(),
            pos: 0,
            endian,
        }
    }

    /// Creates a buffer over existing encoded bytes, cursor at the start.
    pub fn from_slice(bytes: &[u8], endian: Endianness) -> Self {
        Self {
            data: BytesMut::from(bytes),
            pos: 0,
            endian,
        }
    }

    pub fn endianness(&self) -> Endianness {
        self.endian
    }

    pub fn set_endianness(&mut self, endian: Endianness) {
        self.endian = endian;
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Moves the cursor. The target must not exceed the store length.
    pub fn seek(&mut self, pos: usize) -> Result<(), Error> {
        if pos > self.data.len() {
            return Err(Error::EndOfBuffer);
        }
        self.pos = pos;
        Ok(())
    }

    /// Clears the store and rewinds the cursor, keeping the allocation.
    pub fn reset(&mut self) {
        self.data.clear();
        self.pos = 0;
    }

    /// Advances the cursor to the next multiple of `n`, zero-padding any
    /// bytes the store does not yet contain. `n` must be 1, 2, 4, or 8.
    pub fn align(&mut self, n: usize) {
        debug_assert!(matches!(n, 1 | 2 | 4 | 8));
        let rem = self.pos % n;
        if rem == 0 {
            return;
        }
        let target = self.pos + (n - rem);
        if target > self.data.len() {
            self.data.resize(target, 0);
        }
        self.pos = target;
    }

    /// Copies raw bytes at the cursor, growing the store as needed.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let end = self
            .pos
            .checked_add(bytes.len())
            .expect("buffer cursor overflow");
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
    }

    /// Returns `n` raw bytes at the cursor, advancing past them.
    pub fn read_bytes(&mut self, n: usize) -> Result<&[u8], Error> {
        let end = self.pos.checked_add(n).ok_or(Error::EndOfBuffer)?;
        if end > self.data.len() {
            return Err(Error::EndOfBuffer);
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    impl_scalar!(write_u8, read_u8, u8);
    impl_scalar!(write_u16, read_u16, u16);
    impl_scalar!(write_u32, read_u32, u32);
    impl_scalar!(write_u64, read_u64, u64);
    impl_scalar!(write_i8, read_i8, i8);
    impl_scalar!(write_i16, read_i16, i16);
    impl_scalar!(write_i32, read_i32, i32);
    impl_scalar!(write_i64, read_i64, i64);
    impl_scalar!(write_f32, read_f32, f32);
    impl_scalar!(write_f64, read_f64, f64);

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    pub fn read_bool(&mut self) -> Result<bool, Error> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::InvalidBool),
        }
    }

    /// Reverses each `width`-sized group in `data[start..start + len]`.
    ///
    /// Used by the key-VM to normalize multi-byte scalars streamed from a
    /// buffer of the opposite endianness. `len` must be a multiple of `width`.
    pub fn swap_chunks(&mut self, start: usize, len: usize, width: usize) {
        debug_assert_eq!(len % width, 0);
        let region = &mut self.data[start..start + len];
        for chunk in region.chunks_exact_mut(width) {
            chunk.reverse();
        }
    }

    /// Consumes the buffer, returning the written bytes.
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}
