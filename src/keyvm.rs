//! Key-extraction bytecode and its interpreter.
//!
//! A machine tree compiles once into a flat [`KeyOp`] sequence (see
//! [`crate::machine::Machine::key_ops`]). The interpreter replays that
//! sequence directly against raw encoded bytes, producing the key encoding
//! without materializing decoded values. Control flow is expressed as forward
//! jumps and repeat blocks whose distances are measured in instruction count,
//! never byte offset; the program counter and the data cursor are tracked
//! separately since skip regions advance the cursor without adding to the
//! key output.

use crate::buffer::{Buffer, Endianness};
use crate::error::Error;
use bytes::Bytes;

/// One key-extraction instruction.
///
/// `skip` means "advance over this data without copying it into the key
/// output"; it is how non-key struct fields, which are still present in the
/// full wire encoding, are traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOp {
    /// Stream `len` bytes after aligning the cursor to `align`.
    StreamStatic { skip: bool, len: usize, align: usize },
    /// Read a 4-byte count from the live buffer, then stream
    /// `count * width` payload bytes aligned to `align`.
    Stream4ByteSize {
        skip: bool,
        width: usize,
        align: usize,
    },
    /// Normalize the previously streamed region by reversing each
    /// `width`-byte group, when wire and key endianness differ.
    ByteSwap { width: usize },
    /// Union branch header: if the `width`-byte discriminator at the cursor
    /// equals `value`, consume it and fall into this branch's instructions;
    /// otherwise jump `block` instructions ahead to the next header.
    UnionTag {
        skip: bool,
        width: usize,
        value: u64,
        block: usize,
    },
    /// Unconditional forward jump of `ahead` instructions.
    Jump { ahead: usize },
    /// Loop the following block `count` times. `block` is the instruction
    /// count from this op through the matching [`KeyOp::EndRepeat`].
    RepeatStatic {
        skip: bool,
        count: usize,
        block: usize,
    },
    /// Like [`KeyOp::RepeatStatic`] but the count is a 4-byte prefix read
    /// from the live buffer (and copied to the key output unless skipped).
    Repeat4ByteSize { skip: bool, block: usize },
    /// Loop back `back` instructions while iterations remain.
    EndRepeat { back: usize },
}

/// Executes a compiled key program against raw encoded bytes.
///
/// `wire_endian` is the endianness the bytes were encoded with;
/// `key_endian` is the endianness the key output is normalized to. The
/// result is byte-identical to serializing the decoded value in key mode
/// into a `key_endian` buffer.
pub fn extract_key(
    ops: &[KeyOp],
    wire: &[u8],
    wire_endian: Endianness,
    key_endian: Endianness,
) -> Result<Bytes, Error> {
    Interpreter::new(ops, wire, wire_endian, key_endian).run()
}

struct Interpreter<'a> {
    ops: &'a [KeyOp],
    wire: &'a [u8],
    wire_endian: Endianness,
    out: Buffer,
    /// Wire endianness differs from key endianness, so swaps are live.
    normalize: bool,
    pc: usize,
    cursor: usize,
    /// Remaining iteration counts of enclosing repeat blocks.
    frames: Vec<usize>,
    /// Output range written by the most recent stream op, for ByteSwap.
    streamed: (usize, usize),
}

impl<'a> Interpreter<'a> {
    fn new(
        ops: &'a [KeyOp],
        wire: &'a [u8],
        wire_endian: Endianness,
        key_endian: Endianness,
    ) -> Self {
        Self {
            ops,
            wire,
            wire_endian,
            out: Buffer::new(key_endian),
            normalize: wire_endian != key_endian,
            pc: 0,
            cursor: 0,
            frames: Vec::new(),
            streamed: (0, 0),
        }
    }

    fn run(mut self) -> Result<Bytes, Error> {
        while let Some(op) = self.ops.get(self.pc) {
            match *op {
                KeyOp::StreamStatic { skip, len, align } => {
                    let payload = self.take(len, align)?;
                    if !skip {
                        self.out.align(align);
                        let start = self.out.position();
                        self.out.write_bytes(payload);
                        self.streamed = (start, len);
                    }
                    self.pc += 1;
                }
                KeyOp::Stream4ByteSize { skip, width, align } => {
                    let count = self.read_count()?;
                    let len = (count as usize)
                        .checked_mul(width)
                        .ok_or(Error::EndOfBuffer)?;
                    let payload = self.take(len, align)?;
                    if !skip {
                        self.out.align(4);
                        self.out.write_u32(count);
                        self.out.align(align);
                        let start = self.out.position();
                        self.out.write_bytes(payload);
                        self.streamed = (start, len);
                    }
                    self.pc += 1;
                }
                KeyOp::ByteSwap { width } => {
                    let (start, len) = self.streamed;
                    if self.normalize && len > 0 {
                        debug_assert_eq!(len % width, 0);
                        self.out.swap_chunks(start, len, width);
                    }
                    self.pc += 1;
                }
                KeyOp::UnionTag {
                    skip,
                    width,
                    value,
                    block,
                } => {
                    let aligned = align_up(self.cursor, width);
                    if self.peek_unsigned(aligned, width)? == value {
                        self.cursor = aligned + width;
                        if !skip {
                            self.out.align(width);
                            self.write_unsigned(width, value);
                        }
                        self.pc += 1;
                    } else {
                        self.pc += block;
                    }
                }
                KeyOp::Jump { ahead } => {
                    self.pc += ahead;
                }
                KeyOp::RepeatStatic { skip: _, count, block } => {
                    if count == 0 {
                        self.pc += block;
                    } else {
                        self.frames.push(count);
                        self.pc += 1;
                    }
                }
                KeyOp::Repeat4ByteSize { skip, block } => {
                    let count = self.read_count()?;
                    if !skip {
                        self.out.align(4);
                        self.out.write_u32(count);
                    }
                    if count == 0 {
                        self.pc += block;
                    } else {
                        self.frames.push(count as usize);
                        self.pc += 1;
                    }
                }
                KeyOp::EndRepeat { back } => {
                    let remaining =
                        self.frames.last_mut().ok_or(Error::MalformedProgram(self.pc))?;
                    *remaining -= 1;
                    if *remaining > 0 {
                        self.pc = self
                            .pc
                            .checked_sub(back)
                            .ok_or(Error::MalformedProgram(self.pc))?;
                    } else {
                        self.frames.pop();
                        self.pc += 1;
                    }
                }
            }
        }
        Ok(self.out.freeze())
    }

    /// Aligns the data cursor, then consumes `len` wire bytes.
    fn take(&mut self, len: usize, align: usize) -> Result<&'a [u8], Error> {
        self.cursor = align_up(self.cursor, align);
        let end = self.cursor.checked_add(len).ok_or(Error::EndOfBuffer)?;
        if end > self.wire.len() {
            return Err(Error::EndOfBuffer);
        }
        let slice = &self.wire[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    /// Reads a 4-byte count prefix at the aligned cursor.
    fn read_count(&mut self) -> Result<u32, Error> {
        self.cursor = align_up(self.cursor, 4);
        let raw = self.peek_unsigned(self.cursor, 4)?;
        self.cursor += 4;
        Ok(raw as u32)
    }

    /// Reads an unsigned scalar at an absolute position without consuming it.
    fn peek_unsigned(&self, at: usize, width: usize) -> Result<u64, Error> {
        let end = at.checked_add(width).ok_or(Error::EndOfBuffer)?;
        if end > self.wire.len() {
            return Err(Error::EndOfBuffer);
        }
        let bytes = &self.wire[at..end];
        let mut value = 0u64;
        match self.wire_endian {
            Endianness::Big => {
                for &b in bytes {
                    value = (value << 8) | u64::from(b);
                }
            }
            Endianness::Little => {
                for &b in bytes.iter().rev() {
                    value = (value << 8) | u64::from(b);
                }
            }
        }
        Ok(value)
    }

    /// Writes a matched union tag to the key output in key endianness.
    fn write_unsigned(&mut self, width: usize, value: u64) {
        match width {
            1 => self.out.write_u8(value as u8),
            2 => self.out.write_u16(value as u16),
            4 => self.out.write_u32(value as u32),
            _ => self.out.write_u64(value),
        }
    }
}

fn align_up(pos: usize, n: usize) -> usize {
    let rem = pos % n;
    if rem == 0 {
        pos
    } else {
        pos + (n - rem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_static_with_swap() {
        let ops = [
            KeyOp::StreamStatic {
                skip: false,
                len: 4,
                align: 4,
            },
            KeyOp::ByteSwap { width: 4 },
        ];
        // Little-endian 7 normalized to a big-endian key.
        let wire = [0x07, 0x00, 0x00, 0x00];
        let key = extract_key(&ops, &wire, Endianness::Little, Endianness::Big).unwrap();
        assert_eq!(&key[..], &[0x00, 0x00, 0x00, 0x07]);

        // Same endianness: no swap.
        let key = extract_key(&ops, &wire, Endianness::Little, Endianness::Little).unwrap();
        assert_eq!(&key[..], &wire);
    }

    #[test]
    fn test_skip_produces_no_output() {
        let ops = [
            KeyOp::StreamStatic {
                skip: true,
                len: 4,
                align: 4,
            },
            KeyOp::StreamStatic {
                skip: false,
                len: 1,
                align: 1,
            },
        ];
        let wire = [0xAA, 0xBB, 0xCC, 0xDD, 0x42];
        let key = extract_key(&ops, &wire, Endianness::Big, Endianness::Big).unwrap();
        assert_eq!(&key[..], &[0x42]);
    }

    #[test]
    fn test_stream_4byte_size() {
        let ops = [KeyOp::Stream4ByteSize {
            skip: false,
            width: 1,
            align: 1,
        }];
        // count = 3, payload "abc".
        let wire = [0x00, 0x00, 0x00, 0x03, b'a', b'b', b'c'];
        let key = extract_key(&ops, &wire, Endianness::Big, Endianness::Big).unwrap();
        assert_eq!(&key[..], &wire);

        // Truncated payload.
        let truncated = &wire[..5];
        assert!(matches!(
            extract_key(&ops, truncated, Endianness::Big, Endianness::Big),
            Err(Error::EndOfBuffer)
        ));
    }

    #[test]
    fn test_repeat_static_loop() {
        // Two iterations of one 2-byte element.
        let ops = [
            KeyOp::RepeatStatic {
                skip: false,
                count: 2,
                block: 3,
            },
            KeyOp::StreamStatic {
                skip: false,
                len: 2,
                align: 2,
            },
            KeyOp::EndRepeat { back: 1 },
        ];
        let wire = [0x01, 0x02, 0x03, 0x04];
        let key = extract_key(&ops, &wire, Endianness::Big, Endianness::Big).unwrap();
        assert_eq!(&key[..], &wire);
    }

    #[test]
    fn test_repeat_zero_skips_block() {
        let ops = [
            KeyOp::RepeatStatic {
                skip: false,
                count: 0,
                block: 3,
            },
            KeyOp::StreamStatic {
                skip: false,
                len: 2,
                align: 2,
            },
            KeyOp::EndRepeat { back: 1 },
            KeyOp::StreamStatic {
                skip: false,
                len: 1,
                align: 1,
            },
        ];
        let wire = [0x99];
        let key = extract_key(&ops, &wire, Endianness::Big, Endianness::Big).unwrap();
        assert_eq!(&key[..], &[0x99]);
    }

    #[test]
    fn test_union_dispatch_second_branch() {
        // Two 1-byte-tag branches, each with a 1-byte payload; no default.
        let ops = [
            KeyOp::UnionTag {
                skip: false,
                width: 1,
                value: 1,
                block: 3,
            },
            KeyOp::StreamStatic {
                skip: false,
                len: 1,
                align: 1,
            },
            // From pc 2 past the end of the union at pc 5.
            KeyOp::Jump { ahead: 3 },
            KeyOp::UnionTag {
                skip: false,
                width: 1,
                value: 2,
                block: 2,
            },
            KeyOp::StreamStatic {
                skip: false,
                len: 1,
                align: 1,
            },
        ];
        let wire = [0x02, 0x55];
        let key = extract_key(&ops, &wire, Endianness::Big, Endianness::Big).unwrap();
        assert_eq!(&key[..], &[0x02, 0x55]);

        let wire = [0x01, 0x77];
        let key = extract_key(&ops, &wire, Endianness::Big, Endianness::Big).unwrap();
        assert_eq!(&key[..], &[0x01, 0x77]);
    }

    #[test]
    fn test_unmatched_end_repeat() {
        let ops = [KeyOp::EndRepeat { back: 1 }];
        assert!(matches!(
            extract_key(&ops, &[], Endianness::Big, Endianness::Big),
            Err(Error::MalformedProgram(0))
        ));
    }
}
