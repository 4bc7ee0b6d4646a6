//! Bit-level I/O over `'0'`/`'1'` text.
//!
//! Flits travel between the generator, the hardware testbench and the oracle
//! as text: one character per bit, most significant bit first. [`BitWriter`]
//! appends zero-padded fields to such a string and [`BitReader`] slices them
//! back out.
//!
//! Unlike a raw bit packer the writer never drops high bits: a value that
//! does not fit its field is a [`CodecError::FieldOverflow`].
//!
//! # Example
//! ```
//! use flitcheck_core::bitio::{BitReader, BitWriter};
//! use flitcheck_core::error::Field;
//!
//! let mut writer = BitWriter::new();
//! writer.write_field(Field::Id, 0b101, 3).unwrap();
//! writer.write_field(Field::Length, 0b11, 4).unwrap();
//! let bits = writer.finish();
//! assert_eq!(bits, "1010011");
//!
//! let mut reader = BitReader::new(&bits).unwrap();
//! assert_eq!(reader.read_bits(3).unwrap(), 0b101);
//! assert_eq!(reader.read_bits(4).unwrap(), 0b11);
//! ```

use crate::error::{CodecError, Field, Result};
use crate::layout::max_value;

/// Appends MSB-first binary fields to a text buffer.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    bits: String,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bits: usize) -> Self {
        Self {
            bits: String::with_capacity(bits),
        }
    }

    /// Write `value` zero-padded to exactly `width` bits.
    ///
    /// # Errors
    /// `CodecError::FieldOverflow` if `value` needs more than `width` bits.
    pub fn write_field(&mut self, field: Field, value: u64, width: u32) -> Result<()> {
        if value > max_value(width) {
            return Err(CodecError::FieldOverflow {
                field,
                value,
                width,
            }
            .into());
        }
        for shift in (0..width).rev() {
            let bit = if shift >= 64 { 0 } else { (value >> shift) & 1 };
            self.bits.push(if bit == 1 { '1' } else { '0' });
        }
        Ok(())
    }

    /// Write every byte as 8 bits, MSB first.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for byte in bytes {
            for shift in (0..8).rev() {
                self.bits.push(if (byte >> shift) & 1 == 1 { '1' } else { '0' });
            }
        }
    }

    /// Return the number of bits written so far.
    pub fn bit_len(&self) -> usize {
        self.bits.len()
    }

    /// Finish writing and return the bit string.
    pub fn finish(self) -> String {
        self.bits
    }
}

/// Reads MSB-first fields from a bit string.
///
/// # Invariants
/// - `position` never exceeds `bits.len()`
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    bits: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    /// Wrap `bits`, rejecting anything other than `'0'` and `'1'`.
    pub fn new(bits: &'a str) -> Result<Self> {
        if let Some((position, found)) = bits
            .chars()
            .enumerate()
            .find(|(_, c)| *c != '0' && *c != '1')
        {
            return Err(CodecError::NonBinaryFlit { position, found }.into());
        }
        Ok(Self {
            bits: bits.as_bytes(),
            position: 0,
        })
    }

    /// Read `count` bits (at most 64) as an unsigned integer.
    ///
    /// # Errors
    /// `CodecError::MalformedFlit` if fewer than `count` bits remain.
    pub fn read_bits(&mut self, count: u32) -> Result<u64> {
        let count = count as usize;
        if count > self.bits_remaining() || count > 64 {
            return Err(CodecError::MalformedFlit {
                expected: self.position + count,
                actual: self.bits.len(),
            }
            .into());
        }

        let value = self.bits[self.position..self.position + count]
            .iter()
            .fold(0u64, |acc, &b| (acc << 1) | u64::from(b == b'1'));
        self.position += count;
        Ok(value)
    }

    /// Return the number of bits remaining.
    pub fn bits_remaining(&self) -> usize {
        self.bits.len() - self.position
    }

    /// Return the current bit position.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_empty(&self) -> bool {
        self.position >= self.bits.len()
    }
}
