//! Header flit format and codec.
//!
//! A header flit packs one packet descriptor into `flit_width` bits:
//!
//! ```text
//! +---------+----+-----+-----+-----+
//! | padding | id | src | dst | len |
//! +---------+----+-----+-----+-----+
//! ```
//!
//! See [`crate::layout`] for how the widths are derived. Two values are
//! reserved and never produced for real traffic:
//!
//! - all zeros: time marker / no-op header
//! - all ones: drain terminator ("run to completion")
//!
//! A descriptor with `len >= 1` cannot encode to all zeros, and one with
//! `src != dst` cannot encode to all ones, but [`FlitCodec::encode`] still
//! refuses both explicitly.

use crate::address::{Address, AddressingScheme, Coord, Grid};
use crate::bitio::{BitReader, BitWriter};
use crate::error::{CodecError, Field, Result};
use crate::layout::{AddressWidths, FieldLayout, NocConfig};
use std::fmt;

/// A validated bit string of exactly the configured flit width.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Flit(String);

impl Flit {
    /// Parse a `'0'`/`'1'` string of exactly `width` characters.
    ///
    /// # Errors
    /// - `CodecError::MalformedFlit` on a length mismatch
    /// - `CodecError::NonBinaryFlit` on any other character
    pub fn parse(bits: &str, width: u32) -> Result<Self> {
        if bits.len() != width as usize {
            return Err(CodecError::MalformedFlit {
                expected: width as usize,
                actual: bits.len(),
            }
            .into());
        }
        BitReader::new(bits)?;
        Ok(Self(bits.to_owned()))
    }

    /// The all-zero or all-one flit.
    pub fn sentinel(kind: Sentinel, width: u32) -> Self {
        let bit = match kind {
            Sentinel::TimeMarker => "0",
            Sentinel::Drain => "1",
        };
        Self(bit.repeat(width as usize))
    }

    /// The injection time written as a full-width binary number.
    ///
    /// Time zero is the all-zero sentinel.
    pub fn time_marker(time: u64, width: u32) -> Result<Self> {
        let mut writer = BitWriter::with_capacity(width as usize);
        writer.write_field(Field::Time, time, width)?;
        Ok(Self(writer.finish()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Width in bits.
    pub fn width(&self) -> usize {
        self.0.len()
    }

    /// Which sentinel this flit is, if any.
    pub fn sentinel_kind(&self) -> Option<Sentinel> {
        if self.0.bytes().all(|b| b == b'0') {
            Some(Sentinel::TimeMarker)
        } else if self.0.bytes().all(|b| b == b'1') {
            Some(Sentinel::Drain)
        } else {
            None
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.sentinel_kind().is_some()
    }
}

impl fmt::Display for Flit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Flit {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Reserved flit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentinel {
    /// All zeros: time marker / no-op header
    TimeMarker,
    /// All ones: drain terminator
    Drain,
}

/// Logical content of a header flit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketDescriptor {
    /// Identifier, unique within a generation run
    pub id: u64,

    pub src: Address,

    pub dst: Address,

    /// Packet length in flits
    pub len: u32,
}

impl PacketDescriptor {
    pub fn new(id: u64, src: impl Into<Address>, dst: impl Into<Address>, len: u32) -> Self {
        Self {
            id,
            src: src.into(),
            dst: dst.into(),
            len,
        }
    }
}

impl fmt::Display for PacketDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={} src={} dst={} len={}",
            self.id, self.src, self.dst, self.len
        )
    }
}

/// Encodes descriptors to flits and back for one configuration.
///
/// The layout is validated once in [`FlitCodec::new`]; the encode and decode
/// paths share it, so they can never disagree on field offsets.
#[derive(Debug, Clone)]
pub struct FlitCodec {
    config: NocConfig,
    layout: FieldLayout,
    grid: Grid,
}

impl FlitCodec {
    /// Build the codec for `config`.
    ///
    /// # Errors
    /// `Error::Config` if the field widths do not fit the flit.
    pub fn new(config: &NocConfig) -> Result<Self> {
        let layout = FieldLayout::new(config)?;
        log::debug!(
            "flit layout: padding={} id={} addr={} len={} (total {})",
            layout.padding_width(),
            layout.id_width(),
            layout.address_widths().total(),
            layout.length_width(),
            layout.flit_width()
        );
        Ok(Self {
            config: config.clone(),
            layout,
            grid: config.grid(),
        })
    }

    pub fn config(&self) -> &NocConfig {
        &self.config
    }

    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn scheme(&self) -> AddressingScheme {
        self.config.addressing
    }

    pub fn flit_width(&self) -> u32 {
        self.layout.flit_width()
    }

    /// Parse a flit of this codec's width.
    pub fn parse_flit(&self, bits: &str) -> Result<Flit> {
        Flit::parse(bits, self.flit_width())
    }

    /// Encode a descriptor with a zero padding field.
    pub fn encode(&self, desc: &PacketDescriptor) -> Result<Flit> {
        self.encode_padded(desc, 0)
    }

    /// Encode a descriptor, writing `padding` into the padding field.
    ///
    /// # Errors
    /// - `CodecError::ZeroLength` if `desc.len == 0`
    /// - `CodecError::AddressOutOfRange` if an address is outside the grid
    /// - `CodecError::FieldOverflow` if any value exceeds its field
    /// - `CodecError::SentinelCollision` if the result is a reserved value
    pub fn encode_padded(&self, desc: &PacketDescriptor, padding: u64) -> Result<Flit> {
        if desc.len == 0 {
            return Err(CodecError::ZeroLength { id: desc.id }.into());
        }

        let src = self.grid.convert(desc.src, self.scheme())?;
        let dst = self.grid.convert(desc.dst, self.scheme())?;

        let mut writer = BitWriter::with_capacity(self.flit_width() as usize);
        writer.write_field(Field::Padding, padding, self.layout.padding_width())?;
        writer.write_field(Field::Id, desc.id, self.layout.id_width())?;
        self.write_address(&mut writer, Field::Source, src)?;
        self.write_address(&mut writer, Field::Destination, dst)?;
        writer.write_field(Field::Length, u64::from(desc.len), self.layout.length_width())?;

        let flit = Flit(writer.finish());
        debug_assert_eq!(flit.width(), self.flit_width() as usize);

        if flit.is_sentinel() {
            return Err(CodecError::SentinelCollision {
                flit: flit.0,
            }
            .into());
        }
        Ok(flit)
    }

    /// Decode a flit back into a descriptor.
    ///
    /// Addresses come back in the configured scheme and are not range
    /// checked, so corrupted destinations can still be reported.
    ///
    /// # Errors
    /// `CodecError::MalformedFlit` if the flit is not exactly `flit_width` bits.
    pub fn decode(&self, flit: &Flit) -> Result<PacketDescriptor> {
        self.decode_str(flit.as_str())
    }

    /// Decode raw text; see [`FlitCodec::decode`].
    pub fn decode_str(&self, bits: &str) -> Result<PacketDescriptor> {
        let mut reader = self.reader(bits)?;
        reader.read_bits(self.layout.padding_width())?;
        let id = reader.read_bits(self.layout.id_width())?;
        let src = self.read_address(&mut reader)?;
        let dst = self.read_address(&mut reader)?;
        let len = reader.read_bits(self.layout.length_width())? as u32;
        Ok(PacketDescriptor { id, src, dst, len })
    }

    /// Value of the padding field.
    pub fn padding_of(&self, flit: &Flit) -> Result<u64> {
        let mut reader = self.reader(flit.as_str())?;
        reader.read_bits(self.layout.padding_width())
    }

    /// Flat index of the descriptor's destination, if it is on the grid.
    pub fn destination_node(&self, desc: &PacketDescriptor) -> Option<u32> {
        self.grid.node_index(desc.dst).ok()
    }

    fn reader<'a>(&self, bits: &'a str) -> Result<BitReader<'a>> {
        let expected = self.flit_width() as usize;
        if bits.len() != expected {
            return Err(CodecError::MalformedFlit {
                expected,
                actual: bits.len(),
            }
            .into());
        }
        BitReader::new(bits)
    }

    fn write_address(&self, writer: &mut BitWriter, field: Field, addr: Address) -> Result<()> {
        match (self.layout.address_widths(), addr) {
            (AddressWidths::Flat(w), Address::Node(idx)) => {
                writer.write_field(field, u64::from(idx), w)
            }
            (AddressWidths::Coordinate { z, y, x }, Address::Coord(c)) => {
                writer.write_field(field, u64::from(c.z), z)?;
                writer.write_field(field, u64::from(c.y), y)?;
                writer.write_field(field, u64::from(c.x), x)
            }
            // `convert` already put the address in the configured scheme.
            (_, other) => Err(CodecError::AddressOutOfRange {
                address: other.to_string(),
                nodes: self.grid.num_nodes(),
            }
            .into()),
        }
    }

    fn read_address(&self, reader: &mut BitReader<'_>) -> Result<Address> {
        Ok(match self.layout.address_widths() {
            AddressWidths::Flat(w) => Address::Node(reader.read_bits(w)? as u32),
            AddressWidths::Coordinate { z, y, x } => {
                let cz = reader.read_bits(z)? as u32;
                let cy = reader.read_bits(y)? as u32;
                let cx = reader.read_bits(x)? as u32;
                Address::Coord(Coord::new(cx, cy, cz))
            }
        })
    }
}
