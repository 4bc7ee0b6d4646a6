//! Field-width calculation for header flits.
//!
//! A header flit is a fixed-width bit string laid out MSB-first as:
//!
//! ```text
//! +---------+----+-----+-----+-----+
//! | padding | id | src | dst | len |
//! +---------+----+-----+-----+-----+
//! ```
//!
//! With flat addressing `src`/`dst` are single `bit_width(X*Y*Z)` fields.
//! With coordinate addressing each of them is `z | y | x`, one
//! `bit_width(dim)` field per axis.
//!
//! The identifier either absorbs every remaining bit (flat testbenches, no
//! padding) or has a fixed width, in which case the remainder becomes the
//! leading padding field. Either way the widths sum to exactly `flit_width`;
//! [`FieldLayout::new`] refuses any configuration where they don't.

use crate::address::{AddressingScheme, Grid};
use crate::error::{Error, Field, Result};
use serde::{Deserialize, Serialize};

/// Widest single field we can hold in a `u64`.
const MAX_FIELD_WIDTH: u32 = 64;

/// Minimum number of bits needed to represent integers in `[0, n)`.
///
/// `0` for `n == 0`, `1` for `n == 1`, otherwise `ceil(log2(n))`.
pub fn bit_width(n: u64) -> u32 {
    match n {
        0 => 0,
        1 => 1,
        _ => u64::BITS - (n - 1).leading_zeros(),
    }
}

/// Largest value representable in `width` bits.
pub(crate) fn max_value(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Interconnect configuration shared by the generator and the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NocConfig {
    /// Grid columns
    pub x: u32,

    /// Grid rows
    pub y: u32,

    /// Grid layers
    pub z: u32,

    /// Total bits per flit
    pub flit_width: u32,

    /// Bits reserved for the in-band packet length
    pub length_width: u32,

    /// Virtual channels (receive logs) per node
    pub virtual_channels: u32,

    /// Address form used on the wire
    pub addressing: AddressingScheme,

    /// Fixed identifier width; `None` lets the id take all remaining bits
    pub id_width: Option<u32>,
}

impl Default for NocConfig {
    /// The 4×4×1 mesh with 32-bit flits, 5-bit lengths and 2 VCs.
    fn default() -> Self {
        Self {
            x: 4,
            y: 4,
            z: 1,
            flit_width: 32,
            length_width: 5,
            virtual_channels: 2,
            addressing: AddressingScheme::Flat,
            id_width: None,
        }
    }
}

impl NocConfig {
    /// Flat-addressed grid with default flit geometry.
    pub fn flat(x: u32, y: u32, z: u32) -> Self {
        Self {
            x,
            y,
            z,
            ..Self::default()
        }
    }

    /// Coordinate-addressed grid with a fixed identifier width.
    pub fn coordinate(x: u32, y: u32, z: u32, id_width: u32) -> Self {
        Self {
            x,
            y,
            z,
            addressing: AddressingScheme::Coordinate,
            id_width: Some(id_width),
            ..Self::default()
        }
    }

    pub fn num_nodes(&self) -> u32 {
        self.x.saturating_mul(self.y).saturating_mul(self.z)
    }

    pub(crate) fn grid(&self) -> Grid {
        Grid::new(self.x, self.y, self.z)
    }
}

/// Widths of one address field group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressWidths {
    Flat(u32),
    Coordinate { z: u32, y: u32, x: u32 },
}

impl AddressWidths {
    pub fn total(&self) -> u32 {
        match *self {
            AddressWidths::Flat(w) => w,
            AddressWidths::Coordinate { z, y, x } => z + y + x,
        }
    }
}

/// Validated bit widths of every header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    flit_width: u32,
    padding: u32,
    id: u32,
    address: AddressWidths,
    length: u32,
}

impl FieldLayout {
    /// Derive the layout for `config`.
    ///
    /// # Errors
    /// `Error::Config` if a dimension or width is zero, if the fixed fields
    /// do not fit in the flit, if the identifier would be empty, or if a
    /// single field exceeds 64 bits.
    pub fn new(config: &NocConfig) -> Result<Self> {
        if config.x == 0 || config.y == 0 || config.z == 0 {
            return Err(Error::Config(format!(
                "grid dimensions must be >= 1, got {}x{}x{}",
                config.x, config.y, config.z
            )));
        }
        if config.virtual_channels == 0 {
            return Err(Error::Config("virtual_channels must be >= 1".into()));
        }
        if config.length_width == 0 || config.length_width > 32 {
            return Err(Error::Config(format!(
                "length_width must be in 1..=32, got {}",
                config.length_width
            )));
        }
        let nodes = u64::from(config.x) * u64::from(config.y) * u64::from(config.z);
        if nodes > u64::from(u32::MAX) {
            return Err(Error::Config(format!("grid of {nodes} nodes is too large")));
        }

        let address = match config.addressing {
            AddressingScheme::Flat => AddressWidths::Flat(bit_width(nodes)),
            AddressingScheme::Coordinate => AddressWidths::Coordinate {
                z: bit_width(config.z.into()),
                y: bit_width(config.y.into()),
                x: bit_width(config.x.into()),
            },
        };

        let fixed = 2 * address.total() + config.length_width;
        let (id, padding) = match config.id_width {
            None => (config.flit_width.saturating_sub(fixed), 0),
            Some(id) => {
                let padding = fixed
                    .checked_add(id)
                    .and_then(|used| config.flit_width.checked_sub(used))
                    .ok_or_else(|| {
                        Error::Config(format!(
                            "id ({id}) + addresses + len ({fixed}) exceed flit width {}",
                            config.flit_width
                        ))
                    })?;
                (id, padding)
            }
        };

        if id == 0 {
            return Err(Error::Config(format!(
                "no bits left for the packet id: addresses + len use {fixed} of {} bits",
                config.flit_width
            )));
        }
        for (field, width) in [(Field::Id, id), (Field::Padding, padding)] {
            if width > MAX_FIELD_WIDTH {
                return Err(Error::Config(format!(
                    "{field} field of {width} bits exceeds {MAX_FIELD_WIDTH}"
                )));
            }
        }

        let layout = Self {
            flit_width: config.flit_width,
            padding,
            id,
            address,
            length: config.length_width,
        };

        if layout.total_width() != config.flit_width {
            return Err(Error::Config(format!(
                "field widths sum to {} but flit width is {}",
                layout.total_width(),
                config.flit_width
            )));
        }

        Ok(layout)
    }

    pub fn flit_width(&self) -> u32 {
        self.flit_width
    }

    pub fn padding_width(&self) -> u32 {
        self.padding
    }

    pub fn id_width(&self) -> u32 {
        self.id
    }

    pub fn address_widths(&self) -> AddressWidths {
        self.address
    }

    pub fn length_width(&self) -> u32 {
        self.length
    }

    /// Sum of every field width.
    pub fn total_width(&self) -> u32 {
        self.padding + self.id + 2 * self.address.total() + self.length
    }

    /// Fields in wire order as `(field, bit offset, width)`.
    pub fn fields(&self) -> [(Field, u32, u32); 5] {
        let addr = self.address.total();
        let id_at = self.padding;
        let src_at = id_at + self.id;
        let dst_at = src_at + addr;
        let len_at = dst_at + addr;
        [
            (Field::Padding, 0, self.padding),
            (Field::Id, id_at, self.id),
            (Field::Source, src_at, addr),
            (Field::Destination, dst_at, addr),
            (Field::Length, len_at, self.length),
        ]
    }

    pub fn max_packet_length(&self) -> u32 {
        max_value(self.length) as u32
    }

    pub fn max_id(&self) -> u64 {
        max_value(self.id)
    }

    pub fn max_padding(&self) -> u64 {
        if self.padding == 0 {
            0
        } else {
            max_value(self.padding)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_width() {
        assert_eq!(bit_width(0), 0);
        assert_eq!(bit_width(1), 1);
        assert_eq!(bit_width(2), 1);
        assert_eq!(bit_width(3), 2);
        assert_eq!(bit_width(4), 2);
        assert_eq!(bit_width(5), 3);
        assert_eq!(bit_width(16), 4);
        assert_eq!(bit_width(17), 5);
        assert_eq!(bit_width(1 << 40), 40);
    }

    #[test]
    fn test_flat_default_layout() {
        // 16 nodes -> 4-bit addresses, 5-bit length, id gets 32 - 13 = 19
        let layout = FieldLayout::new(&NocConfig::default()).unwrap();
        assert_eq!(layout.address_widths(), AddressWidths::Flat(4));
        assert_eq!(layout.id_width(), 19);
        assert_eq!(layout.padding_width(), 0);
        assert_eq!(layout.max_packet_length(), 31);
        assert_eq!(layout.total_width(), 32);
    }

    #[test]
    fn test_coordinate_layout() {
        // 2x2x1 -> x:1, y:1, z:1 per address; id fixed at 8; padding 32-8-6-5
        let layout = FieldLayout::new(&NocConfig::coordinate(2, 2, 1, 8)).unwrap();
        assert_eq!(
            layout.address_widths(),
            AddressWidths::Coordinate { z: 1, y: 1, x: 1 }
        );
        assert_eq!(layout.id_width(), 8);
        assert_eq!(layout.padding_width(), 13);
        assert_eq!(layout.total_width(), 32);
    }

    #[test]
    fn test_width_budget_sums_exactly() {
        let mut configs = Vec::new();
        for (x, y, z) in [(1, 1, 1), (2, 2, 1), (4, 4, 1), (3, 3, 3), (8, 8, 4), (5, 1, 1)] {
            configs.push(NocConfig::flat(x, y, z));
            configs.push(NocConfig::coordinate(x, y, z, 8));
            configs.push(NocConfig {
                flit_width: 64,
                length_width: 8,
                ..NocConfig::flat(x, y, z)
            });
        }
        for config in &configs {
            let layout = FieldLayout::new(config).unwrap();
            assert_eq!(layout.total_width(), config.flit_width, "{config:?}");
            let last = layout.fields()[4];
            assert_eq!(last.1 + last.2, config.flit_width);
        }
    }

    #[test]
    fn test_fields_are_contiguous() {
        let layout = FieldLayout::new(&NocConfig::coordinate(4, 4, 2, 8)).unwrap();
        let mut next = 0;
        for (_, offset, width) in layout.fields() {
            assert_eq!(offset, next);
            next += width;
        }
        assert_eq!(next, 32);
    }

    #[test]
    fn test_layout_does_not_fit() {
        let config = NocConfig {
            flit_width: 12,
            ..NocConfig::flat(4, 4, 1)
        };
        // 4 + 4 + 5 = 13 > 12
        assert!(matches!(FieldLayout::new(&config), Err(Error::Config(_))));

        let config = NocConfig::coordinate(4, 4, 1, 30);
        assert!(matches!(FieldLayout::new(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_no_room_for_id() {
        let config = NocConfig {
            flit_width: 13,
            ..NocConfig::flat(4, 4, 1)
        };
        assert!(matches!(FieldLayout::new(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(FieldLayout::new(&NocConfig::flat(0, 4, 1)).is_err());
        let config = NocConfig {
            virtual_channels: 0,
            ..NocConfig::default()
        };
        assert!(FieldLayout::new(&config).is_err());
        let config = NocConfig {
            length_width: 0,
            ..NocConfig::default()
        };
        assert!(FieldLayout::new(&config).is_err());
    }

    #[test]
    fn test_oversized_id_rejected() {
        let config = NocConfig {
            flit_width: 128,
            ..NocConfig::default()
        };
        assert!(matches!(FieldLayout::new(&config), Err(Error::Config(_))));
    }
}
