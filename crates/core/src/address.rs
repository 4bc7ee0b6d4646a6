//! Node addressing for rectangular X×Y×Z grids.
//!
//! Testbenches address nodes either by a flat index or by an `(x, y, z)`
//! coordinate. Both forms are carried by [`Address`], and the only conversion
//! between them is the pair [`Grid::node_to_coord`] / [`Grid::coord_to_node`]:
//!
//! ```text
//! z = idx / (X*Y)
//! y = (idx % (X*Y)) / X
//! x = (idx % (X*Y)) % X
//! idx = x + X*y + X*Y*z
//! ```
//!
//! A 4×4×1 grid numbers its nodes row by row:
//!
//! ```text
//! |12|13|14|15|
//! | 8| 9|10|11|
//! | 4| 5| 6| 7|
//! | 0| 1| 2| 3|
//! ```

use crate::error::{CodecError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A node position in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coord {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Coord {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

/// Source or destination of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Address {
    /// Flat node index in `0..X*Y*Z`
    Node(u32),
    /// Grid coordinate
    Coord(Coord),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Node(idx) => write!(f, "{idx}"),
            Address::Coord(c) => c.fmt(f),
        }
    }
}

impl From<u32> for Address {
    fn from(idx: u32) -> Self {
        Address::Node(idx)
    }
}

impl From<Coord> for Address {
    fn from(c: Coord) -> Self {
        Address::Coord(c)
    }
}

/// Which [`Address`] form appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressingScheme {
    /// One `bit_width(X*Y*Z)`-bit field per address
    #[default]
    Flat,
    /// Three fields per address, `z | y | x`, each `bit_width(dim)` bits
    Coordinate,
}

/// Grid dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    x: u32,
    y: u32,
    z: u32,
}

impl Grid {
    /// Dimensions must each be at least 1; checked by the layout builder.
    pub(crate) fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub fn dims(&self) -> (u32, u32, u32) {
        (self.x, self.y, self.z)
    }

    pub fn num_nodes(&self) -> u32 {
        self.x * self.y * self.z
    }

    pub fn contains(&self, c: Coord) -> bool {
        c.x < self.x && c.y < self.y && c.z < self.z
    }

    /// Map a flat node index to its coordinate.
    pub fn node_to_coord(&self, idx: u32) -> Result<Coord> {
        if idx >= self.num_nodes() {
            return Err(self.out_of_range(Address::Node(idx)));
        }
        let plane = self.x * self.y;
        let rem = idx % plane;
        Ok(Coord {
            x: rem % self.x,
            y: rem / self.x,
            z: idx / plane,
        })
    }

    /// Map a coordinate to its flat node index.
    pub fn coord_to_node(&self, c: Coord) -> Result<u32> {
        if !self.contains(c) {
            return Err(self.out_of_range(Address::Coord(c)));
        }
        Ok(c.x + self.x * c.y + self.x * self.y * c.z)
    }

    /// Flat index of any address, validating it lies in the grid.
    pub fn node_index(&self, addr: Address) -> Result<u32> {
        match addr {
            Address::Node(idx) if idx < self.num_nodes() => Ok(idx),
            Address::Node(_) => Err(self.out_of_range(addr)),
            Address::Coord(c) => self.coord_to_node(c),
        }
    }

    /// Express `addr` in the given scheme.
    pub fn convert(&self, addr: Address, scheme: AddressingScheme) -> Result<Address> {
        let idx = self.node_index(addr)?;
        match scheme {
            AddressingScheme::Flat => Ok(Address::Node(idx)),
            AddressingScheme::Coordinate => Ok(Address::Coord(self.node_to_coord(idx)?)),
        }
    }

    /// Every node, in index order, expressed in `scheme`.
    pub fn nodes(&self, scheme: AddressingScheme) -> Vec<Address> {
        // Every index below num_nodes converts, so nothing is filtered out.
        (0..self.num_nodes())
            .filter_map(|idx| self.convert(Address::Node(idx), scheme).ok())
            .collect()
    }

    fn out_of_range(&self, addr: Address) -> crate::error::Error {
        CodecError::AddressOutOfRange {
            address: addr.to_string(),
            nodes: self.num_nodes(),
        }
        .into()
    }
}
