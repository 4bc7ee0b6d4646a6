//! flitcheck-core: traffic generation and delivery checking for
//! network-on-chip testbenches
//!
//! This library provides the pieces that sit on either side of a hardware
//! interconnect simulation:
//! - Packs packet headers (id, source, destination, length) into fixed-width flits
//! - Generates seeded traffic patterns and records them as testbench traces
//! - Reads back per-node receive logs and reconciles them against the trace
//!
//! # Architecture
//!
//! The system is designed around clear module boundaries:
//! - `address`: Grid addressing and the node/coordinate bijection
//! - `layout`: Field widths derived from the configuration
//! - `bitio`: Low-level bit reading/writing over `'0'`/`'1'` text
//! - `flit`: Header flit codec and sentinels
//! - `trace`: Injected-traffic trace and its builder
//! - `generator`: Traffic generator with seeded randomness
//! - `payload`: Byte payloads cut into flits and packets
//! - `artifacts`: Text files exchanged with the testbench
//! - `oracle`: Delivery reconciliation
//! - `report`: Summary counts and printing
//! - `loopback`: Fault-injecting stand-in for the interconnect
//!
//! # Design Principles
//!
//! - **No panics**: All errors are structured and recoverable
//! - **One layout**: Encoder and decoder share a single validated field layout
//! - **Deterministic**: Seeded randomness makes runs reproducible
//! - **Findings are data**: Lost or misrouted traffic is reported, never thrown

pub mod address;
pub mod artifacts;
pub mod bitio;
pub mod error;
pub mod flit;
pub mod generator;
pub mod layout;
pub mod loopback;
pub mod oracle;
pub mod payload;
pub mod report;
pub mod trace;

// Re-export commonly used types
pub use address::{Address, AddressingScheme, Coord, Grid};
pub use error::{Error, Result};
pub use flit::{Flit, FlitCodec, PacketDescriptor, Sentinel};
pub use layout::{bit_width, FieldLayout, NocConfig};
