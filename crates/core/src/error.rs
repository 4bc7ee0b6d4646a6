//! Error types for flitcheck.
//!
//! Every fallible operation returns a structured error instead of panicking.
//! Reconciliation findings (lost packets, partial deliveries, misrouted
//! flits) are *not* errors: they are the oracle's normal output and live in
//! [`crate::oracle::Reconciliation`].

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for all operations in the system.
///
/// Each variant corresponds to a specific failure domain:
/// - Config: the field layout does not fit the flit (fatal at startup)
/// - Codec: encoding or decoding a single flit
/// - Generation: building descriptors and batches
/// - Trace: assembling or reading back trace artifacts
/// - I/O: file system operations
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Flit encode/decode error
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Traffic generation error
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Trace construction or artifact error
    #[error("trace error: {0}")]
    Trace(#[from] TraceError),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Names the fields of a header flit, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Padding,
    Id,
    Source,
    Destination,
    Length,
    /// Full-width time marker
    Time,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Padding => "padding",
            Field::Id => "id",
            Field::Source => "src",
            Field::Destination => "dst",
            Field::Length => "len",
            Field::Time => "time",
        };
        f.write_str(name)
    }
}

/// Flit codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A value does not fit the width allotted to its field
    #[error("{field} value {value} does not fit in {width} bits")]
    FieldOverflow { field: Field, value: u64, width: u32 },

    /// An address lies outside the configured grid
    #[error("address {address} outside grid of {nodes} nodes")]
    AddressOutOfRange { address: String, nodes: u32 },

    /// Flit string has the wrong length
    #[error("malformed flit: expected {expected} bits, got {actual}")]
    MalformedFlit { expected: usize, actual: usize },

    /// Flit string contains something other than '0' and '1'
    #[error("malformed flit: invalid character {found:?} at bit {position}")]
    NonBinaryFlit { position: usize, found: char },

    /// The descriptor would encode to a reserved sentinel value
    #[error("descriptor encodes to reserved sentinel {flit}")]
    SentinelCollision { flit: String },

    /// Packet length of zero cannot be encoded
    #[error("packet {id} has zero length")]
    ZeroLength { id: u64 },
}

/// Traffic generation errors.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// No distinct source/destination pair could be sampled
    #[error("cannot sample distinct src/dst among {nodes} nodes after {attempts} attempts")]
    GenerationExhausted { nodes: u32, attempts: usize },

    /// Source and destination are the same node
    #[error("packet {id} has src == dst ({node})")]
    SelfAddressed { id: u64, node: u32 },

    /// Packet length outside 1..=max_packet_length
    #[error("packet length {len} outside 1..={max}")]
    LengthOutOfRange { len: u32, max: u32 },

    /// Batch injection time went backwards
    #[error("injection time {time} precedes previous batch at {previous}")]
    NonMonotonicTime { previous: u64, time: u64 },

    /// A batch must contain at least one flit
    #[error("empty batch at time {time}")]
    EmptyBatch { time: u64 },
}

/// Trace container and artifact errors.
#[derive(Debug, Error)]
pub enum TraceError {
    /// The flit/time/length arrays violate the batch invariant
    #[error("inconsistent trace: {0}")]
    Inconsistent(String),

    /// An artifact line could not be parsed
    #[error("{}:{line}: {reason}", path.display())]
    Artifact {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// Type alias for Result with our Error type
pub type Result<T> = std::result::Result<T, Error>;
