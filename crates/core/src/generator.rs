//! Traffic generation.
//!
//! [`TrafficGenerator`] owns everything a generation run mutates: the next
//! packet identifier, the trace under construction and a seeded RNG. Given
//! the same seed and the same calls, two generators produce bit-identical
//! traces.
//!
//! # Patterns
//!
//! - [`TrafficGenerator::random_packets`]: uniform src, resampled dst
//! - [`TrafficGenerator::all_pairs`]: every ordered `(src, dst)`, `src != dst`
//! - [`TrafficGenerator::ring`]: `n[0] -> n[1] -> ... -> n[0]`, a cyclic dependency
//! - [`TrafficGenerator::hotspot`]: many sources, one destination
//!
//! Patterns only build descriptors; nothing reaches the trace until the
//! caller hands them to [`TrafficGenerator::emit_batch`].

use crate::address::Address;
use crate::error::{GenerationError, Result};
use crate::flit::{Flit, FlitCodec, PacketDescriptor, Sentinel};
use crate::trace::{Trace, TraceBuilder};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Resampling attempts before giving up on a distinct destination.
pub const MAX_RESAMPLE_ATTEMPTS: usize = 64;

/// How many trace flits one packet occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlitExpansion {
    /// One header flit per packet
    #[default]
    HeaderOnly,
    /// The header repeated `len` times, one copy per flit of the packet
    Replicated,
}

/// Generation context for one run.
#[derive(Debug)]
pub struct TrafficGenerator {
    codec: FlitCodec,
    expansion: FlitExpansion,
    rng: ChaCha8Rng,
    next_id: u64,
    builder: TraceBuilder,
}

impl TrafficGenerator {
    /// Create a generator writing through `codec`.
    pub fn new(codec: FlitCodec, expansion: FlitExpansion, seed: u64) -> Self {
        Self {
            codec,
            expansion,
            rng: ChaCha8Rng::seed_from_u64(seed),
            next_id: 0,
            builder: TraceBuilder::new(),
        }
    }

    pub fn codec(&self) -> &FlitCodec {
        &self.codec
    }

    pub fn expansion(&self) -> FlitExpansion {
        self.expansion
    }

    /// Identifier the next packet will get.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Restart identifiers at zero.
    ///
    /// Only call this between independent scenarios whose traces are checked
    /// separately; ids must stay unique within one trace.
    pub fn reset_ids(&mut self) {
        log::debug!("resetting packet ids (was {})", self.next_id);
        self.next_id = 0;
    }

    /// Build a descriptor with the next identifier.
    ///
    /// # Errors
    /// - `GenerationError::SelfAddressed` if `src` and `dst` name the same node
    /// - `GenerationError::LengthOutOfRange` unless `1 <= len <= max_packet_length`
    /// - `CodecError::AddressOutOfRange` if either address is off the grid
    pub fn packet(
        &mut self,
        src: impl Into<Address>,
        dst: impl Into<Address>,
        len: u32,
    ) -> Result<PacketDescriptor> {
        let grid = self.codec.grid();
        let src_node = grid.node_index(src.into())?;
        let dst_node = grid.node_index(dst.into())?;
        if src_node == dst_node {
            return Err(GenerationError::SelfAddressed {
                id: self.next_id,
                node: src_node,
            }
            .into());
        }

        let max = self.codec.layout().max_packet_length();
        if len == 0 || len > max {
            return Err(GenerationError::LengthOutOfRange { len, max }.into());
        }

        let scheme = self.codec.scheme();
        let desc = PacketDescriptor {
            id: self.next_id,
            src: grid.convert(Address::Node(src_node), scheme)?,
            dst: grid.convert(Address::Node(dst_node), scheme)?,
            len,
        };
        self.next_id += 1;
        Ok(desc)
    }

    /// Encode `descriptors` and append them as one batch at `time`.
    ///
    /// # Errors
    /// - `GenerationError::EmptyBatch` for an empty slice
    /// - `GenerationError::NonMonotonicTime` if `time` precedes the last batch
    /// - any codec error from encoding a descriptor
    pub fn emit_batch(&mut self, time: u64, descriptors: &[PacketDescriptor]) -> Result<()> {
        let flits = self.encode_all(descriptors)?;
        log::debug!(
            "batch t={time}: {} packets, {} flits",
            descriptors.len(),
            flits.len()
        );
        self.builder.push_batch(time, flits)
    }

    /// Like [`emit_batch`](Self::emit_batch), with a time-marker flit for
    /// `time` in front of the batch.
    pub fn emit_marked_batch(&mut self, time: u64, descriptors: &[PacketDescriptor]) -> Result<()> {
        if descriptors.is_empty() {
            return Err(GenerationError::EmptyBatch { time }.into());
        }
        let marker = Flit::time_marker(time, self.codec.flit_width())?;
        let mut flits = vec![marker.clone()];
        flits.extend(self.encode_all(descriptors)?);

        log::debug!(
            "marked batch t={time}: {} packets, {} flits",
            descriptors.len(),
            flits.len()
        );
        self.builder.push_batch(time, flits)?;
        self.builder.register_marker(marker);
        Ok(())
    }

    /// Append a sentinel as its own one-flit batch.
    ///
    /// The batch takes the time of the previous batch, or 0 in an empty trace.
    pub fn emit_sentinel(&mut self, kind: Sentinel) -> Result<()> {
        let time = self.builder.last_time().unwrap_or(0);
        log::debug!("sentinel {kind:?} at t={time}");
        self.builder
            .push_batch(time, vec![Flit::sentinel(kind, self.codec.flit_width())])
    }

    /// Number of flits emitted so far.
    pub fn num_flits(&self) -> usize {
        self.builder.num_flits()
    }

    /// Finish the run and hand back the trace.
    pub fn finalize(self) -> Trace {
        let trace = self.builder.finalize();
        log::info!(
            "trace finalized: {} batches, {} flits, {} ids used",
            trace.num_batches(),
            trace.flit_data().len(),
            self.next_id
        );
        trace
    }

    /// `count` packets with a uniform source, a destination resampled until
    /// it differs, and a length uniform in `1..=max_len`.
    ///
    /// # Errors
    /// `GenerationError::GenerationExhausted` if the grid has fewer than two
    /// nodes or no distinct destination turns up within
    /// [`MAX_RESAMPLE_ATTEMPTS`] draws.
    pub fn random_packets(&mut self, count: usize, max_len: u32) -> Result<Vec<PacketDescriptor>> {
        let nodes = self.codec.grid().num_nodes();
        if nodes < 2 {
            return Err(GenerationError::GenerationExhausted { nodes, attempts: 0 }.into());
        }
        let max = self.codec.layout().max_packet_length();
        if max_len == 0 || max_len > max {
            return Err(GenerationError::LengthOutOfRange { len: max_len, max }.into());
        }

        let mut packets = Vec::with_capacity(count);
        for _ in 0..count {
            let src = self.rng.gen_range(0..nodes);
            let dst = self.sample_destination(src, nodes)?;
            let len = self.rng.gen_range(1..=max_len);
            packets.push(self.packet(src, dst, len)?);
        }
        Ok(packets)
    }

    /// One packet for every ordered pair of distinct nodes, sources in
    /// ascending order.
    pub fn all_pairs(&mut self, len: u32) -> Result<Vec<PacketDescriptor>> {
        let nodes = self.codec.grid().num_nodes();
        let mut packets = Vec::with_capacity((nodes as usize) * (nodes as usize).saturating_sub(1));
        for src in 0..nodes {
            for dst in (0..nodes).filter(|&d| d != src) {
                packets.push(self.packet(src, dst, len)?);
            }
        }
        Ok(packets)
    }

    /// A cyclic chain: each node sends to the next, the last to the first.
    pub fn ring<A: Into<Address> + Copy>(
        &mut self,
        nodes: &[A],
        len: u32,
    ) -> Result<Vec<PacketDescriptor>> {
        let mut packets = Vec::with_capacity(nodes.len());
        for (i, &src) in nodes.iter().enumerate() {
            let dst = nodes[(i + 1) % nodes.len()];
            packets.push(self.packet(src, dst, len)?);
        }
        Ok(packets)
    }

    /// Every source sends one packet to `dst`.
    pub fn hotspot<A: Into<Address> + Copy>(
        &mut self,
        srcs: &[A],
        dst: impl Into<Address>,
        len: u32,
    ) -> Result<Vec<PacketDescriptor>> {
        let dst = dst.into();
        srcs.iter().map(|&src| self.packet(src, dst, len)).collect()
    }

    /// Shuffle descriptors with the generator's RNG.
    pub fn shuffle(&mut self, descriptors: &mut [PacketDescriptor]) {
        descriptors.shuffle(&mut self.rng);
    }

    /// Random length in `min..=max`, drawn from the generator's RNG.
    pub fn random_len(&mut self, min: u32, max: u32) -> u32 {
        self.rng.gen_range(min..=max.max(min))
    }

    fn sample_destination(&mut self, src: u32, nodes: u32) -> Result<u32> {
        for _ in 0..MAX_RESAMPLE_ATTEMPTS {
            let dst = self.rng.gen_range(0..nodes);
            if dst != src {
                return Ok(dst);
            }
        }
        Err(GenerationError::GenerationExhausted {
            nodes,
            attempts: MAX_RESAMPLE_ATTEMPTS,
        }
        .into())
    }

    fn encode_all(&self, descriptors: &[PacketDescriptor]) -> Result<Vec<Flit>> {
        let mut flits = Vec::new();
        for desc in descriptors {
            let flit = self.codec.encode(desc)?;
            let copies = match self.expansion {
                FlitExpansion::HeaderOnly => 1,
                FlitExpansion::Replicated => desc.len as usize,
            };
            flits.extend(std::iter::repeat(flit).take(copies));
        }
        Ok(flits)
    }

    /// Append an already-encoded batch (payload path).
    pub(crate) fn push_flits(&mut self, time: u64, flits: Vec<Flit>) -> Result<()> {
        self.builder.push_batch(time, flits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Coord;
    use crate::error::Error;
    use crate::layout::NocConfig;
    use std::collections::HashSet;

    fn generator(expansion: FlitExpansion) -> TrafficGenerator {
        let codec = FlitCodec::new(&NocConfig::default()).unwrap();
        TrafficGenerator::new(codec, expansion, 42)
    }

    #[test]
    fn test_sequential_ids() {
        let mut gen = generator(FlitExpansion::HeaderOnly);
        let a = gen.packet(1, 4, 31).unwrap();
        let b = gen.packet(5, 4, 31).unwrap();
        assert_eq!((a.id, b.id), (0, 1));

        gen.reset_ids();
        assert_eq!(gen.packet(8, 4, 31).unwrap().id, 0);
    }

    #[test]
    fn test_invalid_descriptors() {
        let mut gen = generator(FlitExpansion::HeaderOnly);
        assert!(matches!(
            gen.packet(3, 3, 1),
            Err(Error::Generation(GenerationError::SelfAddressed { node: 3, .. }))
        ));
        assert!(matches!(
            gen.packet(Coord::new(1, 0, 0), 1, 1),
            Err(Error::Generation(GenerationError::SelfAddressed { node: 1, .. }))
        ));
        assert!(matches!(
            gen.packet(0, 1, 32),
            Err(Error::Generation(GenerationError::LengthOutOfRange { len: 32, max: 31 }))
        ));
        assert!(gen.packet(0, 1, 0).is_err());
        assert!(gen.packet(0, 16, 1).is_err());
        // failed attempts do not consume ids
        assert_eq!(gen.next_id(), 0);
    }

    #[test]
    fn test_batch_invariant_after_emits() {
        let mut gen = generator(FlitExpansion::Replicated);
        for t in [0, 0, 10, 25] {
            let pkts = gen.random_packets(3, 8).unwrap();
            gen.emit_batch(t, &pkts).unwrap();
        }
        gen.emit_sentinel(Sentinel::Drain).unwrap();
        let trace = gen.finalize();

        assert_eq!(trace.batch_len().iter().sum::<usize>(), trace.flit_data().len());
        assert_eq!(trace.inj_time().len(), trace.batch_len().len());
        assert_eq!(trace.inj_time(), &[0, 0, 10, 25, 25]);
    }

    #[test]
    fn test_replicated_expansion() {
        let mut gen = generator(FlitExpansion::Replicated);
        let p = gen.packet(1, 4, 5).unwrap();
        gen.emit_batch(0, &[p]).unwrap();
        let trace = gen.finalize();
        assert_eq!(trace.batch_len(), &[5]);
        assert_eq!(trace.distinct_flits().len(), 1);
    }

    #[test]
    fn test_marked_batch() {
        let mut gen = generator(FlitExpansion::HeaderOnly);
        let pkts = gen.hotspot(&[1, 5, 8], 4, 31).unwrap();
        gen.emit_marked_batch(100, &pkts).unwrap();
        let trace = gen.finalize();

        assert_eq!(trace.batch_len(), &[4]);
        assert_eq!(trace.markers(), &[Flit::time_marker(100, 32).unwrap()]);
        assert_eq!(trace.flit_data()[0], trace.markers()[0]);
    }

    #[test]
    fn test_non_monotonic_emit() {
        let mut gen = generator(FlitExpansion::HeaderOnly);
        let p = gen.packet(0, 1, 1).unwrap();
        gen.emit_batch(10, &[p]).unwrap();
        assert!(matches!(
            gen.emit_batch(5, &[p]),
            Err(Error::Generation(GenerationError::NonMonotonicTime { previous: 10, time: 5 }))
        ));
        assert!(matches!(
            gen.emit_batch(10, &[]),
            Err(Error::Generation(GenerationError::EmptyBatch { time: 10 }))
        ));
    }

    #[test]
    fn test_sentinel_time() {
        let mut gen = generator(FlitExpansion::HeaderOnly);
        gen.emit_sentinel(Sentinel::TimeMarker).unwrap();
        let p = gen.packet(0, 1, 1).unwrap();
        gen.emit_batch(300, &[p]).unwrap();
        gen.emit_sentinel(Sentinel::Drain).unwrap();
        let trace = gen.finalize();
        assert_eq!(trace.inj_time(), &[0, 300, 300]);
        assert_eq!(trace.flit_data()[2].sentinel_kind(), Some(Sentinel::Drain));
    }

    #[test]
    fn test_all_pairs_4x4() {
        let mut gen = generator(FlitExpansion::HeaderOnly);
        let pkts = gen.all_pairs(1).unwrap();
        assert_eq!(pkts.len(), 240);

        let ids: HashSet<u64> = pkts.iter().map(|p| p.id).collect();
        assert_eq!(ids.len(), 240);
        assert!(ids.iter().all(|&id| id < 240));
        assert!(pkts.iter().all(|p| p.src != p.dst));
    }

    #[test]
    fn test_ring() {
        let mut gen = generator(FlitExpansion::HeaderOnly);
        let pkts = gen.ring(&[5, 6, 10, 9], 31).unwrap();
        let hops: Vec<_> = pkts.iter().map(|p| (p.src, p.dst)).collect();
        assert_eq!(
            hops,
            vec![
                (Address::Node(5), Address::Node(6)),
                (Address::Node(6), Address::Node(10)),
                (Address::Node(10), Address::Node(9)),
                (Address::Node(9), Address::Node(5)),
            ]
        );
    }

    #[test]
    fn test_random_is_deterministic() {
        let mut a = generator(FlitExpansion::HeaderOnly);
        let mut b = generator(FlitExpansion::HeaderOnly);
        let pa = a.random_packets(50, 31).unwrap();
        let pb = b.random_packets(50, 31).unwrap();
        assert_eq!(pa, pb);
        assert!(pa.iter().all(|p| p.src != p.dst && (1..=31).contains(&p.len)));
    }

    #[test]
    fn test_generation_exhausted_single_node() {
        let codec = FlitCodec::new(&NocConfig::flat(1, 1, 1)).unwrap();
        let mut gen = TrafficGenerator::new(codec, FlitExpansion::HeaderOnly, 0);
        assert!(matches!(
            gen.random_packets(1, 4),
            Err(Error::Generation(GenerationError::GenerationExhausted { nodes: 1, .. }))
        ));
    }

    #[test]
    fn test_coordinate_descriptors() {
        let codec = FlitCodec::new(&NocConfig::coordinate(2, 2, 1, 8)).unwrap();
        let mut gen = TrafficGenerator::new(codec, FlitExpansion::HeaderOnly, 0);
        let p = gen.packet(0, 3, 31).unwrap();
        assert_eq!(p.dst, Address::Coord(Coord::new(1, 1, 0)));
    }
}
