//! Byte payloads as packet streams.
//!
//! Whatever produces the payload (an image decoder, a file reader) only has
//! to hand over a flat byte sequence. The bytes are written MSB-first into
//! one long bit string and cut into `flit_width`-bit chunks:
//!
//! ```text
//! bytes:   b0       b1       b2       ...
//! bits:    b0b1b2b3 | b4b5 ...        (flit_width bits per chunk)
//! last:    1111 + remaining bits      (left-padded with '1')
//! ```
//!
//! The number of padding bits is carried in the padding field of the final
//! packet's header so the receiver can strip it again.
//!
//! Each packet is a header whose length field counts the header itself,
//! followed by its payload flits.

use crate::address::Address;
use crate::bitio::BitWriter;
use crate::error::{Error, Result};
use crate::flit::{Flit, PacketDescriptor};
use crate::generator::TrafficGenerator;

/// Payload flits and the padding applied to the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunks {
    pub flits: Vec<Flit>,

    /// `'1'` bits prepended to the final chunk
    pub padding_bits: u32,
}

/// Slice `bytes` into `width`-bit flits.
///
/// An empty input yields no flits and no padding.
pub fn chunk_bytes(bytes: &[u8], width: u32) -> Result<Chunks> {
    if width == 0 {
        return Err(Error::Config("flit width must be >= 1".into()));
    }
    let mut writer = BitWriter::with_capacity(bytes.len() * 8);
    writer.write_bytes(bytes);
    let bits = writer.finish();

    let width = width as usize;
    let mut flits = Vec::with_capacity(bits.len().div_ceil(width));
    let mut padding_bits = 0;
    // `bits` is pure ASCII, so byte slicing never splits a character.
    for chunk in bits.as_bytes().chunks(width) {
        let chunk = std::str::from_utf8(chunk).map_err(|e| Error::Config(e.to_string()))?;
        let padded = if chunk.len() < width {
            padding_bits = (width - chunk.len()) as u32;
            format!("{chunk:1>width$}")
        } else {
            chunk.to_owned()
        };
        flits.push(Flit::parse(&padded, width as u32)?);
    }

    Ok(Chunks {
        flits,
        padding_bits,
    })
}

/// Packet sizing for [`PayloadPacketizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketSizing {
    /// Smallest number of payload flits per packet
    pub min_len: u32,

    /// Largest number of payload flits per packet
    pub max_len: u32,

    /// Cycles between consecutive packet injections
    pub interval: u64,
}

impl Default for PacketSizing {
    fn default() -> Self {
        Self {
            min_len: 1,
            max_len: 30,
            interval: 2,
        }
    }
}

/// Turns payload flits into header-prefixed packets, one batch per packet.
pub struct PayloadPacketizer<'g> {
    generator: &'g mut TrafficGenerator,
    sizing: PacketSizing,
}

impl<'g> PayloadPacketizer<'g> {
    /// # Errors
    /// `Error::Config` unless `1 <= min_len <= max_len` and
    /// `max_len + 1 <= max_packet_length` (the header is counted).
    pub fn new(generator: &'g mut TrafficGenerator, sizing: PacketSizing) -> Result<Self> {
        let max = generator.codec().layout().max_packet_length();
        if sizing.min_len == 0 || sizing.min_len > sizing.max_len || sizing.max_len >= max {
            return Err(Error::Config(format!(
                "payload packet sizes {}..={} do not fit a packet of at most {max} flits",
                sizing.min_len, sizing.max_len
            )));
        }
        Ok(Self { generator, sizing })
    }

    /// Packetize `chunks` from `src` to `dst`, starting at time `start`.
    ///
    /// Returns the headers in emission order.
    ///
    /// # Errors
    /// `Error::Config` before anything is emitted if the layout has no room
    /// for the final chunk's padding count.
    pub fn emit(
        &mut self,
        src: impl Into<Address>,
        dst: impl Into<Address>,
        chunks: &Chunks,
        start: u64,
    ) -> Result<Vec<PacketDescriptor>> {
        let (src, dst) = (src.into(), dst.into());
        let codec = self.generator.codec().clone();

        let layout = codec.layout();
        if u64::from(chunks.padding_bits) > layout.max_padding() {
            return Err(Error::Config(format!(
                "{} padding bits do not fit the {}-bit padding field; \
                 use coordinate addressing with a fixed id width (e.g. 8)",
                chunks.padding_bits,
                layout.padding_width()
            )));
        }

        let mut headers = Vec::new();
        let mut remaining = chunks.flits.as_slice();
        let mut time = start;
        while !remaining.is_empty() {
            let want = self
                .generator
                .random_len(self.sizing.min_len, self.sizing.max_len) as usize;
            let take = want.min(remaining.len());
            let (body, rest) = remaining.split_at(take);
            remaining = rest;

            let header = self.generator.packet(src, dst, take as u32 + 1)?;
            let padding = if remaining.is_empty() {
                u64::from(chunks.padding_bits)
            } else {
                0
            };

            let mut flits = Vec::with_capacity(take + 1);
            flits.push(codec.encode_padded(&header, padding)?);
            flits.extend_from_slice(body);
            self.generator.push_flits(time, flits)?;

            log::debug!("payload packet {header} at t={time} padding={padding}");
            headers.push(header);
            time += self.sizing.interval;
        }

        log::info!(
            "packetized {} payload flits into {} packets",
            chunks.flits.len(),
            headers.len()
        );
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flit::FlitCodec;
    use crate::generator::FlitExpansion;
    use crate::layout::NocConfig;

    #[test]
    fn test_chunk_exact_multiple() {
        let chunks = chunk_bytes(&[0xFF, 0x00, 0xA5, 0x01], 32).unwrap();
        assert_eq!(chunks.padding_bits, 0);
        assert_eq!(chunks.flits.len(), 1);
        assert_eq!(
            chunks.flits[0].as_str(),
            "11111111000000001010010100000001"
        );
    }

    #[test]
    fn test_chunk_final_padding() {
        let chunks = chunk_bytes(&[0x0F, 0x00, 0x00, 0x00, 0x80], 32).unwrap();
        assert_eq!(chunks.flits.len(), 2);
        assert_eq!(chunks.padding_bits, 24);
        assert_eq!(
            chunks.flits[1].as_str(),
            format!("{}{}", "1".repeat(24), "10000000")
        );
    }

    #[test]
    fn test_chunk_empty() {
        let chunks = chunk_bytes(&[], 32).unwrap();
        assert!(chunks.flits.is_empty());
        assert_eq!(chunks.padding_bits, 0);
    }

    #[test]
    fn test_packetize() {
        let codec = FlitCodec::new(&NocConfig::coordinate(2, 1, 1, 8)).unwrap();
        let mut gen = TrafficGenerator::new(codec.clone(), FlitExpansion::HeaderOnly, 7);

        let bytes: Vec<u8> = (0..=255).collect();
        let chunks = chunk_bytes(&bytes[..203], 32).unwrap();
        assert_eq!(chunks.flits.len(), 51);
        assert_eq!(chunks.padding_bits, 8);

        let sizing = PacketSizing {
            min_len: 4,
            max_len: 10,
            interval: 3,
        };
        let headers = PayloadPacketizer::new(&mut gen, sizing)
            .unwrap()
            .emit(0, 1, &chunks, 10)
            .unwrap();
        let trace = gen.finalize();

        assert_eq!(trace.num_batches(), headers.len());
        assert_eq!(trace.flit_data().len(), chunks.flits.len() + headers.len());
        for ((_, batch), header) in trace.batches().zip(&headers) {
            assert_eq!(batch.len() as u32, header.len);
            assert_eq!(codec.decode(&batch[0]).unwrap(), *header);
        }
        for (i, &t) in trace.inj_time().iter().enumerate() {
            assert_eq!(t, 10 + 3 * i as u64);
        }

        let last = trace.batches().last().unwrap().1[0].clone();
        assert_eq!(codec.padding_of(&last).unwrap(), 8);
        let first = &trace.flit_data()[0];
        assert_eq!(codec.padding_of(first).unwrap(), 0);
    }

    #[test]
    fn test_sizing_must_fit_header() {
        let codec = FlitCodec::new(&NocConfig::coordinate(2, 1, 1, 8)).unwrap();
        let mut gen = TrafficGenerator::new(codec, FlitExpansion::HeaderOnly, 0);
        let sizing = PacketSizing {
            min_len: 1,
            max_len: 31,
            interval: 1,
        };
        assert!(PayloadPacketizer::new(&mut gen, sizing).is_err());
    }

    #[test]
    fn test_padding_needs_padding_field() {
        // flat addressing gives the id every spare bit
        let codec = FlitCodec::new(&NocConfig::default()).unwrap();
        let mut gen = TrafficGenerator::new(codec, FlitExpansion::HeaderOnly, 0);
        let chunks = chunk_bytes(&[1, 2, 3, 4, 5], 32).unwrap();
        assert_eq!(chunks.padding_bits, 24);

        let sizing = PacketSizing {
            min_len: 1,
            max_len: 30,
            interval: 1,
        };
        let result = PayloadPacketizer::new(&mut gen, sizing)
            .unwrap()
            .emit(0, 1, &chunks, 0);
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("coordinate")));
        assert!(gen.finalize().is_empty());

        // whole flits need no padding
        let codec = FlitCodec::new(&NocConfig::default()).unwrap();
        let mut gen = TrafficGenerator::new(codec, FlitExpansion::HeaderOnly, 0);
        let chunks = chunk_bytes(&[1, 2, 3, 4], 32).unwrap();
        let headers = PayloadPacketizer::new(&mut gen, sizing)
            .unwrap()
            .emit(0, 1, &chunks, 0)
            .unwrap();
        assert_eq!(headers.len(), 1);
    }
}
