//! Scripted traffic scenarios.
//!
//! Each scenario drives a [`TrafficGenerator`] and leaves the finished trace
//! to the caller:
//!
//! - `random`: batches of uniformly random packets
//! - `all-to-all`: every ordered pair once, shuffled into batches
//! - `deadlock`: hotspot and ring patterns on the 4×4 mesh, one marked batch each
//! - `payload`: a byte payload cut into header-prefixed packets
//!
//! Every scenario except `payload` ends with the drain terminator when
//! `drain` is set.

use crate::config::GenerateConfig;
use crate::input_gen;
use anyhow::{ensure, Context};
use clap::ValueEnum;
use flitcheck_core::flit::Sentinel;
use flitcheck_core::generator::{FlitExpansion, TrafficGenerator};
use flitcheck_core::payload::{chunk_bytes, PacketSizing, PayloadPacketizer};
use serde::{Deserialize, Serialize};

/// Which traffic to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    #[default]
    Random,
    AllToAll,
    Deadlock,
    Payload,
}

impl Scenario {
    /// Expansion the matching testbench expects.
    pub fn default_expansion(self) -> FlitExpansion {
        match self {
            Scenario::Random | Scenario::AllToAll => FlitExpansion::Replicated,
            Scenario::Deadlock | Scenario::Payload => FlitExpansion::HeaderOnly,
        }
    }
}

/// Populate `gen` with `scenario`.
pub fn run(scenario: Scenario, gen: &mut TrafficGenerator, params: &GenerateConfig) -> anyhow::Result<()> {
    log::info!("generating scenario {scenario:?}");
    match scenario {
        Scenario::Random => random(gen, params)?,
        Scenario::AllToAll => all_to_all(gen, params)?,
        Scenario::Deadlock => deadlock(gen)?,
        Scenario::Payload => return payload(gen, params),
    }
    if params.drain {
        gen.emit_sentinel(Sentinel::Drain)?;
    }
    Ok(())
}

fn random(gen: &mut TrafficGenerator, params: &GenerateConfig) -> anyhow::Result<()> {
    for batch in 0..params.batches {
        let pkts = gen.random_packets(params.packets_per_batch, params.max_len)?;
        gen.emit_batch(batch as u64 * params.interval, &pkts)?;
    }
    Ok(())
}

fn all_to_all(gen: &mut TrafficGenerator, params: &GenerateConfig) -> anyhow::Result<()> {
    ensure!(params.packets_per_batch > 0, "packets_per_batch must be >= 1");
    let mut pkts = gen.all_pairs(params.max_len)?;
    gen.shuffle(&mut pkts);
    for (batch, chunk) in pkts.chunks(params.packets_per_batch).enumerate() {
        gen.emit_batch(batch as u64 * params.interval, chunk)?;
    }
    Ok(())
}

/// Deadlock traffic for the 4×4 mesh:
///
/// ```text
/// |12|13|14|15|
/// | 8| 9|10|11|     t=0    1, 5, 8 -> 4
/// | 4| 5| 6| 7|     t=100  1, 4, 6, 9 -> 5
/// | 0| 1| 2| 3|     t=200  5 -> 6 -> 10 -> 9 -> 5
///                   t=300  5, 6, 2, 3 -> 0 (short packets)
/// ```
fn deadlock(gen: &mut TrafficGenerator) -> anyhow::Result<()> {
    let pkts = gen.hotspot(&[1u32, 5, 8], 4u32, 31)?;
    gen.emit_marked_batch(0, &pkts)?;

    let pkts = gen.hotspot(&[1u32, 4, 6, 9], 5u32, 31)?;
    gen.emit_marked_batch(100, &pkts)?;

    let pkts = gen.ring(&[5u32, 6, 10, 9], 31)?;
    gen.emit_marked_batch(200, &pkts)?;

    let pkts = vec![
        gen.packet(5u32, 0u32, 5)?,
        gen.packet(6u32, 0u32, 3)?,
        gen.packet(2u32, 0u32, 5)?,
        gen.packet(3u32, 0u32, 3)?,
    ];
    gen.emit_marked_batch(300, &pkts)?;
    Ok(())
}

fn payload(gen: &mut TrafficGenerator, params: &GenerateConfig) -> anyhow::Result<()> {
    let cfg = &params.payload;
    let bytes = input_gen::load_payload(cfg.file.as_deref(), params.seed, cfg.sample_bytes)
        .with_context(|| format!("reading payload {:?}", cfg.file))?;
    let chunks = chunk_bytes(&bytes, gen.codec().flit_width())?;
    log::info!(
        "payload: {} bytes -> {} flits, {} padding bits",
        bytes.len(),
        chunks.flits.len(),
        chunks.padding_bits
    );

    let sizing = PacketSizing {
        min_len: cfg.min_len,
        max_len: cfg.max_len,
        interval: params.interval,
    };
    PayloadPacketizer::new(gen, sizing)?.emit(cfg.src, cfg.dst, &chunks, 0)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flitcheck_core::flit::FlitCodec;
    use flitcheck_core::layout::NocConfig;

    fn generator(config: &NocConfig, scenario: Scenario) -> TrafficGenerator {
        let codec = FlitCodec::new(config).unwrap();
        TrafficGenerator::new(codec, scenario.default_expansion(), 42)
    }

    #[test]
    fn test_deadlock_script() {
        let mut gen = generator(&NocConfig::default(), Scenario::Deadlock);
        run(Scenario::Deadlock, &mut gen, &GenerateConfig::default()).unwrap();
        let trace = gen.finalize();

        // marker + packets per batch, then the drain terminator
        assert_eq!(trace.batch_len(), &[4, 5, 5, 5, 1]);
        assert_eq!(trace.inj_time(), &[0, 100, 200, 300, 300]);
        assert_eq!(trace.markers().len(), 4);
    }

    #[test]
    fn test_random_scenario() {
        let params = GenerateConfig {
            batches: 3,
            packets_per_batch: 4,
            max_len: 2,
            interval: 7,
            drain: false,
            ..GenerateConfig::default()
        };
        let mut gen = generator(&NocConfig::default(), Scenario::Random);
        run(Scenario::Random, &mut gen, &params).unwrap();
        let trace = gen.finalize();
        assert_eq!(trace.inj_time(), &[0, 7, 14]);
        assert!(trace.batch_len().iter().all(|&n| (4..=8).contains(&n)));
    }

    #[test]
    fn test_all_to_all_scenario() {
        let params = GenerateConfig {
            packets_per_batch: 16,
            max_len: 1,
            ..GenerateConfig::default()
        };
        let mut gen = generator(&NocConfig::default(), Scenario::AllToAll);
        run(Scenario::AllToAll, &mut gen, &params).unwrap();
        let trace = gen.finalize();
        // 240 packets in 15 batches plus the drain batch
        assert_eq!(trace.num_batches(), 16);
        assert_eq!(trace.flit_data().len(), 241);
    }

    #[test]
    fn test_payload_scenario() {
        let config = NocConfig::coordinate(2, 1, 1, 8);
        let mut gen = generator(&config, Scenario::Payload);
        let mut params = GenerateConfig::default();
        params.payload.sample_bytes = 500;
        params.payload.src = 0;
        params.payload.dst = 1;
        run(Scenario::Payload, &mut gen, &params).unwrap();
        let trace = gen.finalize();
        // 4000 bits -> 125 payload flits, plus one header per packet
        assert_eq!(trace.flit_data().len(), 125 + trace.num_batches());
    }

    #[test]
    fn test_deadlock_needs_16_nodes() {
        let mut gen = generator(&NocConfig::flat(2, 2, 1), Scenario::Deadlock);
        assert!(run(Scenario::Deadlock, &mut gen, &GenerateConfig::default()).is_err());
    }
}
