//! Loopback interconnect with injected delivery faults.
//!
//! Stands in for the hardware simulation when checking the checker: it
//! consumes a trace and produces the receive logs an ideal network-on-chip
//! would, then damages them in a deterministic way.
//!
//! # Simulated Effects
//!
//! - **Loss**: every flit of a packet disappears
//! - **Truncation**: one flit of a multi-flit packet disappears
//! - **Misrouting**: the packet lands at a node other than its destination
//!
//! Each header delivers `len` copies of itself, as the network interfaces of
//! the testbench do. Sentinels and time markers are consumed by the network
//! and never delivered.
//!
//! # Determinism
//!
//! All randomness comes from a seeded ChaCha8 RNG. Given the same seed and
//! the same trace, the logs are bit-identical.

use crate::error::{Error, Result};
use crate::flit::{Flit, FlitCodec};
use crate::generator::FlitExpansion;
use crate::oracle::ReceiveLog;
use crate::trace::Trace;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Fault rates for [`LoopbackInterconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeliveryConfig {
    /// Probability that a whole packet is lost [0.0, 1.0]
    pub loss_rate: f64,

    /// Probability that one flit of a packet is lost [0.0, 1.0]
    pub truncate_rate: f64,

    /// Probability that a packet is delivered to the wrong node [0.0, 1.0]
    pub misroute_rate: f64,

    /// Random seed for determinism
    pub seed: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self::perfect(0)
    }
}

impl DeliveryConfig {
    /// No faults at all.
    pub fn perfect(seed: u64) -> Self {
        Self {
            loss_rate: 0.0,
            truncate_rate: 0.0,
            misroute_rate: 0.0,
            seed,
        }
    }

    /// Moderate faults of every kind.
    pub fn default_with_seed(seed: u64) -> Self {
        Self {
            loss_rate: 0.02,
            truncate_rate: 0.02,
            misroute_rate: 0.01,
            seed,
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("loss_rate", self.loss_rate),
            ("truncate_rate", self.truncate_rate),
            ("misroute_rate", self.misroute_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(Error::Config(format!("{name} must be in [0, 1], got {rate}")));
            }
        }
        Ok(())
    }
}

/// Statistics about what the loopback did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopbackStats {
    /// Packets seen in the trace
    pub packets_sent: u64,

    pub packets_dropped: u64,

    pub packets_truncated: u64,

    pub packets_misrouted: u64,

    /// Flits written to a node other than their destination
    pub flits_misrouted: u64,

    /// Flits written to receive logs
    pub flits_delivered: u64,
}

impl LoopbackStats {
    /// Compute packet loss rate.
    pub fn loss_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_dropped as f64 / self.packets_sent as f64
        }
    }
}

/// Deterministic, fault-injecting stand-in for the interconnect.
#[derive(Debug)]
pub struct LoopbackInterconnect<'c> {
    codec: &'c FlitCodec,
    config: DeliveryConfig,
    rng: ChaCha8Rng,
    logs: BTreeMap<(u32, u32), Vec<Flit>>,
    stats: LoopbackStats,
}

impl<'c> LoopbackInterconnect<'c> {
    /// # Errors
    /// `Error::Config` if a rate lies outside `[0, 1]`.
    pub fn new(codec: &'c FlitCodec, config: DeliveryConfig) -> Result<Self> {
        config.validate()?;
        let vcs = codec.config().virtual_channels;
        let logs = (0..codec.grid().num_nodes())
            .flat_map(|node| (0..vcs).map(move |vc| ((node, vc), Vec::new())))
            .collect();

        Ok(Self {
            codec,
            config,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            logs,
            stats: LoopbackStats::default(),
        })
    }

    /// Deliver every packet of `trace`.
    ///
    /// With [`FlitExpansion::Replicated`] a run of identical consecutive
    /// flits within a batch is one packet.
    ///
    /// # Errors
    /// Propagates decode errors for flits that are not headers.
    pub fn inject(&mut self, trace: &Trace, expansion: FlitExpansion) -> Result<()> {
        let markers: BTreeSet<&Flit> = trace.markers().iter().collect();

        for (time, batch) in trace.batches() {
            let mut i = 0;
            while i < batch.len() {
                let flit = &batch[i];
                let run = batch[i..].iter().take_while(|&f| f == flit).count();
                let packets = match expansion {
                    FlitExpansion::HeaderOnly => run,
                    FlitExpansion::Replicated => 1,
                };
                i += run;

                if flit.is_sentinel() || markers.contains(flit) {
                    continue;
                }
                for _ in 0..packets {
                    let copies = match expansion {
                        FlitExpansion::HeaderOnly => None,
                        FlitExpansion::Replicated => Some(run),
                    };
                    self.deliver(time, flit, copies)?;
                }
            }
        }

        log::info!(
            "loopback: {} packets, {} dropped, {} truncated, {} misrouted",
            self.stats.packets_sent,
            self.stats.packets_dropped,
            self.stats.packets_truncated,
            self.stats.packets_misrouted
        );
        Ok(())
    }

    pub fn stats(&self) -> LoopbackStats {
        self.stats
    }

    /// One log per (node, channel), empty ones included, in node order.
    pub fn into_logs(self) -> Vec<ReceiveLog> {
        self.logs
            .into_iter()
            .map(|((node, channel), flits)| ReceiveLog {
                node,
                channel,
                flits,
            })
            .collect()
    }

    fn deliver(&mut self, time: u64, flit: &Flit, copies: Option<usize>) -> Result<()> {
        self.stats.packets_sent += 1;
        let desc = self.codec.decode(flit)?;
        let mut copies = copies.unwrap_or(desc.len as usize);

        if self.roll(self.config.loss_rate) {
            log::debug!("t={time}: dropping {desc}");
            self.stats.packets_dropped += 1;
            return Ok(());
        }
        if copies > 1 && self.roll(self.config.truncate_rate) {
            log::debug!("t={time}: truncating {desc}");
            self.stats.packets_truncated += 1;
            copies -= 1;
        }

        let nodes = self.codec.grid().num_nodes();
        let mut node = match self.codec.destination_node(&desc) {
            Some(node) => node,
            // Off-grid headers go nowhere in hardware either.
            None => {
                self.stats.packets_dropped += 1;
                return Ok(());
            }
        };
        if nodes > 1 && self.roll(self.config.misroute_rate) {
            let other = self.rng.gen_range(0..nodes - 1);
            node = if other >= node { other + 1 } else { other };
            log::debug!("t={time}: misrouting {desc} to node {node}");
            self.stats.packets_misrouted += 1;
            self.stats.flits_misrouted += copies as u64;
        }

        let channel = self
            .rng
            .gen_range(0..self.codec.config().virtual_channels);
        self.logs
            .entry((node, channel))
            .or_default()
            .extend(std::iter::repeat(flit.clone()).take(copies));
        self.stats.flits_delivered += copies as u64;
        Ok(())
    }

    fn roll(&mut self, rate: f64) -> bool {
        rate > 0.0 && self.rng.gen::<f64>() < rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::TrafficGenerator;
    use crate::layout::NocConfig;
    use crate::oracle::Oracle;

    fn all_pairs_trace(codec: &FlitCodec, expansion: FlitExpansion) -> Trace {
        let mut gen = TrafficGenerator::new(codec.clone(), expansion, 3);
        let mut pkts = gen.all_pairs(4).unwrap();
        gen.shuffle(&mut pkts);
        for (t, chunk) in pkts.chunks(16).enumerate() {
            gen.emit_batch(t as u64 * 10, chunk).unwrap();
        }
        gen.finalize()
    }

    #[test]
    fn test_perfect_loopback_is_clean() {
        let codec = FlitCodec::new(&NocConfig::default()).unwrap();
        for expansion in [FlitExpansion::HeaderOnly, FlitExpansion::Replicated] {
            let trace = all_pairs_trace(&codec, expansion);
            let mut net = LoopbackInterconnect::new(&codec, DeliveryConfig::perfect(1)).unwrap();
            net.inject(&trace, expansion).unwrap();
            assert_eq!(net.stats().packets_sent, 240);
            assert_eq!(net.stats().flits_delivered, 960);

            let logs = net.into_logs();
            assert_eq!(logs.len(), 32);
            let result = Oracle::new(&codec).reconcile(&trace, &logs).unwrap();
            assert!(result.is_clean());
            assert_eq!(result.delivered.len(), 240);
        }
    }

    #[test]
    fn test_faults_are_detected() {
        let codec = FlitCodec::new(&NocConfig::default()).unwrap();
        let trace = all_pairs_trace(&codec, FlitExpansion::HeaderOnly);
        let config = DeliveryConfig {
            loss_rate: 0.1,
            truncate_rate: 0.1,
            misroute_rate: 0.1,
            seed: 9,
        };
        let mut net = LoopbackInterconnect::new(&codec, config).unwrap();
        net.inject(&trace, FlitExpansion::HeaderOnly).unwrap();
        let stats = net.stats();
        let result = Oracle::new(&codec)
            .reconcile(&trace, &net.into_logs())
            .unwrap();

        assert_eq!(result.lost_packets.len() as u64, stats.packets_dropped);
        assert_eq!(result.lost_flits.len() as u64, stats.packets_truncated);
        assert_eq!(result.wrong_destination.len() as u64, stats.flits_misrouted);
        assert!(stats.packets_dropped > 0 && stats.packets_misrouted > 0);
    }

    #[test]
    fn test_determinism() {
        let codec = FlitCodec::new(&NocConfig::default()).unwrap();
        let trace = all_pairs_trace(&codec, FlitExpansion::HeaderOnly);
        let run = || {
            let mut net =
                LoopbackInterconnect::new(&codec, DeliveryConfig::default_with_seed(12345))
                    .unwrap();
            net.inject(&trace, FlitExpansion::HeaderOnly).unwrap();
            (net.stats(), net.into_logs())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_invalid_rate_rejected() {
        let codec = FlitCodec::new(&NocConfig::default()).unwrap();
        let config = DeliveryConfig {
            loss_rate: 1.5,
            ..DeliveryConfig::perfect(0)
        };
        assert!(LoopbackInterconnect::new(&codec, config).is_err());
    }
}
