//! Delivery reconciliation.
//!
//! The oracle compares the injected [`Trace`] with what the interconnect
//! actually delivered and classifies every distinct header value.
//!
//! # Algorithm
//!
//! ```text
//! excluded  = {all-zero, all-one} ∪ trace markers
//! received  = multiset of every flit in every receive log
//!
//! wrong_destination = flits at node i whose dst != i
//! lost_packets      = distinct(injected) - received - excluded
//! lost_flits        = received values v with count(v) != len(v)
//! delivered         = distinct(injected) - excluded - lost_packets - lost_flits
//! unexpected        = received values never injected
//! ```
//!
//! Each check runs independently over the same inputs. None of the findings
//! is an error: a failing scenario is supposed to produce them. The only
//! errors are malformed flits, which invalidate every count.
//!
//! # Determinism
//!
//! All result lists are sorted by flit value (wrong destinations by node,
//! channel and position), so two runs over the same inputs report
//! identically.

use crate::error::Result;
use crate::flit::{Flit, FlitCodec, PacketDescriptor};
use crate::trace::Trace;
use std::collections::{BTreeMap, BTreeSet};

/// Flits observed at one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiveLog {
    /// Destination node (flat index)
    pub node: u32,

    /// Virtual channel
    pub channel: u32,

    /// Flits in arrival order
    pub flits: Vec<Flit>,
}

impl ReceiveLog {
    pub fn new(node: u32, channel: u32, flits: Vec<Flit>) -> Self {
        Self {
            node,
            channel,
            flits,
        }
    }
}

/// A flit together with its decoded header.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Finding {
    pub flit: Flit,
    pub descriptor: PacketDescriptor,
}

/// Direction of a count mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMismatch {
    /// Fewer copies than the length field promises
    Partial,
    /// More copies than the length field promises
    Duplicated,
}

/// A header value received a number of times other than its length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostFlit {
    pub finding: Finding,

    /// Copies the length field promises
    pub expected: u32,

    /// Copies actually received across all logs
    pub observed: usize,

    pub kind: CountMismatch,
}

/// A flit that arrived at a node other than its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrongDestination {
    pub finding: Finding,

    /// Node whose log contained the flit
    pub node: u32,

    pub channel: u32,

    /// Decoded destination as a node index, `None` if it lies off the grid
    pub decoded_node: Option<u32>,
}

/// Everything one reconciliation run found.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reconciliation {
    /// Distinct injected values, excluding sentinels and markers
    pub injected: usize,

    /// Total received flits, sentinels and markers included
    pub received_flits: usize,

    /// Distinct injected values delivered with the right count
    pub delivered: Vec<Finding>,

    /// Injected values never received
    pub lost_packets: Vec<Finding>,

    /// Received values whose count disagrees with their length
    pub lost_flits: Vec<LostFlit>,

    /// Flits found in the wrong node's log
    pub wrong_destination: Vec<WrongDestination>,

    /// Received values that were never injected
    pub unexpected: Vec<Finding>,
}

impl Reconciliation {
    /// No loss, no count mismatch, no misroute and nothing unexpected.
    pub fn is_clean(&self) -> bool {
        self.lost_packets.is_empty()
            && self.lost_flits.is_empty()
            && self.wrong_destination.is_empty()
            && self.unexpected.is_empty()
    }
}

/// Stateless reconciliation over one codec configuration.
#[derive(Debug, Clone, Copy)]
pub struct Oracle<'c> {
    codec: &'c FlitCodec,
}

impl<'c> Oracle<'c> {
    pub fn new(codec: &'c FlitCodec) -> Self {
        Self { codec }
    }

    /// Reconcile `trace` against `logs`.
    ///
    /// # Errors
    /// `CodecError::MalformedFlit` if any injected or received flit has the
    /// wrong width. Findings are never errors.
    pub fn reconcile(&self, trace: &Trace, logs: &[ReceiveLog]) -> Result<Reconciliation> {
        let received_flits = logs.iter().flat_map(|l| l.flits.iter());
        self.check_widths(trace, received_flits.clone())?;

        let excluded: BTreeSet<&Flit> = trace.markers().iter().collect();
        let is_excluded = |f: &Flit| f.is_sentinel() || excluded.contains(f);
        let injected = injected_set(trace, &is_excluded);
        let received = count(received_flits);

        let wrong_destination = self.wrong_destinations(logs, &is_excluded)?;

        let lost_packets = injected
            .iter()
            .filter(|f| !received.contains_key(*f))
            .map(|f| self.finding(f))
            .collect::<Result<Vec<_>>>()?;

        let mut lost_flits = Vec::new();
        for (&flit, &observed) in received.iter().filter(|&(&f, _)| !is_excluded(f)) {
            let finding = self.finding(flit)?;
            let expected = finding.descriptor.len;
            if observed != expected as usize {
                let kind = if observed < expected as usize {
                    CountMismatch::Partial
                } else {
                    CountMismatch::Duplicated
                };
                lost_flits.push(LostFlit {
                    finding,
                    expected,
                    observed,
                    kind,
                });
            }
        }

        let mismatched: BTreeSet<&Flit> = lost_flits.iter().map(|l| &l.finding.flit).collect();
        let delivered = injected
            .iter()
            .filter(|f| received.contains_key(*f) && !mismatched.contains(*f))
            .map(|f| self.finding(f))
            .collect::<Result<Vec<_>>>()?;

        let unexpected = received
            .keys()
            .filter(|&&f| !is_excluded(f) && !injected.contains(f))
            .map(|f| self.finding(f))
            .collect::<Result<Vec<_>>>()?;

        let result = Reconciliation {
            injected: injected.len(),
            received_flits: received.values().sum(),
            delivered,
            lost_packets,
            lost_flits,
            wrong_destination,
            unexpected,
        };

        log_findings(&result);
        Ok(result)
    }

    /// Reconcile `trace` against a single stream of received flits, such as
    /// a timestamped receive log, that does not say which node took each
    /// flit.
    ///
    /// Only packet loss and unexpected flits are accounted: destinations and
    /// per-packet flit counts cannot be checked without the receiving node,
    /// so `wrong_destination` and `lost_flits` stay empty.
    ///
    /// # Errors
    /// `CodecError::MalformedFlit` if any injected or received flit has the
    /// wrong width.
    pub fn reconcile_stream<'a, I>(&self, trace: &Trace, flits: I) -> Result<Reconciliation>
    where
        I: IntoIterator<Item = &'a Flit>,
    {
        let flits: Vec<&Flit> = flits.into_iter().collect();
        self.check_widths(trace, flits.iter().copied())?;

        let excluded: BTreeSet<&Flit> = trace.markers().iter().collect();
        let is_excluded = |f: &Flit| f.is_sentinel() || excluded.contains(f);
        let injected = injected_set(trace, &is_excluded);
        let received = count(flits);

        let (delivered, lost): (Vec<&Flit>, Vec<&Flit>) =
            injected.iter().copied().partition(|f| received.contains_key(*f));

        let result = Reconciliation {
            injected: injected.len(),
            received_flits: received.values().sum(),
            delivered: delivered.into_iter().map(|f| self.finding(f)).collect::<Result<_>>()?,
            lost_packets: lost.into_iter().map(|f| self.finding(f)).collect::<Result<_>>()?,
            lost_flits: Vec::new(),
            wrong_destination: Vec::new(),
            unexpected: received
                .keys()
                .filter(|&&f| !is_excluded(f) && !injected.contains(f))
                .map(|f| self.finding(f))
                .collect::<Result<_>>()?,
        };

        log_findings(&result);
        Ok(result)
    }

    fn check_widths<'a>(
        &self,
        trace: &'a Trace,
        received: impl Iterator<Item = &'a Flit>,
    ) -> Result<()> {
        let width = self.codec.flit_width() as usize;
        for flit in trace.flit_data().iter().chain(received) {
            if flit.width() != width {
                self.codec.decode(flit)?;
            }
        }
        Ok(())
    }

    fn wrong_destinations(
        &self,
        logs: &[ReceiveLog],
        is_excluded: &impl Fn(&Flit) -> bool,
    ) -> Result<Vec<WrongDestination>> {
        let mut ordered: Vec<&ReceiveLog> = logs.iter().collect();
        ordered.sort_by_key(|l| (l.node, l.channel));

        let mut wrong = Vec::new();
        for recv in ordered {
            for flit in recv.flits.iter().filter(|&f| !is_excluded(f)) {
                let finding = self.finding(flit)?;
                let decoded_node = self.codec.destination_node(&finding.descriptor);
                if decoded_node != Some(recv.node) {
                    wrong.push(WrongDestination {
                        finding,
                        node: recv.node,
                        channel: recv.channel,
                        decoded_node,
                    });
                }
            }
        }
        Ok(wrong)
    }

    fn finding(&self, flit: &Flit) -> Result<Finding> {
        Ok(Finding {
            flit: flit.clone(),
            descriptor: self.codec.decode(flit)?,
        })
    }
}

fn injected_set<'a>(trace: &'a Trace, is_excluded: &impl Fn(&Flit) -> bool) -> BTreeSet<&'a Flit> {
    trace.flit_data().iter().filter(|&f| !is_excluded(f)).collect()
}

/// Multiset of received flits.
fn count<'a>(flits: impl IntoIterator<Item = &'a Flit>) -> BTreeMap<&'a Flit, usize> {
    let mut received = BTreeMap::new();
    for flit in flits {
        *received.entry(flit).or_default() += 1;
    }
    received
}

fn log_findings(result: &Reconciliation) {
    log::info!(
        "reconciled {} injected packets: {} delivered, {} lost, {} count mismatches, {} misrouted",
        result.injected,
        result.delivered.len(),
        result.lost_packets.len(),
        result.lost_flits.len(),
        result.wrong_destination.len()
    );
    for lost in &result.lost_packets {
        log::warn!("lost packet {} ({})", lost.flit, lost.descriptor);
    }
    for lost in &result.lost_flits {
        log::warn!(
            "packet {} received {} of {} flits",
            lost.finding.descriptor,
            lost.observed,
            lost.expected
        );
    }
    for wrong in &result.wrong_destination {
        log::warn!(
            "node {} vc {} received {} bound for {}",
            wrong.node,
            wrong.channel,
            wrong.finding.flit,
            wrong.finding.descriptor.dst
        );
    }
}
