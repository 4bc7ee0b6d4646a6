//! Reporting for reconciliation runs.
//!
//! [`Summary`] condenses a [`Reconciliation`] into counts; the `print_*`
//! functions render it for humans and [`Summary::export_text`] emits a
//! `key=value` listing for scripts and tests.

use crate::oracle::{CountMismatch, Reconciliation};
use std::time::{Duration, Instant};

/// Aggregate counts of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Summary {
    /// Distinct injected packets (sentinels and markers excluded)
    pub injected: usize,

    /// Flits read from all receive logs
    pub received_flits: usize,

    pub delivered: usize,

    pub lost_packets: usize,

    /// Count mismatches of either direction
    pub lost_flits: usize,

    /// Of `lost_flits`, how many were duplicated rather than partial
    pub duplicated: usize,

    pub wrong_destination: usize,

    pub unexpected: usize,
}

impl Summary {
    pub fn from_reconciliation(result: &Reconciliation) -> Self {
        Self {
            injected: result.injected,
            received_flits: result.received_flits,
            delivered: result.delivered.len(),
            lost_packets: result.lost_packets.len(),
            lost_flits: result.lost_flits.len(),
            duplicated: result
                .lost_flits
                .iter()
                .filter(|l| l.kind == CountMismatch::Duplicated)
                .count(),
            wrong_destination: result.wrong_destination.len(),
            unexpected: result.unexpected.len(),
        }
    }

    /// Fraction of injected packets delivered intact.
    ///
    /// Returns 1.0 if nothing was injected.
    pub fn delivery_rate(&self) -> f64 {
        if self.injected == 0 {
            1.0
        } else {
            self.delivered as f64 / self.injected as f64
        }
    }

    pub fn passed(&self) -> bool {
        self.lost_packets == 0
            && self.lost_flits == 0
            && self.wrong_destination == 0
            && self.unexpected == 0
    }

    /// Export as `key=value` lines.
    pub fn export_text(&self) -> String {
        format!(
            "injected={}\n\
             received_flits={}\n\
             delivered={}\n\
             lost_packets={}\n\
             lost_flits={}\n\
             duplicated={}\n\
             wrong_destination={}\n\
             unexpected={}\n\
             delivery_rate={:.4}\n",
            self.injected,
            self.received_flits,
            self.delivered,
            self.lost_packets,
            self.lost_flits,
            self.duplicated,
            self.wrong_destination,
            self.unexpected,
            self.delivery_rate(),
        )
    }
}

/// Wall-clock timer for a check run.
#[derive(Debug, Clone, Copy)]
pub struct RunTimer {
    start: Instant,
}

impl RunTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Print every finding with its decoded fields.
pub fn print_findings(result: &Reconciliation) {
    if !result.lost_packets.is_empty() {
        println!("=== Lost packets ===");
        for (i, lost) in result.lost_packets.iter().enumerate() {
            println!("{i} {} {}", lost.flit, lost.descriptor);
        }
        println!();
    }

    if !result.lost_flits.is_empty() {
        println!("=== Lost flits ===");
        for (i, lost) in result.lost_flits.iter().enumerate() {
            println!(
                "{i} {} {} recv {} of {} ({:?})",
                lost.finding.flit, lost.finding.descriptor, lost.observed, lost.expected, lost.kind
            );
        }
        println!();
    }

    if !result.wrong_destination.is_empty() {
        println!("=== Wrong destination ===");
        for wrong in &result.wrong_destination {
            let decoded = wrong
                .decoded_node
                .map_or_else(|| "off-grid".to_string(), |n| n.to_string());
            println!(
                "node {} vc {}: {} {} (dst node {decoded})",
                wrong.node, wrong.channel, wrong.finding.flit, wrong.finding.descriptor
            );
        }
        println!();
    }

    if !result.unexpected.is_empty() {
        println!("=== Unexpected ===");
        for f in &result.unexpected {
            println!("{} {}", f.flit, f.descriptor);
        }
        println!();
    }
}

/// Print the counts.
pub fn print_summary(summary: &Summary, elapsed: Duration) {
    println!("\n=== Reconciliation Summary ===");
    println!("Duration: {} ms", elapsed.as_millis());
    println!();
    println!("Injected packets:     {}", summary.injected);
    println!("Received flits:       {}", summary.received_flits);
    println!(
        "Delivered correctly:  {} ({:.2}%)",
        summary.delivered,
        summary.delivery_rate() * 100.0
    );
    println!("Lost packets:         {}", summary.lost_packets);
    println!(
        "Lost flits:           {} ({} duplicated)",
        summary.lost_flits, summary.duplicated
    );
    println!("Wrong destination:    {}", summary.wrong_destination);
    println!("Unexpected:           {}", summary.unexpected);
    println!();
}

/// Print just the verdict.
pub fn print_result(summary: &Summary) {
    if summary.passed() {
        println!("✓ All {} packets delivered", summary.injected);
    } else {
        println!(
            "✗ Check failed: {} lost, {} count mismatches, {} misrouted, {} unexpected",
            summary.lost_packets, summary.lost_flits, summary.wrong_destination, summary.unexpected
        );
    }
}
