//! The injected-traffic trace.
//!
//! A trace is three parallel sequences, exactly as the hardware testbench
//! consumes them, plus the list of time-marker flits emitted along the way:
//!
//! ```text
//! flit_data:  f0 f1 f2 | f3 | f4 f5 ...     one entry per flit
//! inj_time:   t0       | t1 | t2 ...        one entry per batch
//! batch_len:  3        | 1  | 2 ...         one entry per batch
//! markers:    flits that carry a batch time, not a packet
//! ```
//!
//! # Invariants
//!
//! - `sum(batch_len) == flit_data.len()`
//! - `inj_time.len() == batch_len.len()`
//! - every `batch_len` is at least 1
//!
//! [`TraceBuilder`] only appends whole batches, never at an earlier time, and
//! is consumed by [`TraceBuilder::finalize`], so a finished [`Trace`] is never
//! appended to. Traces read back from disk may step back in time: deadlock
//! benches write their drain batch at time 0 after the timed batches.

use crate::error::{GenerationError, Result, TraceError};
use crate::flit::Flit;
use std::collections::BTreeSet;

/// An immutable, validated trace.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Trace {
    flit_data: Vec<Flit>,
    inj_time: Vec<u64>,
    batch_len: Vec<usize>,
    markers: Vec<Flit>,
}

impl Trace {
    /// Reassemble a trace from its parts, e.g. after reading artifacts back.
    ///
    /// Injection times that go backwards are accepted with a warning.
    ///
    /// # Errors
    /// `TraceError::Inconsistent` if any invariant above does not hold, or if
    /// a marker does not occur in `flit_data`.
    pub fn from_parts(
        flit_data: Vec<Flit>,
        inj_time: Vec<u64>,
        batch_len: Vec<usize>,
        markers: Vec<Flit>,
    ) -> Result<Self> {
        if inj_time.len() != batch_len.len() {
            return Err(TraceError::Inconsistent(format!(
                "{} injection times but {} batch lengths",
                inj_time.len(),
                batch_len.len()
            ))
            .into());
        }

        let total: usize = batch_len.iter().sum();
        if total != flit_data.len() {
            return Err(TraceError::Inconsistent(format!(
                "batch lengths sum to {total} but there are {} flits",
                flit_data.len()
            ))
            .into());
        }

        if let Some(i) = batch_len.iter().position(|&n| n == 0) {
            return Err(TraceError::Inconsistent(format!("batch {i} is empty")).into());
        }

        if let Some(w) = inj_time.windows(2).find(|w| w[1] < w[0]) {
            log::warn!("injection time {} follows {}", w[1], w[0]);
        }

        if let Some(m) = markers.iter().find(|m| !flit_data.contains(m)) {
            return Err(TraceError::Inconsistent(format!("marker {m} was never injected")).into());
        }

        Ok(Self {
            flit_data,
            inj_time,
            batch_len,
            markers,
        })
    }

    pub fn flit_data(&self) -> &[Flit] {
        &self.flit_data
    }

    pub fn inj_time(&self) -> &[u64] {
        &self.inj_time
    }

    pub fn batch_len(&self) -> &[usize] {
        &self.batch_len
    }

    /// Time-marker flits, in emission order.
    pub fn markers(&self) -> &[Flit] {
        &self.markers
    }

    /// Number of batches.
    pub fn num_batches(&self) -> usize {
        self.batch_len.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flit_data.is_empty()
    }

    /// Iterate batches as `(time, flits)`.
    pub fn batches(&self) -> impl Iterator<Item = (u64, &[Flit])> + '_ {
        let flits = self.flit_data.as_slice();
        let mut start = 0;
        self.inj_time
            .iter()
            .zip(&self.batch_len)
            .map(move |(&time, &len)| {
                let batch = &flits[start..start + len];
                start += len;
                (time, batch)
            })
    }

    /// Distinct injected flit values.
    pub fn distinct_flits(&self) -> BTreeSet<&Flit> {
        self.flit_data.iter().collect()
    }
}

/// Append-only builder for a [`Trace`].
#[derive(Debug, Default)]
pub struct TraceBuilder {
    trace: Trace,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one batch.
    ///
    /// # Errors
    /// - `GenerationError::EmptyBatch` if `flits` is empty
    /// - `GenerationError::NonMonotonicTime` if `time` precedes the last batch
    pub fn push_batch(&mut self, time: u64, flits: Vec<Flit>) -> Result<()> {
        if flits.is_empty() {
            return Err(GenerationError::EmptyBatch { time }.into());
        }
        if let Some(previous) = self.last_time() {
            if time < previous {
                return Err(GenerationError::NonMonotonicTime { previous, time }.into());
            }
        }

        self.trace.inj_time.push(time);
        self.trace.batch_len.push(flits.len());
        self.trace.flit_data.extend(flits);
        Ok(())
    }

    /// Record a flit of the most recent batch as a time marker.
    pub(crate) fn register_marker(&mut self, marker: Flit) {
        self.trace.markers.push(marker);
    }

    /// Injection time of the most recent batch.
    pub fn last_time(&self) -> Option<u64> {
        self.trace.inj_time.last().copied()
    }

    pub fn num_batches(&self) -> usize {
        self.trace.num_batches()
    }

    pub fn num_flits(&self) -> usize {
        self.trace.flit_data.len()
    }

    /// Finish building. The builder is consumed.
    pub fn finalize(self) -> Trace {
        self.trace
    }
}
