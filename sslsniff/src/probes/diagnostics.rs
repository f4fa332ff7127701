use std::fmt;

use anyhow::{Context, Result};
use aya::maps::PerCpuArray;
use aya::Ebpf;
use sslsniff_common::{Outcome, OUTCOME_COUNT};

/// Kernel-side correlation counters, summed over all CPUs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeCounters {
    counts: [u64; OUTCOME_COUNT as usize],
}

impl OutcomeCounters {
    #[must_use]
    pub fn get(&self, outcome: Outcome) -> u64 {
        self.counts[outcome as usize]
    }

    pub fn set(&mut self, outcome: Outcome, count: u64) {
        self.counts[outcome as usize] = count;
    }

    /// Returns that reached the correlator, whatever happened to them
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

impl fmt::Display for OutcomeCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for outcome in Outcome::ALL {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{}: {}", outcome.name(), self.get(outcome))?;
        }
        Ok(())
    }
}

/// Read the `STATS` per-CPU counters
///
/// This helps debug event flow: how many returns were emitted, how many had no
/// matching entry, and how many records the ring buffer had no room for.
///
/// # Errors
/// Returns an error if the `STATS` map cannot be accessed
pub fn read_outcome_counters(bpf: &Ebpf) -> Result<OutcomeCounters> {
    let stats: PerCpuArray<_, u64> =
        PerCpuArray::try_from(bpf.map("STATS").context("STATS map not found")?)?;

    let mut counters = OutcomeCounters::default();
    for outcome in Outcome::ALL {
        let per_cpu = stats
            .get(&(outcome as u32), 0)
            .with_context(|| format!("Failed to read {} counter", outcome.name()))?;
        counters.set(outcome, per_cpu.iter().sum());
    }
    Ok(counters)
}
