//! Cache Statistics Module
//!
//! Counts what conditional writes did with the entry they found.

use serde::Serialize;

/// What a conditional write did with its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    /// A fresh entry was already cached and won over the new value
    Kept,
    /// The key was vacant, or its stale entry was evicted, and the new value went in
    Stored,
}

// == Cache Stats ==
/// Write outcomes since the cache was created or its stats were reset.
///
/// Plain reads (`get`, `has`) and unconditional `set` are not counted; only
/// `add`, `remember` and their variants are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Writes that found a fresh entry and returned it unchanged
    pub hits: u64,
    /// Writes that stored their value, running its producer if it had one
    pub misses: u64,
    /// Entries dropped because their staleness record reported stale
    pub stale_evictions: u64,
    /// Entries cached when the snapshot was taken
    pub total_entries: usize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of conditional writes seen.
    pub fn writes(&self) -> u64 {
        self.hits + self.misses
    }

    /// Share of conditional writes answered by a fresh entry, in `0.0..=1.0`.
    ///
    /// A high rate means producers rarely had to run. Returns 0.0 before the
    /// first write.
    pub fn hit_rate(&self) -> f64 {
        match self.writes() {
            0 => 0.0,
            writes => self.hits as f64 / writes as f64,
        }
    }

    pub(crate) fn count_write(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Kept => self.hits += 1,
            WriteOutcome::Stored => self.misses += 1,
        }
    }

    pub(crate) fn count_stale_eviction(&mut self) {
        self.stale_evictions += 1;
    }

    /// Copy of these counters carrying the current entry count.
    pub(crate) fn snapshot(&self, total_entries: usize) -> Self {
        Self {
            total_entries,
            ..self.clone()
        }
    }
}
