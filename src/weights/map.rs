//! Per-bank weight address signatures.
//!
//! The placement policies never interpret tensor content; a bank's weight
//! occupancy is just a set of opaque signatures derived from the row and
//! column an entry touches. Signature count per bank is the load measure
//! the scoring policies use.

use std::collections::{HashMap, HashSet};

use crate::dram::address::BankId;

/// Pack a (row, column) pair into an opaque address signature.
///
/// Negative (unset) coordinates pack as zero so partially bound addresses
/// still produce a stable signature.
pub fn signature(row: i64, column: i64) -> u64 {
    let row = row.max(0) as u64;
    let column = column.max(0) as u64;
    (row << 16) | (column & 0xffff)
}

/// Mapping from bank index to the set of weight signatures placed there.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticWeightMap {
    banks: HashMap<BankId, HashSet<u64>>,
}

impl StaticWeightMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a weight signature on a bank.
    pub fn insert(&mut self, bank: BankId, sig: u64) {
        self.banks.entry(bank).or_default().insert(sig);
    }

    /// Number of distinct signatures on a bank (0 for untouched banks).
    pub fn weight_count(&self, bank: BankId) -> usize {
        self.banks.get(&bank).map_or(0, |s| s.len())
    }

    /// Whether a bank holds any weights.
    pub fn has_weights(&self, bank: BankId) -> bool {
        self.banks.get(&bank).is_some_and(|s| !s.is_empty())
    }

    /// Iterator over banks that hold at least one signature.
    pub fn banks(&self) -> impl Iterator<Item = BankId> + '_ {
        self.banks
            .iter()
            .filter(|(_, s)| !s.is_empty())
            .map(|(&b, _)| b)
    }

    /// Number of banks holding weights.
    pub fn occupied_banks(&self) -> usize {
        self.banks.values().filter(|s| !s.is_empty()).count()
    }

    /// Total signatures across all banks.
    pub fn total_signatures(&self) -> usize {
        self.banks.values().map(|s| s.len()).sum()
    }

    /// Largest per-bank signature count; normalization base for activity
    /// scoring.
    pub fn max_weight_count(&self) -> usize {
        self.banks.values().map(|s| s.len()).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.banks.values().all(|s| s.is_empty())
    }
}
