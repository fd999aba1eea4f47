//! KV cache placement policies.
//!
//! Every variant answers one question per generated token: which bank
//! gets the new KV entry, given where the static weights already sit.
//!
//! - [`naive`]: round-robin over all banks, blind to weights
//! - [`partition`]: round-robin inside a reserved bank range
//! - [`contention`]: prefer cold banks, cap per-bank load
//! - [`locality`]: activity-scored placement with a co-locality bonus
//!
//! Variants are registered under string names so a run selects its
//! policy from configuration alone.

pub mod contention;
pub mod locality;
pub mod naive;
pub mod partition;

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PolicyConfig;
use crate::dram::address::BankId;
use crate::weights::map::StaticWeightMap;

pub use contention::ContentionAwarePolicy;
pub use locality::SmartLocalityPolicy;
pub use naive::NaivePolicy;
pub use partition::BankPartitioningPolicy;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Unknown KV cache policy: {0}")]
    UnknownPolicy(String),
}

/// Counters every policy maintains.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PolicyStats {
    /// Tokens allocated so far.
    pub total_allocations: u64,

    /// Allocations that landed on a bank holding static weights.
    pub total_conflicts: u64,
}

/// The placement policy contract.
///
/// A policy has two phases: unconfigured (default construction only) and
/// configured (after [`init`](KvCachePolicy::init)). Accessors and
/// mutators on an unconfigured policy log a warning and return empty
/// results; they never panic.
pub trait KvCachePolicy {
    /// Registered variant name.
    fn name(&self) -> &'static str;

    /// One-time setup: capture the bank count, copy the weight map, and
    /// derive per-bank static counts.
    fn init(&mut self, num_banks: usize, weights: &StaticWeightMap);

    /// Replace the weight map without re-reading tuning parameters; used
    /// when weights are only discovered after kernel expansion.
    fn set_static_weight_map(&mut self, weights: &StaticWeightMap);

    /// Choose a bank for `token_id`, record the assignment, and update
    /// statistics. Not idempotent; callers must not repeat a token.
    fn allocate(&mut self, size_bytes: usize, token_id: u64) -> Option<BankId>;

    /// Bank previously assigned to `token_id`.
    fn bank_for_token(&self, token_id: u64) -> Option<BankId>;

    /// Whether a bank currently holds both weights and KV allocations.
    fn has_bank_conflict(&self, bank: BankId) -> bool;

    fn stats(&self) -> &PolicyStats;

    /// Zero the counters; allocation state stays intact.
    fn reset_stats(&mut self);

    /// Per-variant counters appended to the final report.
    fn extra_counters(&self) -> Vec<(&'static str, u64)> {
        Vec::new()
    }
}

/// Shared state behind every variant: the allocation table, per-bank
/// occupancy counts, and the statistics bag.
#[derive(Debug, Default)]
pub(crate) struct PolicyCore {
    num_banks: usize,
    configured: bool,
    static_count: Vec<usize>,
    dynamic_count: Vec<usize>,
    table: HashMap<u64, BankId>,
    stats: PolicyStats,
}

impl PolicyCore {
    pub(crate) fn configure(&mut self, num_banks: usize, weights: &StaticWeightMap) {
        self.num_banks = num_banks;
        self.configured = true;
        self.dynamic_count = vec![0; num_banks];
        self.apply_weight_map(weights);
    }

    pub(crate) fn apply_weight_map(&mut self, weights: &StaticWeightMap) {
        self.static_count = (0..self.num_banks)
            .map(|b| weights.weight_count(b))
            .collect();
    }

    /// Guard for operations that require the configured phase.
    pub(crate) fn check_configured(&self, policy: &'static str) -> bool {
        if !self.configured {
            warn!(policy, "Policy used before init");
        }
        self.configured
    }

    pub(crate) fn num_banks(&self) -> usize {
        self.num_banks
    }

    pub(crate) fn static_count(&self, bank: BankId) -> usize {
        self.static_count.get(bank).copied().unwrap_or(0)
    }

    pub(crate) fn static_counts(&self) -> &[usize] {
        &self.static_count
    }

    pub(crate) fn dynamic_count(&self, bank: BankId) -> usize {
        self.dynamic_count.get(bank).copied().unwrap_or(0)
    }

    /// Record an assignment chosen by a variant and update counters.
    pub(crate) fn record(&mut self, policy: &'static str, token_id: u64, bank: BankId) {
        if let Some(&previous) = self.table.get(&token_id) {
            warn!(policy, token_id, previous, bank, "Token allocated twice");
        }
        self.table.insert(token_id, bank);
        self.dynamic_count[bank] += 1;
        self.stats.total_allocations += 1;

        let conflict = self.static_count(bank) > 0;
        if conflict {
            self.stats.total_conflicts += 1;
        }
        debug!(policy, token_id, bank, conflict, "Allocated KV entry");
    }

    pub(crate) fn bank_for_token(&self, token_id: u64) -> Option<BankId> {
        self.table.get(&token_id).copied()
    }

    pub(crate) fn has_bank_conflict(&self, bank: BankId) -> bool {
        self.static_count(bank) > 0 && self.dynamic_count(bank) > 0
    }

    pub(crate) fn stats(&self) -> &PolicyStats {
        &self.stats
    }

    pub(crate) fn reset_stats(&mut self) {
        self.stats = PolicyStats::default();
    }
}

/// The registered policy variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Naive,
    BankPartitioning,
    ContentionAware,
    SmartLocality,
}

impl std::str::FromStr for PolicyKind {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Naive" => Ok(PolicyKind::Naive),
            "BankPartitioning" => Ok(PolicyKind::BankPartitioning),
            "ContentionAware" => Ok(PolicyKind::ContentionAware),
            "SmartLocality" => Ok(PolicyKind::SmartLocality),
            other => Err(PolicyError::UnknownPolicy(other.to_string())),
        }
    }
}

/// Construct the configured variant in its unconfigured phase; the
/// frontend calls `init` once the bank count is known.
pub fn build_policy(config: &PolicyConfig) -> Result<Box<dyn KvCachePolicy>, PolicyError> {
    let kind: PolicyKind = config.variant.parse()?;
    Ok(match kind {
        PolicyKind::Naive => Box::new(NaivePolicy::new()),
        PolicyKind::BankPartitioning => {
            Box::new(BankPartitioningPolicy::new(config.partition.clone()))
        }
        PolicyKind::ContentionAware => {
            Box::new(ContentionAwarePolicy::new(config.contention.clone()))
        }
        PolicyKind::SmartLocality => Box::new(SmartLocalityPolicy::new(config.locality.clone())),
    })
}
