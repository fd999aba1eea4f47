//! Bank partitioning: round-robin inside a reserved bank range.
//!
//! The offline layout tool is expected to leave `[start, start + count)`
//! free of weights; KV allocations then never collide with compute
//! traffic. The policy still counts conflicts when the map shows weights
//! inside the reserved range, which is how a mis-configured layout shows
//! up in the results.

use tracing::{info, warn};

use crate::config::PartitionConfig;
use crate::dram::address::BankId;
use crate::policy::{KvCachePolicy, PolicyCore, PolicyStats};
use crate::weights::map::StaticWeightMap;

#[derive(Debug)]
pub struct BankPartitioningPolicy {
    core: PolicyCore,
    config: PartitionConfig,
    start: BankId,
    count: usize,
    cursor: usize,
}

impl BankPartitioningPolicy {
    pub fn new(config: PartitionConfig) -> Self {
        Self {
            core: PolicyCore::default(),
            config,
            start: 0,
            count: 0,
            cursor: 0,
        }
    }

    /// Reserved range, `[start, start + count)`.
    pub fn reserved_range(&self) -> (BankId, usize) {
        (self.start, self.count)
    }

    /// Weights found inside the reserved range; non-zero means the
    /// upstream layout did not honor the reservation.
    fn reserved_range_weights(&self) -> u64 {
        (self.start..self.start + self.count)
            .map(|b| self.core.static_count(b) as u64)
            .sum()
    }
}

impl KvCachePolicy for BankPartitioningPolicy {
    fn name(&self) -> &'static str {
        "BankPartitioning"
    }

    fn init(&mut self, num_banks: usize, weights: &StaticWeightMap) {
        self.core.configure(num_banks, weights);

        // Clamp the configured range into [0, num_banks), at least one
        // bank wide.
        let start = self.config.kv_cache_banks_start.min(num_banks - 1);
        let default_count = (num_banks / 4).max(1);
        let count = self
            .config
            .kv_cache_banks_count
            .unwrap_or(default_count)
            .max(1)
            .min(num_banks - start);

        let requested_count = self.config.kv_cache_banks_count;
        if start != self.config.kv_cache_banks_start || requested_count.is_some_and(|c| c != count)
        {
            warn!(
                requested_start = self.config.kv_cache_banks_start,
                requested_count = ?self.config.kv_cache_banks_count,
                start,
                count,
                "Clamped reserved KV bank range"
            );
        }

        self.start = start;
        self.count = count;
        self.cursor = 0;

        info!(start, count, num_banks, "Reserved KV bank range");
    }

    fn set_static_weight_map(&mut self, weights: &StaticWeightMap) {
        self.core.apply_weight_map(weights);
        let inside = self.reserved_range_weights();
        if inside > 0 {
            warn!(
                start = self.start,
                count = self.count,
                weights_inside = inside,
                "Static weights found inside the reserved KV range"
            );
        }
    }

    fn allocate(&mut self, _size_bytes: usize, token_id: u64) -> Option<BankId> {
        if !self.core.check_configured(self.name()) {
            return None;
        }
        let bank = self.start + self.cursor;
        self.cursor = (self.cursor + 1) % self.count;
        self.core.record(self.name(), token_id, bank);
        Some(bank)
    }

    fn bank_for_token(&self, token_id: u64) -> Option<BankId> {
        self.core.bank_for_token(token_id)
    }

    fn has_bank_conflict(&self, bank: BankId) -> bool {
        self.core.has_bank_conflict(bank)
    }

    fn stats(&self) -> &PolicyStats {
        self.core.stats()
    }

    fn reset_stats(&mut self) {
        self.core.reset_stats();
    }

    fn extra_counters(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("reserved_bank_start", self.start as u64),
            ("reserved_bank_count", self.count as u64),
            ("reserved_range_weights", self.reserved_range_weights()),
        ]
    }
}
