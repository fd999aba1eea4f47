//! Naive baseline: round-robin over all banks.
//!
//! Ignores the weight map entirely, so its conflict count tracks the
//! fraction of banks holding weights. Every other policy is measured
//! against this one.

use crate::dram::address::BankId;
use crate::policy::{KvCachePolicy, PolicyCore, PolicyStats};
use crate::weights::map::StaticWeightMap;

#[derive(Debug, Default)]
pub struct NaivePolicy {
    core: PolicyCore,
    next_bank: BankId,
}

impl NaivePolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvCachePolicy for NaivePolicy {
    fn name(&self) -> &'static str {
        "Naive"
    }

    fn init(&mut self, num_banks: usize, weights: &StaticWeightMap) {
        self.core.configure(num_banks, weights);
        self.next_bank = 0;
    }

    fn set_static_weight_map(&mut self, weights: &StaticWeightMap) {
        self.core.apply_weight_map(weights);
    }

    fn allocate(&mut self, _size_bytes: usize, token_id: u64) -> Option<BankId> {
        if !self.core.check_configured(self.name()) {
            return None;
        }
        let bank = self.next_bank;
        self.next_bank = (self.next_bank + 1) % self.core.num_banks();
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
}
