//! Contention-aware placement: prefer cold banks, cap per-bank load.
//!
//! First choice is any bank with no static weights and fewer than
//! `max_kv_per_bank` KV allocations, scanned round-robin from one past
//! the last placement. The cap matters: without it every allocation
//! piles onto a single cold bank and the KV reads serialize behind each
//! other instead of spreading across bank-level parallelism.
//!
//! When every cold bank is at the cap, the fallback picks the least
//! loaded bank, still preferring cold banks over weighted ones, with
//! ties broken by lowest index.

use crate::config::ContentionConfig;
use crate::dram::address::BankId;
use crate::policy::{KvCachePolicy, PolicyCore, PolicyStats};
use crate::weights::map::StaticWeightMap;

#[derive(Debug)]
pub struct ContentionAwarePolicy {
    core: PolicyCore,
    max_kv_per_bank: usize,
    last_bank: BankId,
    fallback_allocations: u64,
}

impl ContentionAwarePolicy {
    pub fn new(config: ContentionConfig) -> Self {
        Self {
            core: PolicyCore::default(),
            max_kv_per_bank: config.max_kv_per_bank.max(1),
            last_bank: 0,
            fallback_allocations: 0,
        }
    }

    /// Round-robin scan for a cold bank under the cap.
    fn scan_cold_bank(&self) -> Option<BankId> {
        let n = self.core.num_banks();
        (1..=n)
            .map(|i| (self.last_bank + i) % n)
            .find(|&bank| {
                self.core.static_count(bank) == 0
                    && self.core.dynamic_count(bank) < self.max_kv_per_bank
            })
    }

    /// Least-loaded bank, restricted to cold banks when any exist.
    fn least_loaded_bank(&self) -> BankId {
        let n = self.core.num_banks();
        let any_cold = (0..n).any(|b| self.core.static_count(b) == 0);

        (0..n)
            .filter(|&b| !any_cold || self.core.static_count(b) == 0)
            .min_by_key(|&b| self.core.dynamic_count(b))
            .unwrap_or(0)
    }
}

impl KvCachePolicy for ContentionAwarePolicy {
    fn name(&self) -> &'static str {
        "ContentionAware"
    }

    fn init(&mut self, num_banks: usize, weights: &StaticWeightMap) {
        self.core.configure(num_banks, weights);
        // First scan starts at bank 0.
        self.last_bank = num_banks - 1;
    }

    fn set_static_weight_map(&mut self, weights: &StaticWeightMap) {
        self.core.apply_weight_map(weights);
    }

    fn allocate(&mut self, _size_bytes: usize, token_id: u64) -> Option<BankId> {
        if !self.core.check_configured(self.name()) {
            return None;
        }

        let bank = match self.scan_cold_bank() {
            Some(bank) => bank,
            None => {
                self.fallback_allocations += 1;
                self.least_loaded_bank()
            }
        };

        self.last_bank = bank;
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
            ("max_kv_per_bank", self.max_kv_per_bank as u64),
            ("fallback_allocations", self.fallback_allocations),
        ]
    }
}
