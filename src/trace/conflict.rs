//! Cross-class bank conflict tracking.
//!
//! Every operation delivered to the back-end is registered here as
//! weight-class or KV-class. Each bank keeps, per class, a vector of
//! in-flight addresses and a sticky usage set: registering an operation
//! against a bank whose *other* class has touched it counts a conflict.
//! Completion removes an address from the in-flight vector but leaves
//! the usage set alone — occupancy is deliberately sticky so that
//! temporally separated accesses to the same bank still attribute
//! contention to the placement decision that caused it.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::dram::address::BankId;

/// Which class was blocked by which.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConflictKind {
    WeightBlockedByKv,
    KvBlockedByWeight,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::WeightBlockedByKv => write!(f, "weight_kv"),
            ConflictKind::KvBlockedByWeight => write!(f, "kv_weight"),
        }
    }
}

/// One recorded conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictEvent {
    pub bank: BankId,
    pub cycle: u64,
    pub kind: ConflictKind,
}

/// Conflict counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConflictStats {
    pub total_conflicts: u64,
    pub weight_blocked_by_kv: u64,
    pub kv_blocked_by_weight: u64,
}

#[derive(Debug, Default)]
struct BankOccupancy {
    weight_in_flight: Vec<u64>,
    kv_in_flight: Vec<u64>,
    weight_used: HashSet<u64>,
    kv_used: HashSet<u64>,
}

/// Observes the address stream and attributes cross-class conflicts.
#[derive(Debug, Default)]
pub struct BankConflictTracker {
    banks: Vec<BankOccupancy>,
    stats: ConflictStats,
    events: Vec<ConflictEvent>,
}

impl BankConflictTracker {
    pub fn new(num_banks: usize) -> Self {
        Self {
            banks: (0..num_banks).map(|_| BankOccupancy::default()).collect(),
            stats: ConflictStats::default(),
            events: Vec::new(),
        }
    }

    fn bank_mut(&mut self, bank: BankId) -> Option<&mut BankOccupancy> {
        if bank >= self.banks.len() {
            warn!(bank, banks = self.banks.len(), "Bank index out of range");
            return None;
        }
        Some(&mut self.banks[bank])
    }

    /// Register a weight-class operation on a bank.
    pub fn register_weight_op(&mut self, bank: BankId, addr: u64, cycle: u64) {
        let Some(state) = self.bank_mut(bank) else {
            return;
        };
        state.weight_in_flight.push(addr);
        state.weight_used.insert(addr);

        if !state.kv_used.is_empty() {
            self.stats.total_conflicts += 1;
            self.stats.weight_blocked_by_kv += 1;
            self.events.push(ConflictEvent {
                bank,
                cycle,
                kind: ConflictKind::WeightBlockedByKv,
            });
            debug!(bank, cycle, "Weight op blocked by KV occupancy");
        }
    }

    /// Register a KV-class operation on a bank.
    pub fn register_kv_op(&mut self, bank: BankId, addr: u64, cycle: u64) {
        let Some(state) = self.bank_mut(bank) else {
            return;
        };
        state.kv_in_flight.push(addr);
        state.kv_used.insert(addr);

        if !state.weight_used.is_empty() {
            self.stats.total_conflicts += 1;
            self.stats.kv_blocked_by_weight += 1;
            self.events.push(ConflictEvent {
                bank,
                cycle,
                kind: ConflictKind::KvBlockedByWeight,
            });
            debug!(bank, cycle, "KV op blocked by weight occupancy");
        }
    }

    /// Retire one in-flight weight address. The usage set stays.
    pub fn complete_weight_op(&mut self, bank: BankId, addr: u64) {
        if let Some(state) = self.bank_mut(bank) {
            if let Some(pos) = state.weight_in_flight.iter().position(|&a| a == addr) {
                state.weight_in_flight.swap_remove(pos);
            }
        }
    }

    /// Retire one in-flight KV address. The usage set stays.
    pub fn complete_kv_op(&mut self, bank: BankId, addr: u64) {
        if let Some(state) = self.bank_mut(bank) {
            if let Some(pos) = state.kv_in_flight.iter().position(|&a| a == addr) {
                state.kv_in_flight.swap_remove(pos);
            }
        }
    }

    /// In-flight operation counts for a bank, `(weight, kv)`.
    pub fn in_flight(&self, bank: BankId) -> (usize, usize) {
        self.banks
            .get(bank)
            .map(|s| (s.weight_in_flight.len(), s.kv_in_flight.len()))
            .unwrap_or((0, 0))
    }

    pub fn stats(&self) -> &ConflictStats {
        &self.stats
    }

    pub fn events(&self) -> &[ConflictEvent] {
        &self.events
    }

    /// Zero the counters and drop the event history. Bank occupancy is
    /// left intact.
    pub fn reset(&mut self) {
        self.stats = ConflictStats::default();
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_class_conflict_both_directions() {
        let mut tracker = BankConflictTracker::new(4);

        tracker.register_weight_op(0, 100, 1);
        assert_eq!(tracker.stats().total_conflicts, 0);

        tracker.register_kv_op(0, 200, 2);
        assert_eq!(tracker.stats().kv_blocked_by_weight, 1);

        tracker.register_weight_op(0, 101, 3);
        assert_eq!(tracker.stats().weight_blocked_by_kv, 1);
        assert_eq!(tracker.stats().total_conflicts, 2);
    }

    #[test]
    fn test_same_class_never_conflicts() {
        let mut tracker = BankConflictTracker::new(4);

        tracker.register_weight_op(1, 100, 1);
        tracker.register_weight_op(1, 101, 2);
        tracker.register_kv_op(2, 300, 3);
        tracker.register_kv_op(2, 301, 4);

        assert_eq!(tracker.stats().total_conflicts, 0);
    }

    #[test]
    fn test_occupancy_is_sticky_after_completion() {
        let mut tracker = BankConflictTracker::new(4);

        tracker.register_weight_op(0, 100, 1);
        tracker.complete_weight_op(0, 100);
        assert_eq!(tracker.in_flight(0), (0, 0));

        // The weight usage set still marks the bank.
        tracker.register_kv_op(0, 200, 5);
        assert_eq!(tracker.stats().kv_blocked_by_weight, 1);
    }

    #[test]
    fn test_event_history_records_bank_and_cycle() {
        let mut tracker = BankConflictTracker::new(4);

        tracker.register_kv_op(3, 200, 7);
        tracker.register_weight_op(3, 100, 9);

        let events = tracker.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].bank, 3);
        assert_eq!(events[0].cycle, 9);
        assert_eq!(events[0].kind, ConflictKind::WeightBlockedByKv);
    }

    #[test]
    fn test_reset_clears_counters_not_occupancy() {
        let mut tracker = BankConflictTracker::new(4);

        tracker.register_weight_op(0, 100, 1);
        tracker.register_kv_op(0, 200, 2);
        tracker.reset();

        assert_eq!(tracker.stats().total_conflicts, 0);
        assert!(tracker.events().is_empty());

        // Occupancy survived the reset: the next cross-class op conflicts.
        tracker.register_kv_op(0, 201, 3);
        assert_eq!(tracker.stats().kv_blocked_by_weight, 1);
    }

    #[test]
    fn test_out_of_range_bank_is_skipped() {
        let mut tracker = BankConflictTracker::new(2);
        tracker.register_weight_op(9, 100, 1);
        assert_eq!(tracker.stats().total_conflicts, 0);
        assert!(tracker.events().is_empty());
    }
}
