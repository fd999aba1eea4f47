//! The memory back-end seam.
//!
//! The frontend drives an external cycle-accurate DRAM model through the
//! narrow [`MemoryBackend`] trait: offer one operation per tick, poll for
//! idleness, read the organization. [`QueueBackend`] is the built-in
//! stand-in used by the binary and the test suite; it models the back-end
//! as a bounded FIFO that retires one operation per memory cycle.

use std::collections::VecDeque;

use tracing::debug;

use crate::dram::address::Operation;
use crate::dram::organization::DramOrganization;

/// The consumed interface of the downstream DRAM model.
pub trait MemoryBackend {
    /// Offer an operation. `true` means accepted and enqueued; `false`
    /// means back-pressure, retry on a later tick.
    fn send(&mut self, op: &Operation) -> bool;

    /// Advance the memory clock by one cycle.
    fn cycle(&mut self);

    /// Whether all accepted operations have been retired.
    fn finished(&self) -> bool;

    /// The DRAM hierarchy this back-end simulates.
    fn organization(&self) -> &DramOrganization;

    /// Elapsed memory cycles.
    fn cycles(&self) -> u64;
}

/// Bounded-FIFO back-end model.
///
/// Accepts up to `capacity` outstanding operations and retires exactly
/// one per cycle. Deterministic, which the replay tests rely on.
pub struct QueueBackend {
    organization: DramOrganization,
    queue: VecDeque<Operation>,
    capacity: usize,
    cycles: u64,
    retired: u64,
}

impl QueueBackend {
    pub fn new(organization: DramOrganization, capacity: usize) -> Self {
        Self {
            organization,
            queue: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            cycles: 0,
            retired: 0,
        }
    }

    /// Operations retired so far.
    pub fn retired(&self) -> u64 {
        self.retired
    }

    /// Operations currently queued.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl MemoryBackend for QueueBackend {
    fn send(&mut self, op: &Operation) -> bool {
        if self.queue.len() >= self.capacity {
            return false;
        }
        self.queue.push_back(op.clone());
        true
    }

    fn cycle(&mut self) {
        self.cycles += 1;
        if let Some(op) = self.queue.pop_front() {
            self.retired += 1;
            debug!(opcode = %op.opcode, addr = %op.addr, "Retired operation");
        }
    }

    fn finished(&self) -> bool {
        self.queue.is_empty()
    }

    fn organization(&self) -> &DramOrganization {
        &self.organization
    }

    fn cycles(&self) -> u64 {
        self.cycles
    }
}
