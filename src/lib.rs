//! kv-bank-sim: Bank-aware KV-cache placement for PIM LLM inference.
//!
//! Autoregressive decoding on a processing-in-memory accelerator puts two
//! competing classes of state on the same pool of DRAM banks:
//!   static model weights (pre-placed by an offline layout tool) and the
//!   dynamic KV cache (one new entry per generated token, all prior
//!   entries re-read every step).
//!
//! This crate simulates their contention: a family of KV placement
//! policies chooses a bank for every new entry, a trace frontend expands
//! kernel descriptors and interleaves KV traffic with kernel traffic per
//! token, and a conflict tracker attributes cross-class bank conflicts.

pub mod config;
pub mod dram;
pub mod policy;
pub mod trace;
pub mod weights;
