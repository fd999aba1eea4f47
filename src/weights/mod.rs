//! Static weight occupancy.
//!
//! - [`map`]: per-bank sets of weight address signatures
//! - [`loader`]: parser for the upstream layout-optimizer trace

pub mod loader;
pub mod map;

pub use loader::load_static_weights;
pub use map::{signature, StaticWeightMap};
