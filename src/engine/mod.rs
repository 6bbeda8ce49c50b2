//! Core engine: cache check, refresh decision, quota admission and
//! provider fan-out.

pub mod aggregator;
pub mod refresh;
