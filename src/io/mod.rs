//! Export utilities for simulation results.

/// CSV export of per-trip driver log entries.
pub mod export;
