//! Assignment strategies
//!
//! Four ways of choosing a circuit per download, all built on the
//! evaluator: a genetic search over full assignments, a greedy
//! per-download candidate search, an online emulation of Diverse Weighted
//! Circuits (DWC), and a diagnostic whole-universe upper bound.

/// Diverse Weighted Circuits online emulation
pub mod dwc;
/// Genetic search over full assignments
pub mod genetic;
/// Greedy per-download candidate search
pub mod greedy;
/// Whole-universe steady-state upper bound
pub mod maxbw;

pub use genetic::Experiment;
