//! Empirical-Bayes fitting.
//!
//! Responsibilities:
//!
//! - generate smoothness grids
//! - evaluate the oracle for every (unit, grid point) pair (parallel)
//! - fit mixture weights over the grid (mix-SQP)
//! - turn the fitted mixture into per-unit posteriors / local fdr

pub mod builder;
pub mod grid;
pub mod mixture;
pub mod posterior;

pub use builder::*;
pub use grid::*;
pub use mixture::*;
pub use posterior::*;
