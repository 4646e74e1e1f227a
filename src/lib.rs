//! `fash` library crate: functional adaptive shrinkage.
//!
//! Given many independently observed trajectories, `fash` scores each one
//! against a grid of smoothness values, fits an empirical-Bayes mixture over
//! the grid, and ranks trajectories by their posterior probability of being
//! non-dynamic, with false-discovery-rate control.
//!
//! The binary (`fash`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the numerical stages are reusable on their own

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
