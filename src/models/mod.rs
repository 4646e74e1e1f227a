//! Likelihood oracles.
//!
//! The oracle is kept behind a small trait so the grid builder can stay
//! generic and tests can plug in scripted backends.

pub mod oracle;

pub use oracle::*;
