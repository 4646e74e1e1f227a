//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - observed trajectories (`Unit`) and the shared `SmoothnessGrid` / `BasisConfig`
//! - the stage products (`LikelihoodMatrix`, `MixtureWeights`, `PosteriorWeights`)
//! - reporting outputs (`FittedFunction`, `FunctionSummary`) and the run config

pub mod types;

pub use types::*;
