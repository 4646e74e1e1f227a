//! Mathematical utilities: IWP basis functions and conjugate-Gaussian evidence.

pub mod basis;
pub mod gaussian;

pub use basis::*;
pub use gaussian::*;
