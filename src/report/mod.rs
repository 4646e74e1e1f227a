//! Reporting: discovery control, function summaries, and terminal output.
//!
//! Formatting lives in `format` so the numerical code stays clean and
//! testable, and output changes stay localized.

pub mod discovery;
pub mod format;
pub mod summary;

pub use discovery::*;
pub use format::*;
pub use summary::*;
