//! Error handling foundation for switchyard.
//!
//! Only the `Result` alias lives here. Each crate defines its own error
//! enums and wraps lower-layer reports with `Report::context` as they
//! propagate.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
