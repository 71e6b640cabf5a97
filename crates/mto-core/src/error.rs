//! # Core Error Types
//!
//! Errors raised by the foundational types. All errors use `thiserror`
//! for derive-based `Display` and `Error` implementations.

use thiserror::Error;

/// Errors from the foundational type layer.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A timestamp string could not be parsed.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A monetary operation overflowed the minor-unit range.
    #[error("monetary amount out of range: {0}")]
    AmountOutOfRange(String),
}
