//! Error types for data parsing in carelink-types.

use thiserror::Error;

/// Errors that can occur when parsing or constructing cuff data.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in carelink-core).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The buffer was shorter than the payload requires.
    #[error("Insufficient bytes: expected at least {expected}, got {actual}")]
    InsufficientBytes {
        /// Minimum length required.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },

    /// A command name that the cuff does not understand.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// A value that falls outside its permitted range.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using carelink-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
