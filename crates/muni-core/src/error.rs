//! # Error Types
//!
//! Field validation and reference-number allocation errors. Both use
//! `thiserror` for `Display`/`Error`; the API layer maps them to 422 and
//! 409 responses respectively.

use thiserror::Error;

/// A single field failed a business validation rule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or blank.
    #[error("{field} is required")]
    Required {
        /// Field name as exposed on the wire.
        field: &'static str,
    },

    /// A text field exceeds its maximum length.
    #[error("{field} must not exceed {max} characters")]
    TooLong {
        /// Field name as exposed on the wire.
        field: &'static str,
        /// Maximum number of characters.
        max: usize,
    },

    /// A numeric or date field is outside its permitted range.
    #[error("{field} {reason}")]
    OutOfRange {
        /// Field name as exposed on the wire.
        field: &'static str,
        /// Human-readable constraint, e.g. "must be greater than 0".
        reason: String,
    },

    /// A field has the wrong shape (email, precision, catalogue key).
    #[error("{field} has an invalid format: {reason}")]
    InvalidFormat {
        /// Field name as exposed on the wire.
        field: &'static str,
        /// What was wrong with the value.
        reason: String,
    },
}

/// Reference-number allocation failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    /// Every candidate in the period is already taken.
    #[error("no free {prefix} reference number left in period {period}")]
    Exhausted {
        /// Number prefix (e.g. "MUL").
        prefix: &'static str,
        /// Period component of the number (e.g. "202503").
        period: String,
    },
}
