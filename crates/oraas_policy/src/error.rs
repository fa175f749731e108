//! Error types for observation decoding and action validation.

use thiserror::Error;

/// Errors that can occur on the policy boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The flat observation vector has the wrong length for the layout.
    #[error("observation holds {actual} values, layout expects {expected}")]
    MalformedObservation {
        /// Values found.
        actual: usize,
        /// Values the layout demands.
        expected: usize,
    },

    /// An action index fell outside `[-1, candidates)`.
    #[error("action {value} is out of range for {candidates} candidates")]
    ActionOutOfRange {
        /// The offending wire value.
        value: i64,
        /// Number of candidates offered.
        candidates: usize,
    },
}

/// Result type alias for policy operations.
pub type Result<T> = std::result::Result<T, Error>;
