//! Structured error types for the sylva workspace.

use thiserror::Error;

/// Unified error type for all sylva operations.
///
/// Every variant is a recoverable condition caused by the caller's input.
/// Internal logic defects are not represented here; they panic.
#[derive(Debug, Error)]
pub enum SylvaError {
    /// Malformed model composition (e.g. categories over different alphabets).
    #[error("model error: {0}")]
    Model(String),

    /// Malformed rate matrix (non-square, wrong size, negative or non-finite rates).
    #[error("rate error: {0}")]
    Rate(String),

    /// Structural tree problem (unknown node, duplicate name, negative branch length).
    #[error("tree error: {0}")]
    Tree(String),

    /// Missing parameter or a value outside its domain.
    #[error("parameter error: {0}")]
    Parameter(String),

    /// Request for an undefined state or node during likelihood or reconstruction lookups.
    #[error("likelihood error: {0}")]
    Likelihood(String),

    /// Site or alignment inconsistency (unknown taxa, classes without a model).
    #[error("alignment error: {0}")]
    Alignment(String),

    /// Parse error (malformed Newick input)
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid input (bad arguments, out-of-range values)
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience alias used throughout the sylva workspace.
pub type Result<T> = std::result::Result<T, SylvaError>;
