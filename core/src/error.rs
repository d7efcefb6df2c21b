//! Error type shared by every cloudreg crate.
//!
//! Only malformed input and missing prerequisites are hard failures. Numerical
//! degeneracy and non-convergence are reported through result objects.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Empty clouds, mismatched array lengths, out-of-range indices, bad options.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An operation needs data that was not computed yet (e.g. normals).
    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

