//! Error types for heatmap building, recommendation and the external collaborators.

use thiserror::Error;

/// Errors surfaced to callers of the heatmap and recommendation operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Request parameters were rejected before any clustering took place.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// The point source could not produce trace points.
    #[error("Point source failed: {0}")]
    Source(String),
    /// The live location store could not be read or written.
    #[error("Location store failed: {0}")]
    Store(String),
}

impl Error {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single travel-time lookup.
///
/// The recommender never propagates these; it falls back to a straight-line estimate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimateError {
    #[error("Invalid coordinates provided")]
    InvalidCoordinates,
    #[error("Route not found")]
    NoRoute,
    #[error("Timeout")]
    Timeout,
    #[error("Routing service unavailable: {0}")]
    Unavailable(String),
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for EstimateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EstimateError::Timeout
        } else {
            EstimateError::Unavailable(err.to_string())
        }
    }
}
