//! Error types for wavefront-density.

use thiserror::Error;

/// Result type for density estimation.
pub type Result<T> = std::result::Result<T, DensityError>;

/// Errors raised while estimating a distribution map.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DensityError {
    /// Fewer samples than a covariance needs.
    #[error("need at least two samples, got {count}")]
    InsufficientData { count: usize },

    /// Members are coincident or collinear.
    #[error("singular bandwidth matrix (determinant {determinant:e})")]
    SingularBandwidth { determinant: f64 },

    /// The kernel normalization term overflowed or is NaN.
    #[error("non-finite kernel normalization term")]
    NonFinite,

    /// Grid parameters cannot describe a map.
    #[error("invalid grid: size {size}, scale {scale}")]
    InvalidGrid { size: usize, scale: f64 },

    /// Cell buffer length disagrees with the grid size.
    #[error("grid of size {size} needs {expected} cells, got {actual}")]
    ShapeMismatch {
        size: usize,
        expected: usize,
        actual: usize,
    },
}
