//! Core types for uncertainty-aware feature extraction
//!
//! Spectra are complex matrices laid out as `[bins, frames]`: each column is
//! one short-time frame, each row one frequency bin. Features keep the same
//! convention, `[coefficients, frames]`.
//!
//! ## Uncertain spectra
//!
//! An uncertain spectrum attaches a variance to every complex bin. The bin is
//! modelled as a circularly-symmetric complex Gaussian:
//!
//! ```text
//!   X[k,l] ~ CN(mu[k,l], lambda[k,l])
//!
//!   Re X ~ N(Re mu, lambda/2)      Im X ~ N(Im mu, lambda/2)
//! ```
//!
//! The feature stages map `(mu, lambda)` to a mean and a variance per
//! cepstral coefficient and frame.

use num_complex::Complex64;

use crate::config::ConfigError;

/// Type alias for complex numbers using f64 precision
pub type Complex = Complex64;

/// Result type for feature extraction operations
pub type FeatureResult<T> = Result<T, FeatureError>;

/// Errors that can occur during feature extraction
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeatureError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Invalid variance {value} at ({row}, {col}): must be finite and non-negative")]
    InvalidVariance { row: usize, col: usize, value: f64 },

    #[error("Invalid delta window: {0}. Must be at least 1")]
    InvalidWindow(usize),

    #[error("Signal too short: need at least {needed} samples, got {actual}")]
    SignalTooShort { needed: usize, actual: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl FeatureError {
    pub(crate) fn shape(
        context: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    ) -> Self {
        FeatureError::ShapeMismatch {
            context,
            expected,
            actual,
        }
    }
}
