//! # Uncertainty-Propagating Feature Extraction
//!
//! This crate computes MFCC-style cepstral features from short-time spectra
//! and, when the spectrum is only known up to a per-bin complex Gaussian
//! (for example after speech enhancement), propagates that uncertainty to a
//! mean and a variance for every coefficient and frame.
//!
//! - **Filterbank**: mel-spaced triangular filters and a liftered DCT
//! - **Extraction**: `T · log(max(W·|X|², floor))`
//! - **Propagation**: closed-form moment matching, diagonal or full covariance
//! - **Monte Carlo**: sampling-based check of the closed forms
//! - **Post-processing**: cepstral mean subtraction, deltas, accelerations
//!
//! ## Signal Flow
//!
//! ```text
//! waveform → STFT → X ──────────────▶ extract ──▶ cms ─▶ Δ ─▶ ΔΔ ─▶ [c; Δ; ΔΔ]
//!                  (mu_X, Λ_X) ─────▶ propagate ─▶ cms_up ─▶ Δ_up ─▶ (mean, var)
//!                                └──▶ monte carlo (validation only)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use upfe_core::prelude::*;
//!
//! let spec = FilterbankSpec::new(16000.0, 512, 26, 12, 22.0, true).unwrap();
//! let propagator = MomentPropagator::new(spec).unwrap();
//!
//! let mean = ComplexMatrix::filled(257, 10, Complex::new(1.0, 0.5));
//! let variance = Matrix::filled(257, 10, 0.1);
//! let spectrum = UncertainSpectrum::new(mean, variance).unwrap();
//!
//! let features = propagator.propagate(&spectrum, CovarianceMode::Diagonal).unwrap();
//! assert_eq!(features.mean.shape(), (13, 10));
//! assert!(features.variance.iter().all(|&v| v >= 0.0));
//! ```

pub mod amplitude;
pub mod config;
pub mod delta;
pub mod extractor;
pub mod filterbank;
pub mod matrix;
pub mod montecarlo;
pub mod normalization;
pub mod observe;
pub mod pipeline;
pub mod propagation;
pub mod stft;
pub mod types;

// Parallel batch drivers (requires `parallel` feature)
#[cfg(feature = "parallel")]
pub mod parallel;

// Re-export main types
pub use amplitude::{AmplitudeEstimator, MmseStsa};
pub use config::{ConfigError, FrontendConfig};
pub use delta::{deltas, deltas_up, DeltaWindow};
pub use extractor::{MfccExtractor, MEL_FLOOR};
pub use filterbank::{FilterbankSpec, MelFilterbank};
pub use matrix::{ComplexMatrix, Matrix};
pub use montecarlo::{
    MonteCarloConfig, MonteCarloValidator, NullProgress, ProgressObserver, SampleStream,
    TracingProgress,
};
pub use normalization::{cms, cms_up};
pub use pipeline::{FeaturePipeline, PipelineOptions};
pub use propagation::{
    CovarianceMode, FullCovarianceFeatures, MomentPropagator, UncertainFeatures, UncertainSpectrum,
};
pub use stft::Stft;
pub use types::{Complex, FeatureError, FeatureResult};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::extractor::MfccExtractor;
    pub use crate::filterbank::FilterbankSpec;
    pub use crate::matrix::{ComplexMatrix, Matrix};
    pub use crate::pipeline::{FeaturePipeline, PipelineOptions};
    pub use crate::propagation::{CovarianceMode, MomentPropagator, UncertainFeatures, UncertainSpectrum};
    pub use crate::types::{Complex, FeatureError, FeatureResult};
}
