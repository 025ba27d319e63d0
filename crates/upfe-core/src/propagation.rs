//! Analytic moment propagation through the MFCC chain
//!
//! Given a spectrum whose bins are complex Gaussians `CN(mu, lambda)`, the
//! [`MomentPropagator`] computes a mean and a variance for every cepstral
//! coefficient by moment matching at each nonlinear stage:
//!
//! ```text
//!   (mu_X, Λ_X) ──periodogram──▶ (mu_P, var_P)
//!               ──W·──────────▶ (mu_M, var_M | Σ_M)
//!               ──log─────────▶ (mu_L, var_L | Σ_L)      log-normal matching
//!               ──T·──────────▶ (mu_C, var_C | Σ_C)
//! ```
//!
//! Bins are assumed independent. In [`CovarianceMode::Diagonal`] every
//! channel is treated on its own; in [`CovarianceMode::Full`] the
//! cross-channel covariance induced by overlapping filters is carried per
//! frame through the log and DCT stages. Only the diagonal of the cepstral
//! covariance is returned by [`MomentPropagator::propagate`]; use
//! [`MomentPropagator::propagate_full`] to keep the whole matrix.
//!
//! With `Λ ≡ 0` the mean is bit-identical to [`MfccExtractor::extract`] and
//! the variance is zero.
//!
//! [`MfccExtractor::extract`]: crate::extractor::MfccExtractor::extract

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::amplitude::{AmplitudeEstimator, MmseStsa};
use crate::extractor::{check_bins, MEL_FLOOR};
use crate::filterbank::{FilterbankSpec, MelFilterbank};
use crate::matrix::{ComplexMatrix, Matrix};
use crate::types::{FeatureError, FeatureResult};

/// Spectral estimate with per-bin uncertainty, `X[k,l] ~ CN(mean, variance)`.
#[derive(Debug, Clone)]
pub struct UncertainSpectrum {
    mean: ComplexMatrix,
    variance: Matrix,
}

impl UncertainSpectrum {
    /// Pair a complex mean with a real variance of the same shape.
    ///
    /// Every variance must be finite and non-negative.
    pub fn new(mean: ComplexMatrix, variance: Matrix) -> FeatureResult<Self> {
        if mean.shape() != variance.shape() {
            return Err(FeatureError::shape(
                "UncertainSpectrum::new",
                mean.shape(),
                variance.shape(),
            ));
        }
        for row in 0..variance.rows() {
            for (col, &value) in variance.row(row).iter().enumerate() {
                if !(value >= 0.0) || !value.is_finite() {
                    return Err(FeatureError::InvalidVariance { row, col, value });
                }
            }
        }
        Ok(Self { mean, variance })
    }

    /// A spectrum known exactly (zero variance everywhere).
    pub fn certain(mean: ComplexMatrix) -> Self {
        let variance = Matrix::zeros(mean.rows(), mean.cols());
        Self { mean, variance }
    }

    pub fn mean(&self) -> &ComplexMatrix {
        &self.mean
    }

    pub fn variance(&self) -> &Matrix {
        &self.variance
    }

    pub fn bins(&self) -> usize {
        self.mean.rows()
    }

    pub fn frames(&self) -> usize {
        self.mean.cols()
    }

    /// True when every bin has zero variance.
    pub fn is_certain(&self) -> bool {
        self.variance.iter().all(|&v| v == 0.0)
    }

}

/// How cross-channel correlation is handled between the filterbank and DCT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CovarianceMode {
    /// Channels treated as independent.
    #[default]
    Diagonal,
    /// Per-frame channel covariance `W·diag(var_P)·Wᵀ` carried through log and DCT.
    Full,
}

/// Per-coefficient mean and variance, both `[coefficients, frames]`.
#[derive(Debug, Clone, PartialEq)]
pub struct UncertainFeatures {
    pub mean: Matrix,
    pub variance: Matrix,
}

impl UncertainFeatures {
    pub fn new(mean: Matrix, variance: Matrix) -> FeatureResult<Self> {
        if mean.shape() != variance.shape() {
            return Err(FeatureError::shape(
                "UncertainFeatures::new",
                mean.shape(),
                variance.shape(),
            ));
        }
        Ok(Self { mean, variance })
    }

    pub fn frames(&self) -> usize {
        self.mean.cols()
    }

    /// `[mean; variance]` stacked row-wise, the layout used for
    /// uncertainty decoding.
    pub fn stacked(&self) -> FeatureResult<Matrix> {
        Matrix::vstack(&[&self.mean, &self.variance])
    }
}

/// Cepstral mean plus the complete per-frame cepstral covariance.
#[derive(Debug, Clone)]
pub struct FullCovarianceFeatures {
    /// `[coefficients, frames]`
    pub mean: Matrix,
    /// One `coefficients × coefficients` matrix per frame.
    pub covariances: Vec<Matrix>,
}

impl FullCovarianceFeatures {
    /// Per-coefficient variances, `[coefficients, frames]`.
    pub fn diagonal(&self) -> Matrix {
        let mut variance = Matrix::zeros(self.mean.rows(), self.mean.cols());
        for (l, cov) in self.covariances.iter().enumerate() {
            for (c, v) in cov.diagonal().into_iter().enumerate() {
                variance.set(c, l, v);
            }
        }
        variance
    }

    /// Drop the off-diagonal terms.
    pub fn into_uncertain(self) -> UncertainFeatures {
        let variance = self.diagonal();
        UncertainFeatures {
            mean: self.mean,
            variance,
        }
    }
}

/// Analytic mean/variance propagator sharing its filterbank with the extractor.
#[derive(Debug, Clone)]
pub struct MomentPropagator<A: AmplitudeEstimator = MmseStsa> {
    filterbank: Arc<MelFilterbank>,
    estimator: A,
}

impl MomentPropagator<MmseStsa> {
    pub fn new(spec: FilterbankSpec) -> FeatureResult<Self> {
        Ok(Self::with_filterbank(Arc::new(MelFilterbank::new(spec)?)))
    }

    pub fn with_filterbank(filterbank: Arc<MelFilterbank>) -> Self {
        Self::with_estimator(filterbank, MmseStsa)
    }
}

impl<A: AmplitudeEstimator> MomentPropagator<A> {
    /// Use a custom amplitude estimator for the magnitude domain.
    pub fn with_estimator(filterbank: Arc<MelFilterbank>, estimator: A) -> Self {
        Self {
            filterbank,
            estimator,
        }
    }

    pub fn filterbank(&self) -> &Arc<MelFilterbank> {
        &self.filterbank
    }

    pub fn spec(&self) -> &FilterbankSpec {
        self.filterbank.spec()
    }

    pub fn estimator(&self) -> &A {
        &self.estimator
    }

    /// Cepstral mean and per-coefficient variance.
    pub fn propagate(
        &self,
        spectrum: &UncertainSpectrum,
        mode: CovarianceMode,
    ) -> FeatureResult<UncertainFeatures> {
        match mode {
            CovarianceMode::Diagonal => self.propagate_diagonal(spectrum),
            CovarianceMode::Full => Ok(self.propagate_full(spectrum)?.into_uncertain()),
        }
    }

    /// Full-covariance propagation keeping every per-frame cepstral
    /// covariance matrix.
    pub fn propagate_full(&self, spectrum: &UncertainSpectrum) -> FeatureResult<FullCovarianceFeatures> {
        check_bins(self.spec(), spectrum.bins(), spectrum.frames(), "MomentPropagator::propagate_full")?;
        debug!(
            frames = spectrum.frames(),
            mode = "full",
            estimator = self.estimator.name(),
            "propagating spectral moments"
        );
        let (mu_p, var_p) = self.periodogram_moments(spectrum)?;
        let w = self.filterbank.weights();
        let t = self.filterbank.dct();
        let w_t = w.transpose();
        let t_t = t.transpose();
        let mu_m = w.matmul(&mu_p)?.map(|e| e.max(MEL_FLOOR));

        let frames = spectrum.frames();
        let mut mean = Matrix::zeros(t.rows(), frames);
        let mut covariances = Vec::with_capacity(frames);
        for l in 0..frames {
            let var_col = var_p.column(l);
            let mu_col = mu_m.column(l);

            // Σ_M = W·diag(var_P)·Wᵀ
            let scaled = Matrix::from_fn(w.rows(), w.cols(), |m, k| w.get(m, k) * var_col[k]);
            let sigma_m = scaled.matmul(&w_t)?;

            let sigma_l = Matrix::from_fn(sigma_m.rows(), sigma_m.cols(), |i, j| {
                (sigma_m.get(i, j) / (mu_col[i] * mu_col[j]) + 1.0).ln()
            });
            let mu_l: Vec<f64> = mu_col
                .iter()
                .zip(sigma_l.diagonal())
                .map(|(&mu, var)| mu.ln() - 0.5 * var)
                .collect();

            for (c, v) in t.mul_vec(&mu_l)?.into_iter().enumerate() {
                mean.set(c, l, v);
            }
            covariances.push(t.matmul(&sigma_l)?.matmul(&t_t)?);
        }

        Ok(FullCovarianceFeatures { mean, covariances })
    }

    fn propagate_diagonal(&self, spectrum: &UncertainSpectrum) -> FeatureResult<UncertainFeatures> {
        check_bins(self.spec(), spectrum.bins(), spectrum.frames(), "MomentPropagator::propagate")?;
        debug!(
            frames = spectrum.frames(),
            mode = "diagonal",
            estimator = self.estimator.name(),
            "propagating spectral moments"
        );
        let (mu_p, var_p) = self.periodogram_moments(spectrum)?;
        let w = self.filterbank.weights();
        let t = self.filterbank.dct();

        let mu_m = w.matmul(&mu_p)?.map(|e| e.max(MEL_FLOOR));
        let var_m = w.squared().matmul(&var_p)?;

        // Log-normal moment matching
        let var_l = var_m.zip_map(&mu_m, |var, mu| (var / (mu * mu) + 1.0).ln())?;
        let mu_l = mu_m.zip_map(&var_l, |mu, var| mu.ln() - 0.5 * var)?;

        let mean = t.matmul(&mu_l)?;
        let variance = t.squared().matmul(&var_l)?;
        UncertainFeatures::new(mean, variance)
    }

    /// Mean and variance of `|X|²` (power) or of the amplitude estimate
    /// (magnitude) per bin and frame.
    fn periodogram_moments(&self, spectrum: &UncertainSpectrum) -> FeatureResult<(Matrix, Matrix)> {
        let mean = spectrum.mean();
        let variance = spectrum.variance();
        let power = mean.norm_sqr();

        if self.spec().usepow {
            let mu_p = power.zip_map(variance, |p, lambda| p + lambda)?;
            let var_p = power.zip_map(variance, |p, lambda| lambda * (2.0 * p + lambda))?;
            return Ok((mu_p, var_p));
        }

        if spectrum.is_certain() {
            return Ok((mean.norm(), Matrix::zeros(mean.rows(), mean.cols())));
        }

        let mut mu_p = Matrix::zeros(mean.rows(), mean.cols());
        let mut var_p = Matrix::zeros(mean.rows(), mean.cols());
        for k in 0..mean.rows() {
            for l in 0..mean.cols() {
                let (amp, spread) = self.estimator.moments(mean.get(k, l), variance.get(k, l));
                mu_p.set(k, l, amp);
                var_p.set(k, l, spread);
            }
        }
        Ok((mu_p, var_p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::MfccExtractor;
    use crate::filterbank::build_dct_matrix;
    use crate::types::Complex;

    const EPSILON: f64 = 1e-9;

    fn standard_spec(usepow: bool) -> FilterbankSpec {
        FilterbankSpec::new(16000.0, 512, 26, 12, 22.0, usepow).unwrap()
    }

    fn test_mean(bins: usize, frames: usize) -> ComplexMatrix {
        ComplexMatrix::from_fn(bins, frames, |k, l| {
            let phase = 0.37 * (k * (l + 1)) as f64;
            let amp = 1.0 + 4.0 * ((k + 3 * l) % 11) as f64 / 11.0;
            Complex::from_polar(amp, phase)
        })
    }

    fn test_variance(bins: usize, frames: usize) -> Matrix {
        Matrix::from_fn(bins, frames, |k, l| 0.05 + 0.5 * ((k + l) % 7) as f64 / 7.0)
    }

    // --- UncertainSpectrum ---

    #[test]
    fn test_spectrum_rejects_negative_and_nan_variance() {
        let mean = ComplexMatrix::filled(3, 2, Complex::new(1.0, 0.0));
        let mut var = Matrix::zeros(3, 2);
        var.set(1, 1, -0.1);
        assert!(matches!(
            UncertainSpectrum::new(mean.clone(), var),
            Err(FeatureError::InvalidVariance { row: 1, col: 1, .. })
        ));
        let mut var = Matrix::zeros(3, 2);
        var.set(2, 0, f64::NAN);
        assert!(UncertainSpectrum::new(mean, var).is_err());
    }

    #[test]
    fn test_spectrum_rejects_shape_mismatch() {
        let mean = ComplexMatrix::filled(3, 2, Complex::new(1.0, 0.0));
        let var = Matrix::zeros(3, 3);
        assert!(matches!(
            UncertainSpectrum::new(mean, var),
            Err(FeatureError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_propagate_rejects_wrong_bin_count() {
        let prop = MomentPropagator::new(standard_spec(true)).unwrap();
        let spectrum = UncertainSpectrum::certain(ComplexMatrix::filled(100, 2, Complex::new(1.0, 0.0)));
        assert!(prop.propagate(&spectrum, CovarianceMode::Diagonal).is_err());
        assert!(prop.propagate_full(&spectrum).is_err());
    }

    // --- Degenerate case ---

    #[test]
    fn test_zero_variance_reduces_to_extract() {
        for &usepow in &[true, false] {
            let spec = standard_spec(usepow);
            let extractor = MfccExtractor::new(spec).unwrap();
            let prop = MomentPropagator::with_filterbank(Arc::clone(extractor.filterbank()));
            let mean = test_mean(257, 6);
            let expected = extractor.extract(&mean).unwrap();
            let out = prop
                .propagate(&UncertainSpectrum::certain(mean), CovarianceMode::Diagonal)
                .unwrap();
            for (a, b) in out.mean.iter().zip(expected.iter()) {
                assert_eq!(a.to_bits(), b.to_bits(), "usepow={} a={} b={}", usepow, a, b);
            }
            assert!(out.variance.iter().all(|&v| v == 0.0), "usepow={}", usepow);
        }
    }

    #[test]
    fn test_zero_variance_full_mode() {
        let spec = standard_spec(true);
        let extractor = MfccExtractor::new(spec).unwrap();
        let prop = MomentPropagator::new(spec).unwrap();
        let mean = test_mean(257, 3);
        let expected = extractor.extract(&mean).unwrap();
        let out = prop
            .propagate(&UncertainSpectrum::certain(mean), CovarianceMode::Full)
            .unwrap();
        assert!(out.mean.max_abs_diff(&expected).unwrap() < EPSILON);
        assert!(out.variance.iter().all(|&v| v.abs() < EPSILON));
    }

    // --- Periodogram stage ---

    #[test]
    fn test_power_periodogram_moments() {
        let prop = MomentPropagator::new(standard_spec(true)).unwrap();
        let mean = ComplexMatrix::filled(257, 1, Complex::new(3.0, 4.0));
        let var = Matrix::filled(257, 1, 2.0);
        let spectrum = UncertainSpectrum::new(mean, var).unwrap();
        let (mu_p, var_p) = prop.periodogram_moments(&spectrum).unwrap();
        // |mu|² + Λ = 27, Λ(2|mu|² + Λ) = 2·52 = 104
        assert!((mu_p.get(0, 0) - 27.0).abs() < EPSILON);
        assert!((var_p.get(0, 0) - 104.0).abs() < EPSILON);
    }

    #[test]
    fn test_magnitude_periodogram_moments() {
        let prop = MomentPropagator::new(standard_spec(false)).unwrap();
        let mean = ComplexMatrix::filled(257, 1, Complex::new(0.0, 0.0));
        let var = Matrix::filled(257, 1, 4.0);
        let spectrum = UncertainSpectrum::new(mean, var).unwrap();
        let (mu_p, var_p) = prop.periodogram_moments(&spectrum).unwrap();
        // Rayleigh: E|X| = sqrt(πΛ)/2, Var|X| = Λ(1 - π/4)
        let expected_mean = 0.5 * (std::f64::consts::PI * 4.0).sqrt();
        let expected_var = 4.0 * (1.0 - std::f64::consts::PI / 4.0);
        assert!((mu_p.get(5, 0) - expected_mean).abs() < 1e-6);
        assert!((var_p.get(5, 0) - expected_var).abs() < 1e-6);
    }

    #[test]
    fn test_magnitude_periodogram_moments_at_high_snr() {
        let prop = MomentPropagator::new(standard_spec(false)).unwrap();
        let mut var = Matrix::filled(257, 2, 0.01);
        var.set(3, 1, 10.0);
        let mean = ComplexMatrix::from_fn(257, 2, |_, l| {
            if l == 0 {
                Complex::new(1e4, 0.0)
            } else {
                Complex::new(0.0, 1e5)
            }
        });
        let spectrum = UncertainSpectrum::new(mean, var).unwrap();
        let (mu_p, var_p) = prop.periodogram_moments(&spectrum).unwrap();
        // Var|X| -> Λ/2 and E|X| >= |mu|
        assert!((var_p.get(3, 0) - 0.005).abs() < 1e-8, "var={}", var_p.get(3, 0));
        assert!((var_p.get(3, 1) - 5.0).abs() < 1e-6, "var={}", var_p.get(3, 1));
        assert!((var_p.get(4, 1) - 0.005).abs() < 1e-8);
        assert!(mu_p.get(3, 0) >= 1e4);
        assert!(mu_p.get(3, 1) >= 1e5);
    }

    // --- Diagonal vs full ---

    #[test]
    fn test_full_mode_mean_matches_diagonal_mode() {
        let prop = MomentPropagator::new(standard_spec(true)).unwrap();
        let spectrum = UncertainSpectrum::new(test_mean(257, 4), test_variance(257, 4)).unwrap();
        let diag = prop.propagate(&spectrum, CovarianceMode::Diagonal).unwrap();
        let full = prop.propagate(&spectrum, CovarianceMode::Full).unwrap();
        let diff = diag.mean.max_abs_diff(&full.mean).unwrap();
        assert!(diff < 1e-9, "mean diff={}", diff);
    }

    #[test]
    fn test_full_covariances_symmetric_with_non_negative_diagonal() {
        let prop = MomentPropagator::new(standard_spec(true)).unwrap();
        let spectrum = UncertainSpectrum::new(test_mean(257, 3), test_variance(257, 3)).unwrap();
        let full = prop.propagate_full(&spectrum).unwrap();
        assert_eq!(full.covariances.len(), 3);
        for cov in &full.covariances {
            assert_eq!(cov.shape(), (13, 13));
            let asym = cov.max_abs_diff(&cov.transpose()).unwrap();
            assert!(asym < 1e-9, "asymmetry={}", asym);
            assert!(cov.diagonal().iter().all(|&v| v >= 0.0));
        }
        let uncertain = full.clone().into_uncertain();
        assert_eq!(uncertain.variance, full.diagonal());
    }

    #[test]
    fn test_non_overlapping_filters_full_equals_diagonal() {
        // nfft 16 -> 9 bins; three filters with disjoint support.
        let spec = FilterbankSpec::new(8000.0, 16, 3, 2, 0.0, true).unwrap();
        let weights = Matrix::from_rows(&[
            vec![0.5, 1.0, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0, 0.3, 1.0, 0.3, 0.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.7, 1.0, 0.7],
        ])
        .unwrap();
        let fb = MelFilterbank::from_parts(spec, weights, build_dct_matrix(3, 2, 0.0)).unwrap();
        let prop = MomentPropagator::with_filterbank(Arc::new(fb));
        let spectrum = UncertainSpectrum::new(test_mean(9, 5), test_variance(9, 5)).unwrap();
        let diag = prop.propagate(&spectrum, CovarianceMode::Diagonal).unwrap();
        let full = prop.propagate(&spectrum, CovarianceMode::Full).unwrap();
        let diff = diag.variance.max_abs_diff(&full.variance).unwrap();
        assert!(diff < 1e-12, "variance diff={}", diff);
    }

    #[test]
    fn test_variance_grows_with_input_uncertainty() {
        let prop = MomentPropagator::new(standard_spec(true)).unwrap();
        let mean = test_mean(257, 2);
        let low = UncertainSpectrum::new(mean.clone(), Matrix::filled(257, 2, 0.01)).unwrap();
        let high = UncertainSpectrum::new(mean, Matrix::filled(257, 2, 1.0)).unwrap();
        let lo = prop.propagate(&low, CovarianceMode::Diagonal).unwrap();
        let hi = prop.propagate(&high, CovarianceMode::Diagonal).unwrap();
        for (a, b) in lo.variance.iter().zip(hi.variance.iter()) {
            assert!(b > a, "low={} high={}", a, b);
        }
    }

    #[test]
    fn test_stacked_layout() {
        let features = UncertainFeatures::new(Matrix::filled(13, 4, 1.0), Matrix::filled(13, 4, 2.0)).unwrap();
        let stacked = features.stacked().unwrap();
        assert_eq!(stacked.shape(), (26, 4));
        assert_eq!(stacked.get(12, 3), 1.0);
        assert_eq!(stacked.get(13, 0), 2.0);
        assert!(UncertainFeatures::new(Matrix::zeros(13, 4), Matrix::zeros(13, 3)).is_err());
    }
}
