//! Mel filterbank and DCT construction
//!
//! A [`MelFilterbank`] is built once per [`FilterbankSpec`] and shared
//! read-only by every extractor and propagator that uses it:
//!
//! - `W` (`numchans × nfft/2+1`): triangular filters whose edges are
//!   equally spaced on the mel scale `1127·ln(1 + f/700)` between 0 Hz and
//!   the Nyquist frequency.
//! - `T` (`numceps+1 × numchans`): orthonormal-scaled DCT-II basis,
//!   optionally liftered with `1 + (L/2)·sin(c·π/L)`.
//!
//! ```text
//!  weight
//!   1 |      /\      /\       /\
//!     |     /  \    /  \     /  \
//!     |    /    \  /    \   /    \
//!   0 +---/------\/------\-/------\------> freq
//!      f0   f1   f2   f3  f4   ...
//! ```
//!
//! ## Example
//!
//! ```rust
//! use upfe_core::filterbank::{FilterbankSpec, MelFilterbank};
//!
//! let spec = FilterbankSpec::new(16000.0, 512, 26, 12, 22.0, true).unwrap();
//! let fb = MelFilterbank::new(spec).unwrap();
//! assert_eq!(fb.weights().shape(), (26, 257));
//! assert_eq!(fb.dct().shape(), (13, 26));
//! ```

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::matrix::Matrix;
use crate::types::{FeatureError, FeatureResult};

/// Immutable filterbank parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterbankSpec {
    /// Sampling frequency in Hz.
    pub sample_freq: f64,
    /// FFT length used by the spectral analysis (power of two).
    pub nfft: usize,
    /// Number of mel channels.
    pub numchans: usize,
    /// Index of the highest cepstral coefficient; `numceps + 1` rows are
    /// produced (c0 included).
    pub numceps: usize,
    /// Lifter constant, 0 disables liftering.
    pub ceplifter: f64,
    /// Power spectrum (`|X|²`) when true, magnitude spectrum (`|X|`) otherwise.
    pub usepow: bool,
}

impl FilterbankSpec {
    /// Create and validate a spec.
    pub fn new(
        sample_freq: f64,
        nfft: usize,
        numchans: usize,
        numceps: usize,
        ceplifter: f64,
        usepow: bool,
    ) -> FeatureResult<Self> {
        let spec = Self {
            sample_freq,
            nfft,
            numchans,
            numceps,
            ceplifter,
            usepow,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> FeatureResult<()> {
        if !(self.sample_freq.is_finite() && self.sample_freq > 0.0) {
            return Err(FeatureError::InvalidConfig(format!(
                "sample_freq must be positive, got {}",
                self.sample_freq
            )));
        }
        if self.nfft < 2 || !self.nfft.is_power_of_two() {
            return Err(FeatureError::InvalidConfig(format!(
                "nfft must be a power of two >= 2, got {}",
                self.nfft
            )));
        }
        if self.numchans < 1 {
            return Err(FeatureError::InvalidConfig(
                "numchans must be at least 1".to_string(),
            ));
        }
        if !(self.ceplifter.is_finite() && self.ceplifter >= 0.0) {
            return Err(FeatureError::InvalidConfig(format!(
                "ceplifter must be non-negative, got {}",
                self.ceplifter
            )));
        }
        Ok(())
    }

    /// Number of non-negative frequency bins, `nfft/2 + 1`.
    pub fn num_bins(&self) -> usize {
        self.nfft / 2 + 1
    }

    /// Number of output coefficients, `numceps + 1`.
    pub fn num_coefficients(&self) -> usize {
        self.numceps + 1
    }
}

/// Pre-computed filterbank weights `W` and DCT matrix `T`.
#[derive(Debug, Clone)]
pub struct MelFilterbank {
    spec: FilterbankSpec,
    weights: Matrix,
    dct: Matrix,
}

impl MelFilterbank {
    /// Build `W` and `T` for `spec`.
    pub fn new(spec: FilterbankSpec) -> FeatureResult<Self> {
        spec.validate()?;
        let centers = mel_center_frequencies(spec.sample_freq, spec.numchans);
        let weights = build_mel_weights(&centers, spec.sample_freq, spec.nfft)?;
        let dct = build_dct_matrix(spec.numchans, spec.numceps, spec.ceplifter);
        debug!(
            sample_freq = spec.sample_freq,
            nfft = spec.nfft,
            numchans = spec.numchans,
            numceps = spec.numceps,
            ceplifter = spec.ceplifter,
            "mel filterbank built"
        );
        Ok(Self { spec, weights, dct })
    }

    /// Assemble a filterbank from externally computed matrices.
    ///
    /// `weights` must be `numchans × nfft/2+1` and non-negative, `dct` must be
    /// `numceps+1 × numchans`.
    pub fn from_parts(spec: FilterbankSpec, weights: Matrix, dct: Matrix) -> FeatureResult<Self> {
        spec.validate()?;
        let expected_w = (spec.numchans, spec.num_bins());
        if weights.shape() != expected_w {
            return Err(FeatureError::shape(
                "MelFilterbank weights",
                expected_w,
                weights.shape(),
            ));
        }
        let expected_t = (spec.num_coefficients(), spec.numchans);
        if dct.shape() != expected_t {
            return Err(FeatureError::shape("MelFilterbank dct", expected_t, dct.shape()));
        }
        if weights.iter().any(|&w| !(w >= 0.0)) {
            return Err(FeatureError::InvalidConfig(
                "filterbank weights must be non-negative".to_string(),
            ));
        }
        Ok(Self { spec, weights, dct })
    }

    pub fn spec(&self) -> &FilterbankSpec {
        &self.spec
    }

    /// Mel weight matrix `W`.
    pub fn weights(&self) -> &Matrix {
        &self.weights
    }

    /// DCT (and lifter) matrix `T`.
    pub fn dct(&self) -> &Matrix {
        &self.dct
    }
}

/// Convert a frequency in Hz to the mel scale, `1127·ln(1 + hz/700)`.
pub fn hz_to_mel(hz: f64) -> f64 {
    1127.0 * (1.0 + hz / 700.0).ln()
}

/// Inverse of [`hz_to_mel`].
pub fn mel_to_hz(mel: f64) -> f64 {
    700.0 * ((mel / 1127.0).exp() - 1.0)
}

/// `numchans + 2` filter edge/center frequencies in Hz, equally spaced in mel
/// over `[0, sample_freq/2]`.
pub fn mel_center_frequencies(sample_freq: f64, numchans: usize) -> Vec<f64> {
    let num_points = numchans + 2;
    let mel_high = hz_to_mel(0.5 * sample_freq);
    (0..num_points)
        .map(|i| mel_to_hz(mel_high * i as f64 / (num_points - 1) as f64))
        .collect()
}

/// Triangular weights for the filters described by `centers`.
///
/// Filter `m` (0-based) rises over `[centers[m], centers[m+1]]` and falls over
/// `[centers[m+1], centers[m+2]]`. Bin `k` sits at `k·fs/nfft`.
pub fn build_mel_weights(centers: &[f64], sample_freq: f64, nfft: usize) -> FeatureResult<Matrix> {
    if centers.len() < 3 {
        return Err(FeatureError::InvalidConfig(
            "need at least three filter edges".to_string(),
        ));
    }
    for pair in centers.windows(2) {
        let width = pair[1] - pair[0];
        if !(width > 0.0) || !width.is_finite() {
            return Err(FeatureError::InvalidConfig(format!(
                "degenerate filter edges {} Hz and {} Hz",
                pair[0], pair[1]
            )));
        }
    }

    let numchans = centers.len() - 2;
    let num_bins = nfft / 2 + 1;
    let mut weights = Matrix::zeros(numchans, num_bins);
    for m in 1..=numchans {
        let (lo, mid, hi) = (centers[m - 1], centers[m], centers[m + 1]);
        let row = weights.row_mut(m - 1);
        for (k, w) in row.iter_mut().enumerate() {
            let freq = k as f64 * sample_freq / nfft as f64;
            *w = if freq >= lo && freq <= mid {
                (freq - lo) / (mid - lo)
            } else if freq >= mid && freq <= hi {
                1.0 - (freq - mid) / (hi - mid)
            } else {
                0.0
            };
        }
    }
    Ok(weights)
}

/// DCT-II matrix `T[c,n] = sqrt(2/N)·cos(π/N·c·(n+0.5))`, rows scaled by the
/// sinusoidal lifter when `ceplifter > 0`.
pub fn build_dct_matrix(numchans: usize, numceps: usize, ceplifter: f64) -> Matrix {
    let n_chans = numchans as f64;
    let scale = (2.0 / n_chans).sqrt();
    let mut dct = Matrix::from_fn(numceps + 1, numchans, |c, n| {
        scale * (PI / n_chans * c as f64 * (n as f64 + 0.5)).cos()
    });
    if ceplifter > 0.0 {
        for c in 0..=numceps {
            let lift = lifter_factor(c, ceplifter);
            for v in dct.row_mut(c) {
                *v *= lift;
            }
        }
    }
    dct
}

/// Sinusoidal lifter gain for coefficient `c`.
pub fn lifter_factor(c: usize, ceplifter: f64) -> f64 {
    1.0 + 0.5 * ceplifter * (c as f64 * PI / ceplifter).sin()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    fn standard_spec() -> FilterbankSpec {
        FilterbankSpec::new(16000.0, 512, 26, 12, 22.0, true).unwrap()
    }

    // --- Hz / Mel conversion ---

    #[test]
    fn test_mel_roundtrip() {
        for &freq in &[0.0, 300.0, 1000.0, 4000.0, 8000.0] {
            let roundtrip = mel_to_hz(hz_to_mel(freq));
            assert!((roundtrip - freq).abs() < 1e-6, "freq={}, roundtrip={}", freq, roundtrip);
        }
    }

    #[test]
    fn test_mel_of_1000_hz() {
        // 1127 * ln(1 + 1000/700) ~= 1000.0
        let mel = hz_to_mel(1000.0);
        assert!((mel - 1000.0).abs() < 0.1, "mel={}", mel);
    }

    #[test]
    fn test_centers_monotonic_and_span_nyquist() {
        let centers = mel_center_frequencies(16000.0, 26);
        assert_eq!(centers.len(), 28);
        assert!(centers[0].abs() < EPSILON);
        assert!((centers[27] - 8000.0).abs() < 1e-6, "last={}", centers[27]);
        for i in 1..centers.len() {
            assert!(centers[i] > centers[i - 1], "not monotonic at {}", i);
        }
    }

    // --- FilterbankSpec validation ---

    #[test]
    fn test_spec_rejects_bad_values() {
        assert!(FilterbankSpec::new(0.0, 512, 26, 12, 22.0, true).is_err());
        assert!(FilterbankSpec::new(-8000.0, 512, 26, 12, 22.0, true).is_err());
        assert!(FilterbankSpec::new(16000.0, 500, 26, 12, 22.0, true).is_err());
        assert!(FilterbankSpec::new(16000.0, 512, 0, 12, 22.0, true).is_err());
        assert!(FilterbankSpec::new(16000.0, 512, 26, 12, -1.0, true).is_err());
    }

    #[test]
    fn test_degenerate_edges_rejected() {
        let result = build_mel_weights(&[0.0, 100.0, 100.0, 200.0], 16000.0, 512);
        assert!(matches!(result, Err(FeatureError::InvalidConfig(_))));
    }

    // --- Weight matrix ---

    #[test]
    fn test_weights_dimensions() {
        let fb = MelFilterbank::new(standard_spec()).unwrap();
        assert_eq!(fb.weights().shape(), (26, 257));
        assert_eq!(fb.dct().shape(), (13, 26));
    }

    #[test]
    fn test_weights_non_negative_and_contiguous() {
        for &(fs, nfft, chans) in &[(16000.0, 512, 26), (8000.0, 256, 23), (16000.0, 128, 12)] {
            let spec = FilterbankSpec::new(fs, nfft, chans, 12, 0.0, true).unwrap();
            let fb = MelFilterbank::new(spec).unwrap();
            for m in 0..chans {
                let row = fb.weights().row(m);
                assert!(row.iter().all(|&w| w >= 0.0), "negative weight in filter {}", m);
                let support: Vec<usize> = row
                    .iter()
                    .enumerate()
                    .filter(|&(_, &w)| w > 0.0)
                    .map(|(k, _)| k)
                    .collect();
                for pair in support.windows(2) {
                    assert_eq!(pair[1], pair[0] + 1, "filter {} support has a gap", m);
                }
            }
        }
    }

    #[test]
    fn test_weights_bounded_by_one() {
        let fb = MelFilterbank::new(standard_spec()).unwrap();
        assert!(fb.weights().iter().all(|&w| w <= 1.0 + EPSILON));
    }

    #[test]
    fn test_interior_bins_partition_of_unity() {
        // Between the first and last filter centers, adjacent ramps sum to one.
        let spec = standard_spec();
        let fb = MelFilterbank::new(spec).unwrap();
        let centers = mel_center_frequencies(spec.sample_freq, spec.numchans);
        for k in 0..spec.num_bins() {
            let freq = k as f64 * spec.sample_freq / spec.nfft as f64;
            if freq > centers[1] && freq < centers[spec.numchans] {
                let total: f64 = (0..spec.numchans).map(|m| fb.weights().get(m, k)).sum();
                assert!((total - 1.0).abs() < 1e-9, "bin {} total={}", k, total);
            }
        }
    }

    // --- DCT ---

    #[test]
    fn test_dct_without_lifter() {
        let t = build_dct_matrix(8, 4, 0.0);
        let scale = (2.0f64 / 8.0).sqrt();
        for n in 0..8 {
            assert!((t.get(0, n) - scale).abs() < EPSILON);
        }
        let expected = scale * (PI / 8.0 * 2.0 * 3.5).cos();
        assert!((t.get(2, 3) - expected).abs() < EPSILON);
    }

    #[test]
    fn test_dct_rows_orthogonal() {
        let t = build_dct_matrix(20, 12, 0.0);
        for a in 1..13 {
            for b in 1..13 {
                let dot: f64 = t.row(a).iter().zip(t.row(b)).map(|(x, y)| x * y).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-9, "rows {} {} dot={}", a, b, dot);
            }
        }
    }

    #[test]
    fn test_lifter_scaling() {
        let plain = build_dct_matrix(26, 12, 0.0);
        let lifted = build_dct_matrix(26, 12, 22.0);
        for c in 0..13 {
            let lift = 1.0 + 11.0 * (c as f64 * PI / 22.0).sin();
            for n in 0..26 {
                assert!((lifted.get(c, n) - lift * plain.get(c, n)).abs() < EPSILON);
            }
        }
        // c0 is never scaled
        assert!((lifter_factor(0, 22.0) - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_from_parts_checks_shapes() {
        let spec = FilterbankSpec::new(16000.0, 16, 2, 1, 0.0, true).unwrap();
        let good_w = Matrix::zeros(2, 9);
        let good_t = build_dct_matrix(2, 1, 0.0);
        assert!(MelFilterbank::from_parts(spec, good_w.clone(), good_t.clone()).is_ok());
        assert!(MelFilterbank::from_parts(spec, Matrix::zeros(2, 8), good_t.clone()).is_err());
        assert!(MelFilterbank::from_parts(spec, good_w, Matrix::zeros(3, 2)).is_err());
        let mut negative = Matrix::zeros(2, 9);
        negative.set(0, 0, -0.5);
        assert!(MelFilterbank::from_parts(spec, negative, good_t).is_err());
    }
}
