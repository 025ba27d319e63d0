//! Deterministic MFCC extraction from a short-time spectrum.
//!
//! The processing chain is:
//! 1. Periodogram `|X|²` (or magnitude `|X|` when `usepow` is off)
//! 2. Mel filterbank `M = W·P`
//! 3. Flooring at [`MEL_FLOOR`]
//! 4. Natural logarithm
//! 5. DCT (and lifter) `C = T·log(M)`
//!
//! # Example
//!
//! ```
//! use upfe_core::extractor::MfccExtractor;
//! use upfe_core::filterbank::FilterbankSpec;
//! use upfe_core::matrix::ComplexMatrix;
//! use upfe_core::types::Complex;
//!
//! let spec = FilterbankSpec::new(16000.0, 512, 26, 12, 22.0, true).unwrap();
//! let extractor = MfccExtractor::new(spec).unwrap();
//!
//! // 257 bins, 4 frames of a flat spectrum
//! let x = ComplexMatrix::filled(257, 4, Complex::new(1.0, 0.0));
//! let c = extractor.extract(&x).unwrap();
//! assert_eq!(c.shape(), (13, 4));
//! ```

use std::sync::Arc;

use crate::filterbank::{FilterbankSpec, MelFilterbank};
use crate::matrix::{ComplexMatrix, Matrix};
use crate::types::{FeatureError, FeatureResult};

/// Lower bound applied to mel energies before the logarithm.
pub const MEL_FLOOR: f64 = 1e-6;

/// MFCC feature extractor.
///
/// Holds a shared, read-only [`MelFilterbank`]; cloning the extractor is
/// cheap and clones share the same matrices.
#[derive(Debug, Clone)]
pub struct MfccExtractor {
    filterbank: Arc<MelFilterbank>,
}

impl MfccExtractor {
    /// Build the filterbank for `spec` and wrap it in an extractor.
    pub fn new(spec: FilterbankSpec) -> FeatureResult<Self> {
        Ok(Self::with_filterbank(Arc::new(MelFilterbank::new(spec)?)))
    }

    /// Share an existing filterbank.
    pub fn with_filterbank(filterbank: Arc<MelFilterbank>) -> Self {
        Self { filterbank }
    }

    pub fn filterbank(&self) -> &Arc<MelFilterbank> {
        &self.filterbank
    }

    pub fn spec(&self) -> &FilterbankSpec {
        self.filterbank.spec()
    }

    /// Extract `[numceps+1, L]` cepstra from a `[nfft/2+1, L]` spectrum.
    pub fn extract(&self, x: &ComplexMatrix) -> FeatureResult<Matrix> {
        let log_m = self.log_mel(x)?;
        self.filterbank.dct().matmul(&log_m)
    }

    /// Floored log mel energies `log(max(W·P, floor))`, `[numchans, L]`.
    pub fn log_mel(&self, x: &ComplexMatrix) -> FeatureResult<Matrix> {
        check_bins(self.spec(), x.rows(), x.cols(), "MfccExtractor::extract")?;
        let p = if self.spec().usepow {
            x.norm_sqr()
        } else {
            x.norm()
        };
        let m = self.filterbank.weights().matmul(&p)?;
        Ok(m.map(|e| e.max(MEL_FLOOR).ln()))
    }
}

/// Fail unless a spectrum has exactly `nfft/2+1` rows.
pub(crate) fn check_bins(
    spec: &FilterbankSpec,
    rows: usize,
    cols: usize,
    context: &'static str,
) -> FeatureResult<()> {
    if rows != spec.num_bins() {
        return Err(FeatureError::shape(context, (spec.num_bins(), cols), (rows, cols)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Complex;

    const EPSILON: f64 = 1e-9;

    fn standard_extractor() -> MfccExtractor {
        let spec = FilterbankSpec::new(16000.0, 512, 26, 12, 22.0, true).unwrap();
        MfccExtractor::new(spec).unwrap()
    }

    /// A single-bin "sinusoid" per frame, with the bin drifting upward.
    fn sinusoid_spectrum(bins: usize, frames: usize) -> ComplexMatrix {
        ComplexMatrix::from_fn(bins, frames, |k, l| {
            if k == 20 + 3 * l {
                Complex::new(30.0, -12.0)
            } else {
                Complex::new(0.01, 0.0)
            }
        })
    }

    #[test]
    fn test_extract_shape() {
        let ex = standard_extractor();
        let x = sinusoid_spectrum(257, 7);
        let c = ex.extract(&x).unwrap();
        assert_eq!(c.shape(), (13, 7));
    }

    #[test]
    fn test_extract_rejects_wrong_bin_count() {
        let ex = standard_extractor();
        let x = ComplexMatrix::filled(256, 3, Complex::new(1.0, 0.0));
        assert!(matches!(ex.extract(&x), Err(FeatureError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_extract_is_reproducible_bit_for_bit() {
        let ex = standard_extractor();
        let x = sinusoid_spectrum(257, 5);
        let a = ex.extract(&x).unwrap();
        let b = ex.extract(&x).unwrap();
        for (va, vb) in a.iter().zip(b.iter()) {
            assert_eq!(va.to_bits(), vb.to_bits());
        }
    }

    #[test]
    fn test_zero_spectrum_hits_floor() {
        // Every mel energy floors to 1e-6; with ceplifter 0, c0 = sqrt(2/N)·N·ln(1e-6).
        let spec = FilterbankSpec::new(16000.0, 512, 26, 12, 0.0, true).unwrap();
        let ex = MfccExtractor::new(spec).unwrap();
        let x = ComplexMatrix::filled(257, 2, Complex::new(0.0, 0.0));
        let c = ex.extract(&x).unwrap();
        let expected_c0 = (2.0f64 / 26.0).sqrt() * 26.0 * MEL_FLOOR.ln();
        assert!((c.get(0, 0) - expected_c0).abs() < 1e-9, "c0={}", c.get(0, 0));
        for k in 1..13 {
            assert!(c.get(k, 1).abs() < 1e-9, "c{}={}", k, c.get(k, 1));
        }
    }

    #[test]
    fn test_magnitude_vs_power_domain() {
        // Constant spectrum: W·|X|² = |X|²·rowsum(W) and W·|X| = |X|·rowsum(W).
        let power = MfccExtractor::new(FilterbankSpec::new(16000.0, 512, 26, 12, 0.0, true).unwrap())
            .unwrap();
        let magnitude =
            MfccExtractor::new(FilterbankSpec::new(16000.0, 512, 26, 12, 0.0, false).unwrap())
                .unwrap();
        let x = ComplexMatrix::filled(257, 1, Complex::new(3.0, 4.0));
        let lp = power.log_mel(&x).unwrap();
        let lm = magnitude.log_mel(&x).unwrap();
        // log(25·s) - log(5·s) = log 5
        for m in 0..26 {
            assert!((lp.get(m, 0) - lm.get(m, 0) - 5.0f64.ln()).abs() < EPSILON);
        }
    }

    #[test]
    fn test_cepstrum_matches_dct_of_log_mel() {
        let ex = standard_extractor();
        let x = sinusoid_spectrum(257, 3);
        let log_m = ex.log_mel(&x).unwrap();
        let c = ex.extract(&x).unwrap();
        let expected = ex.filterbank().dct().matmul(&log_m).unwrap();
        assert!(c.max_abs_diff(&expected).unwrap() < EPSILON);
    }

    #[test]
    fn test_clones_share_filterbank() {
        let ex = standard_extractor();
        let copy = ex.clone();
        assert!(Arc::ptr_eq(ex.filterbank(), copy.filterbank()));
    }
}
