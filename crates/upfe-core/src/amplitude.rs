//! Amplitude estimators for magnitude-domain propagation
//!
//! When features are computed on `|X|` instead of `|X|²`, the expected
//! amplitude of an uncertain bin has no polynomial closed form. The
//! propagator delegates it to an [`AmplitudeEstimator`] so that alternate
//! estimators can be swapped in without touching the filterbank, log or DCT
//! stages.
//!
//! The default, [`MmseStsa`], is the minimum mean-square-error short-time
//! spectral amplitude estimate: the mean of the Rician distribution of `|X|`
//! for `X ~ CN(mu, lambda)`,
//!
//! ```text
//!   E|X| = sqrt(pi·lambda)/2 · e^(-v/2) · [ (1+v)·I0(v/2) + v·I1(v/2) ],   v = |mu|²/lambda
//! ```
//!
//! evaluated with exponentially scaled Bessel functions so large `v` never
//! overflows. Above [`HIGH_SNR_RATIO`] the mean and the variance of `|X|` both
//! come from their asymptotic series in `1/v`; the variance is never formed as
//! the difference `|mu|² + lambda - (E|X|)²` there.

use std::f64::consts::PI;

use crate::types::Complex;

/// Strategy mapping a complex Gaussian bin `(mean, variance)` to an
/// amplitude estimate.
pub trait AmplitudeEstimator: Send + Sync {
    /// Estimated amplitude of a bin with complex `mean` and `variance`.
    fn estimate(&self, mean: Complex, variance: f64) -> f64;

    /// Mean and variance of the amplitude.
    ///
    /// The default derives the variance from `E|X|² = |mean|² + variance`,
    /// clamped at zero.
    fn moments(&self, mean: Complex, variance: f64) -> (f64, f64) {
        let amplitude = self.estimate(mean, variance);
        if variance <= 0.0 {
            return (amplitude, 0.0);
        }
        let spread = mean.norm_sqr() + variance - amplitude * amplitude;
        (amplitude, spread.max(0.0))
    }

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Per-bin SNR `|mu|²/lambda` from which the asymptotic Rician series is used.
pub const HIGH_SNR_RATIO: f64 = 20.0;

/// MMSE-STSA amplitude estimator (Rician mean).
#[derive(Debug, Clone, Copy, Default)]
pub struct MmseStsa;

impl AmplitudeEstimator for MmseStsa {
    fn estimate(&self, mean: Complex, variance: f64) -> f64 {
        rician_mean(mean.norm(), variance)
    }

    fn moments(&self, mean: Complex, variance: f64) -> (f64, f64) {
        let amplitude = mean.norm();
        (rician_mean(amplitude, variance), rician_variance(amplitude, variance))
    }

    fn name(&self) -> &'static str {
        "mmse-stsa"
    }
}

/// Mean of `|X|` for `X ~ CN(mu, lambda)` where `amplitude = |mu|`.
pub fn rician_mean(amplitude: f64, variance: f64) -> f64 {
    if variance <= 0.0 {
        return amplitude;
    }
    let v = amplitude * amplitude / variance;
    if v >= HIGH_SNR_RATIO {
        let e = v.recip();
        return amplitude
            * (1.0 + e * (1.0 / 4.0 + e * (1.0 / 32.0 + e * (3.0 / 128.0 + e * 75.0 / 2048.0))));
    }
    let half = 0.5 * v;
    0.5 * (PI * variance).sqrt() * ((1.0 + v) * bessel_i0e(half) + v * bessel_i1e(half))
}

/// Variance of `|X|` for `X ~ CN(mu, lambda)` where `amplitude = |mu|`.
///
/// Tends to `lambda/2` as the SNR grows.
pub fn rician_variance(amplitude: f64, variance: f64) -> f64 {
    if variance <= 0.0 {
        return 0.0;
    }
    let v = amplitude * amplitude / variance;
    if v >= HIGH_SNR_RATIO {
        let e = v.recip();
        return variance * (0.5 - e * (1.0 / 8.0 + e * (1.0 / 16.0 + e * 11.0 / 128.0)));
    }
    let mean = rician_mean(amplitude, variance);
    (amplitude * amplitude + variance - mean * mean).max(0.0)
}

/// `e^{-|x|}·I0(x)`, Abramowitz & Stegun 9.8.1 / 9.8.2.
pub fn bessel_i0e(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 3.75 {
        let t = (x / 3.75).powi(2);
        let i0 = 1.0
            + t * (3.5156229
                + t * (3.0899424
                    + t * (1.2067492 + t * (0.2659732 + t * (0.0360768 + t * 0.0045813)))));
        i0 * (-ax).exp()
    } else {
        let t = 3.75 / ax;
        (0.39894228
            + t * (0.01328592
                + t * (0.00225319
                    + t * (-0.00157565
                        + t * (0.00916281
                            + t * (-0.02057706
                                + t * (0.02635537 + t * (-0.01647633 + t * 0.00392377))))))))
            / ax.sqrt()
    }
}

/// `e^{-|x|}·I1(x)`, Abramowitz & Stegun 9.8.3 / 9.8.4.
pub fn bessel_i1e(x: f64) -> f64 {
    let ax = x.abs();
    let value = if ax < 3.75 {
        let t = (x / 3.75).powi(2);
        let i1 = ax
            * (0.5
                + t * (0.87890594
                    + t * (0.51498869
                        + t * (0.15084934 + t * (0.02658733 + t * (0.00301532 + t * 0.00032411))))));
        i1 * (-ax).exp()
    } else {
        let t = 3.75 / ax;
        (0.39894228
            + t * (-0.03988024
                + t * (-0.00362018
                    + t * (0.00163801
                        + t * (-0.01031555
                            + t * (0.02282967
                                + t * (-0.02895312 + t * (0.01787654 - t * 0.00420059))))))))
            / ax.sqrt()
    };
    if x < 0.0 {
        -value
    } else {
        value
    }
}
