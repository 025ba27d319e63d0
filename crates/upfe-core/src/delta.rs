//! Regression deltas over the frame axis
//!
//! ```text
//!   y[i,t] = Σ_{w=-W..W} weight[w] · x[i, clamp(t+w, 0, L-1)] / (2·Σ_{k=1..W} k²)
//! ```
//!
//! Edge frames are replicated, not zero padded. With `weighted` the weights
//! are the signed offsets `w`, otherwise the step `sign(w)`.

use serde::{Deserialize, Serialize};

use crate::matrix::Matrix;
use crate::propagation::UncertainFeatures;
use crate::types::{FeatureError, FeatureResult};

/// Delta regression window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaWindow {
    /// Half-width, at least 1.
    pub window: usize,
    /// Regression weights `w` instead of unit steps.
    pub weighted: bool,
}

impl Default for DeltaWindow {
    fn default() -> Self {
        Self {
            window: 2,
            weighted: true,
        }
    }
}

impl DeltaWindow {
    pub fn new(window: usize, weighted: bool) -> FeatureResult<Self> {
        let win = Self { window, weighted };
        win.validate()?;
        Ok(win)
    }

    pub fn validate(&self) -> FeatureResult<()> {
        if self.window == 0 {
            return Err(FeatureError::InvalidWindow(self.window));
        }
        Ok(())
    }

    /// `(offset, weight)` pairs for `offset = -window..=window`.
    pub fn taps(&self) -> Vec<(isize, f64)> {
        let w = self.window as isize;
        (-w..=w)
            .map(|offset| {
                let weight = if self.weighted {
                    offset as f64
                } else {
                    offset.signum() as f64
                };
                (offset, weight)
            })
            .collect()
    }

    /// `2·Σ_{k=1..window} k²`
    pub fn denominator(&self) -> f64 {
        2.0 * (1..=self.window).map(|k| (k * k) as f64).sum::<f64>()
    }
}

/// Delta features of `x` (`[coefficients, frames]`).
pub fn deltas(x: &Matrix, window: DeltaWindow) -> FeatureResult<Matrix> {
    weighted_sum(x, window, |weight| weight / window.denominator())
}

/// Deltas of uncertain features. The mean goes through [`deltas`]; frames
/// are taken as independent, so the variance is `Σ weight² · var_x / denom²`.
pub fn deltas_up(x: &UncertainFeatures, window: DeltaWindow) -> FeatureResult<UncertainFeatures> {
    let denom = window.denominator();
    let mean = deltas(&x.mean, window)?;
    let variance = weighted_sum(&x.variance, window, |weight| weight * weight / (denom * denom))?;
    UncertainFeatures::new(mean, variance)
}

fn weighted_sum(x: &Matrix, window: DeltaWindow, coeff: impl Fn(f64) -> f64) -> FeatureResult<Matrix> {
    window.validate()?;
    let frames = x.cols();
    if frames == 0 {
        return Ok(Matrix::zeros(x.rows(), 0));
    }
    let last = frames as isize - 1;
    let taps: Vec<(isize, f64)> = window
        .taps()
        .into_iter()
        .map(|(offset, weight)| (offset, coeff(weight)))
        .filter(|&(_, c)| c != 0.0)
        .collect();

    let mut y = Matrix::zeros(x.rows(), frames);
    for i in 0..x.rows() {
        let row = x.row(i);
        let out = y.row_mut(i);
        for (t, o) in out.iter_mut().enumerate() {
            *o = taps
                .iter()
                .map(|&(offset, c)| {
                    let idx = (t as isize + offset).clamp(0, last) as usize;
                    c * row[idx]
                })
                .sum::<f64>();
        }
    }
    Ok(y)
}
