//! Utterance-level cepstral mean subtraction.

use crate::matrix::Matrix;
use crate::propagation::UncertainFeatures;
use crate::types::FeatureResult;

/// Subtract each row's mean over frames.
pub fn cms(x: &Matrix) -> Matrix {
    let means = x.row_means();
    Matrix::from_fn(x.rows(), x.cols(), |i, t| x.get(i, t) - means[i])
}

/// Mean subtraction with variance propagation.
///
/// The subtracted mean is itself uncertain and correlated with each frame it
/// is removed from:
///
/// ```text
///   mu_y    = mu_x - mean(mu_x)
///   Sigma_y = Sigma_x + mean(Sigma_x)/L - 2·Sigma_x/L
/// ```
pub fn cms_up(features: &UncertainFeatures) -> FeatureResult<UncertainFeatures> {
    let mean = cms(&features.mean);
    let var_x = &features.variance;
    let frames = var_x.cols();
    if frames == 0 {
        return UncertainFeatures::new(mean, var_x.clone());
    }
    let n = frames as f64;
    let var_means = var_x.row_means();
    let variance = Matrix::from_fn(var_x.rows(), frames, |i, t| {
        let v = var_x.get(i, t);
        v + var_means[i] / n - 2.0 * v / n
    });
    UncertainFeatures::new(mean, variance)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-12;

    #[test]
    fn test_cms_zero_row_mean() {
        let x = Matrix::from_fn(5, 17, |i, t| (i as f64 + 1.0) * (t as f64 * 0.3).sin() + i as f64);
        let y = cms(&x);
        for m in y.row_means() {
            assert!(m.abs() < EPSILON, "row mean {}", m);
        }
    }

    #[test]
    fn test_cms_single_frame_is_zero() {
        let y = cms(&Matrix::filled(3, 1, 4.0));
        assert!(y.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_cms_preserves_shape_on_empty() {
        let y = cms(&Matrix::zeros(4, 0));
        assert_eq!(y.shape(), (4, 0));
    }

    #[test]
    fn test_cms_up_mean_and_variance() {
        let mean = Matrix::from_rows(&[vec![1.0, 2.0, 6.0, 3.0]]).unwrap();
        let var = Matrix::from_rows(&[vec![0.4, 0.8, 1.2, 1.6]]).unwrap();
        let out = cms_up(&UncertainFeatures::new(mean, var).unwrap()).unwrap();
        assert!(out.mean.row_means()[0].abs() < EPSILON);
        assert!((out.mean.get(0, 2) - 3.0).abs() < EPSILON);
        // mean(var) = 1.0, L = 4: v + 0.25 - v/2
        for (t, &v) in [0.4, 0.8, 1.2, 1.6].iter().enumerate() {
            let expected = v + 0.25 - v / 2.0;
            assert!((out.variance.get(0, t) - expected).abs() < EPSILON);
        }
    }

    #[test]
    fn test_cms_up_constant_variance() {
        // Equal variances s: s(1 - 1/L)
        let mean = Matrix::zeros(2, 10);
        let var = Matrix::filled(2, 10, 2.0);
        let out = cms_up(&UncertainFeatures::new(mean, var).unwrap()).unwrap();
        assert!(out.variance.iter().all(|&v| (v - 1.8).abs() < EPSILON));
    }
}
