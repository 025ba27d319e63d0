//! Parallel batch drivers (rayon).
//!
//! Enable with the `parallel` feature flag:
//!
//! ```toml
//! [dependencies]
//! upfe-core = { version = "0.1", features = ["parallel"] }
//! ```
//!
//! Utterances are independent and the filterbank is shared read-only, so a
//! batch is processed with one task per utterance and no locking. Monte
//! Carlo runs are split into independently seeded chunks whose moments are
//! merged at the end.

use rayon::prelude::*;
use tracing::info;

use crate::extractor::MfccExtractor;
use crate::matrix::{ComplexMatrix, Matrix};
use crate::montecarlo::{MonteCarloValidator, NullProgress};
use crate::propagation::{CovarianceMode, MomentPropagator, UncertainFeatures, UncertainSpectrum};
use crate::types::FeatureResult;

/// Extract cepstra for many utterances in parallel.
pub fn extract_batch(
    extractor: &MfccExtractor,
    spectra: &[ComplexMatrix],
) -> FeatureResult<Vec<Matrix>> {
    spectra.par_iter().map(|x| extractor.extract(x)).collect()
}

/// Propagate moments for many utterances in parallel.
pub fn propagate_batch(
    propagator: &MomentPropagator,
    spectra: &[UncertainSpectrum],
    mode: CovarianceMode,
) -> FeatureResult<Vec<UncertainFeatures>> {
    spectra
        .par_iter()
        .map(|s| propagator.propagate(s, mode))
        .collect()
}

/// Monte Carlo validation with `chunks` parallel workers.
///
/// Chunk `i` draws with seed `seed + i`, so the result is reproducible for a
/// fixed chunk count but differs from [`MonteCarloValidator::validate`].
pub fn validate_parallel(
    validator: &MonteCarloValidator,
    spectrum: &UncertainSpectrum,
    chunks: usize,
) -> FeatureResult<UncertainFeatures> {
    let config = *validator.config();
    let chunks = chunks.clamp(1, config.max_samples);
    let base = config.max_samples / chunks;
    let extra = config.max_samples % chunks;
    info!(
        chunks,
        max_samples = config.max_samples,
        max_simult_samples = config.max_simult_samples,
        "starting parallel monte carlo validation"
    );

    let partials = (0..chunks)
        .into_par_iter()
        .map(|i| {
            let draws = base + usize::from(i < extra);
            let seed = config.seed.wrapping_add(i as u64);
            validator.accumulate(spectrum, draws, seed, &mut NullProgress)
        })
        .collect::<FeatureResult<Vec<_>>>()?;

    let mut partials = partials.into_iter();
    let first = match partials.next() {
        Some(first) => first,
        None => return validator.validate(spectrum),
    };
    let merged = partials.try_fold(first, |acc, part| acc.merge(part))?;
    merged.finish(config.max_simult_samples)
}
