//! Monte Carlo validation of the analytic propagator
//!
//! The validator draws complex Gaussian spectra around the mean, runs the
//! deterministic extractor on each draw and accumulates the first two raw
//! moments of the cepstra. Comparing the result with
//! [`MomentPropagator`](crate::propagation::MomentPropagator) checks the
//! closed-form moment matching.
//!
//! Draws are produced by a [`SampleStream`], a finite iterator seeded from
//! [`MonteCarloConfig::seed`]. The same seed always yields the same draws.
//! To amortise per-draw overhead each draw holds `max_simult_samples`
//! independent copies of the spectrum tiled along the frame axis; the copies
//! are averaged back together once the loop finishes.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::extractor::MfccExtractor;
use crate::matrix::{ComplexMatrix, Matrix};
use crate::propagation::{UncertainFeatures, UncertainSpectrum};
use crate::types::{Complex, FeatureError, FeatureResult};

/// Monte Carlo run parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    /// Number of draws.
    pub max_samples: usize,
    /// Copies of the spectrum evaluated per draw.
    pub max_simult_samples: usize,
    /// RNG seed.
    pub seed: u64,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            max_samples: 1000,
            max_simult_samples: 1,
            seed: 0,
        }
    }
}

impl MonteCarloConfig {
    pub fn validate(&self) -> FeatureResult<()> {
        if self.max_samples == 0 {
            return Err(FeatureError::InvalidConfig(
                "max_samples must be at least 1".to_string(),
            ));
        }
        if self.max_simult_samples == 0 {
            return Err(FeatureError::InvalidConfig(
                "max_simult_samples must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Total number of spectrum realisations, `max_samples · max_simult_samples`.
    pub fn effective_samples(&self) -> usize {
        self.max_samples * self.max_simult_samples
    }
}

/// Receives progress updates from a Monte Carlo run.
pub trait ProgressObserver {
    /// Called after every draw with the number of completed draws.
    fn on_progress(&mut self, done: usize, total: usize);

    /// Called once after the last draw.
    fn on_complete(&mut self, _total: usize) {}
}

/// Observer that ignores all updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressObserver for NullProgress {
    fn on_progress(&mut self, _done: usize, _total: usize) {}
}

/// Logs a progress line at `info` level every 2% of the run.
#[derive(Debug)]
pub struct TracingProgress {
    slots: usize,
    last_slot: Option<usize>,
    copies_per_draw: usize,
    started: Instant,
}

impl TracingProgress {
    pub fn new(copies_per_draw: usize) -> Self {
        Self {
            slots: 50,
            last_slot: None,
            copies_per_draw: copies_per_draw.max(1),
            started: Instant::now(),
        }
    }
}

impl Default for TracingProgress {
    fn default() -> Self {
        Self::new(1)
    }
}

impl ProgressObserver for TracingProgress {
    fn on_progress(&mut self, done: usize, total: usize) {
        if total == 0 {
            return;
        }
        let slot = done * self.slots / total;
        if self.last_slot == Some(slot) {
            return;
        }
        self.last_slot = Some(slot);
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            (done * self.copies_per_draw) as f64 / elapsed
        } else {
            0.0
        };
        info!(
            percent = slot * 100 / self.slots,
            done,
            total,
            samples_per_sec = rate,
            "monte carlo progress"
        );
    }

    fn on_complete(&mut self, total: usize) {
        info!(
            draws = total,
            elapsed_secs = self.started.elapsed().as_secs_f64(),
            "monte carlo complete"
        );
    }
}

/// Finite, restartable stream of tiled spectrum draws.
#[derive(Debug, Clone)]
pub struct SampleStream {
    mean: ComplexMatrix,
    /// Per-component standard deviation `sqrt(Λ/2)`.
    std_dev: Matrix,
    normal: Normal<f64>,
    rng: StdRng,
    seed: u64,
    emitted: usize,
    len: usize,
    tiles: usize,
}

impl SampleStream {
    pub fn new(
        spectrum: &UncertainSpectrum,
        tiles: usize,
        len: usize,
        seed: u64,
    ) -> FeatureResult<Self> {
        if tiles == 0 {
            return Err(FeatureError::InvalidConfig(
                "sample stream needs at least one tile".to_string(),
            ));
        }
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| FeatureError::InvalidConfig(format!("normal distribution: {}", e)))?;
        Ok(Self {
            mean: spectrum.mean().tile_columns(tiles),
            std_dev: spectrum.variance().map(|v| (0.5 * v).sqrt()).tile_columns(tiles),
            normal,
            rng: StdRng::seed_from_u64(seed),
            seed,
            emitted: 0,
            len,
            tiles,
        })
    }

    /// Rewind to the first draw; the sequence repeats exactly.
    pub fn restart(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
        self.emitted = 0;
    }

    pub fn tiles(&self) -> usize {
        self.tiles
    }
}

impl Iterator for SampleStream {
    type Item = ComplexMatrix;

    fn next(&mut self) -> Option<ComplexMatrix> {
        if self.emitted >= self.len {
            return None;
        }
        self.emitted += 1;
        let Self {
            mean,
            std_dev,
            normal,
            rng,
            ..
        } = self;
        Some(ComplexMatrix::from_fn(mean.rows(), mean.cols(), |k, l| {
            let mu = mean.get(k, l);
            let s = std_dev.get(k, l);
            let re = mu.re + s * normal.sample(&mut *rng);
            let im = mu.im + s * normal.sample(&mut *rng);
            Complex::new(re, im)
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.emitted;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SampleStream {}

/// Running first and second raw moments of the cepstra.
#[derive(Debug, Clone)]
pub(crate) struct RunningMoments {
    mean: Matrix,
    second: Matrix,
    count: usize,
}

impl RunningMoments {
    pub(crate) fn new(rows: usize, cols: usize) -> Self {
        Self {
            mean: Matrix::zeros(rows, cols),
            second: Matrix::zeros(rows, cols),
            count: 0,
        }
    }

    /// `acc <- (acc·i + new)/(i+1)`
    pub(crate) fn update(&mut self, sample: &Matrix) -> FeatureResult<()> {
        let i = self.count as f64;
        self.mean = self.mean.zip_map(sample, |acc, x| (acc * i + x) / (i + 1.0))?;
        self.second = self
            .second
            .zip_map(sample, |acc, x| (acc * i + x * x) / (i + 1.0))?;
        self.count += 1;
        Ok(())
    }

    /// Combine two independent accumulations, weighted by draw count.
    pub(crate) fn merge(self, other: RunningMoments) -> FeatureResult<Self> {
        let total = self.count + other.count;
        if total == 0 {
            return Ok(self);
        }
        let (na, nb, n) = (self.count as f64, other.count as f64, total as f64);
        Ok(Self {
            mean: self.mean.zip_map(&other.mean, |a, b| (a * na + b * nb) / n)?,
            second: self
                .second
                .zip_map(&other.second, |a, b| (a * na + b * nb) / n)?,
            count: total,
        })
    }

    /// Average the tiled copies and convert to mean and variance.
    ///
    /// Variance is `E[x²] - E[x]²` clamped at 0.
    pub(crate) fn finish(self, tiles: usize) -> FeatureResult<UncertainFeatures> {
        let frames = self.mean.cols() / tiles;
        let weight = 1.0 / tiles as f64;
        let mut mean = Matrix::zeros(self.mean.rows(), frames);
        let mut second = Matrix::zeros(self.mean.rows(), frames);
        for s in 0..tiles {
            let m = self.mean.column_block(s * frames, frames)?;
            let q = self.second.column_block(s * frames, frames)?;
            mean = mean.zip_map(&m, |acc, v| acc + v * weight)?;
            second = second.zip_map(&q, |acc, v| acc + v * weight)?;
        }
        let variance = second.zip_map(&mean, |q, m| (q - m * m).max(0.0))?;
        UncertainFeatures::new(mean, variance)
    }
}

/// Sampling-based estimate of cepstral mean and variance.
#[derive(Debug, Clone)]
pub struct MonteCarloValidator {
    extractor: MfccExtractor,
    config: MonteCarloConfig,
}

impl MonteCarloValidator {
    pub fn new(extractor: MfccExtractor, config: MonteCarloConfig) -> FeatureResult<Self> {
        config.validate()?;
        Ok(Self { extractor, config })
    }

    pub fn config(&self) -> &MonteCarloConfig {
        &self.config
    }

    pub fn extractor(&self) -> &MfccExtractor {
        &self.extractor
    }

    /// Run the full sampling loop without progress reporting.
    pub fn validate(&self, spectrum: &UncertainSpectrum) -> FeatureResult<UncertainFeatures> {
        self.validate_with(spectrum, &mut NullProgress)
    }

    /// Run the full sampling loop, reporting each draw to `observer`.
    pub fn validate_with(
        &self,
        spectrum: &UncertainSpectrum,
        observer: &mut dyn ProgressObserver,
    ) -> FeatureResult<UncertainFeatures> {
        info!(
            frames = spectrum.frames(),
            max_samples = self.config.max_samples,
            max_simult_samples = self.config.max_simult_samples,
            seed = self.config.seed,
            "starting monte carlo validation"
        );
        let tiles = self.config.max_simult_samples;
        let moments = self.accumulate(spectrum, self.config.max_samples, self.config.seed, observer)?;
        observer.on_complete(self.config.max_samples);
        moments.finish(tiles)
    }

    /// Fold `draws` samples seeded with `seed` into running moments.
    pub(crate) fn accumulate(
        &self,
        spectrum: &UncertainSpectrum,
        draws: usize,
        seed: u64,
        observer: &mut dyn ProgressObserver,
    ) -> FeatureResult<RunningMoments> {
        let tiles = self.config.max_simult_samples;
        let stream = SampleStream::new(spectrum, tiles, draws, seed)?;
        let init = RunningMoments::new(
            self.extractor.spec().num_coefficients(),
            spectrum.frames() * tiles,
        );
        stream
            .enumerate()
            .try_fold(init, |mut acc, (i, sample)| {
                let cepstra = self.extractor.extract(&sample)?;
                acc.update(&cepstra)?;
                observer.on_progress(i + 1, draws);
                Ok(acc)
            })
    }
}
