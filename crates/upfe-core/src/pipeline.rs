//! Feature assembly: static cepstra, mean subtraction, deltas and
//! accelerations.
//!
//! ```text
//!   X ─▶ extract ─▶ [cms] ─┬──────────────────────────▶ static
//!                          └▶ deltas ─┬───────────────▶ Δ
//!                                     └▶ deltas ──────▶ ΔΔ
//!
//!   output = [static; Δ; ΔΔ]   (row-wise)
//! ```
//!
//! The uncertain path follows the same graph with [`cms_up`] and
//! [`deltas_up`] carrying the variances. When
//! [`PipelineOptions::uncertainty`] is set, [`FeaturePipeline::process_spectrum`]
//! and [`FeaturePipeline::process_waveform`] return `[mean; variance]`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::FrontendConfig;
use crate::delta::{deltas, deltas_up, DeltaWindow};
use crate::extractor::MfccExtractor;
use crate::filterbank::{FilterbankSpec, MelFilterbank};
use crate::matrix::{ComplexMatrix, Matrix};
use crate::normalization::{cms, cms_up};
use crate::propagation::{CovarianceMode, MomentPropagator, UncertainFeatures, UncertainSpectrum};
use crate::stft::Stft;
use crate::types::{FeatureError, FeatureResult};

/// Post-processing applied after cepstral extraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineOptions {
    pub cms: bool,
    pub deltas: bool,
    /// Requires `deltas`.
    pub accelerations: bool,
    pub delta_window: DeltaWindow,
    pub accel_window: DeltaWindow,
    /// Append the propagated variances below the features.
    pub uncertainty: bool,
    pub covariance: CovarianceMode,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            cms: false,
            deltas: false,
            accelerations: false,
            delta_window: DeltaWindow::default(),
            accel_window: DeltaWindow::default(),
            uncertainty: false,
            covariance: CovarianceMode::Diagonal,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &FrontendConfig) -> Self {
        Self {
            cms: config.cms,
            deltas: config.deltas,
            accelerations: config.accelerations,
            delta_window: config.delta_window(),
            accel_window: config.accel_window(),
            uncertainty: config.uncertainty,
            covariance: config.covariance,
        }
    }

    pub fn validate(&self) -> FeatureResult<()> {
        if self.accelerations && !self.deltas {
            return Err(FeatureError::InvalidConfig(
                "accelerations require deltas".to_string(),
            ));
        }
        self.delta_window.validate()?;
        self.accel_window.validate()
    }

    /// Number of stacked blocks: static, plus Δ and ΔΔ when enabled,
    /// doubled when variances are appended.
    pub fn blocks(&self) -> usize {
        let features = 1 + usize::from(self.deltas) + usize::from(self.accelerations);
        if self.uncertainty {
            2 * features
        } else {
            features
        }
    }
}

/// Complete front end from spectrum (or waveform) to stacked features.
#[derive(Debug, Clone)]
pub struct FeaturePipeline {
    extractor: MfccExtractor,
    propagator: MomentPropagator,
    options: PipelineOptions,
    stft: Option<Stft>,
}

impl FeaturePipeline {
    pub fn new(spec: FilterbankSpec, options: PipelineOptions) -> FeatureResult<Self> {
        options.validate()?;
        let filterbank = Arc::new(MelFilterbank::new(spec)?);
        Ok(Self {
            extractor: MfccExtractor::with_filterbank(Arc::clone(&filterbank)),
            propagator: MomentPropagator::with_filterbank(filterbank),
            options,
            stft: None,
        })
    }

    /// Build the filterbank, options and waveform analyser from a
    /// configuration.
    pub fn from_config(config: &FrontendConfig) -> FeatureResult<Self> {
        let mut pipeline = Self::new(config.filterbank_spec()?, PipelineOptions::from_config(config))?;
        pipeline.stft = Some(Stft::from_config(config)?);
        debug!(
            window_length = config.window_length(),
            window_shift = config.window_shift(),
            nfft = config.nfft(),
            blocks = pipeline.options.blocks(),
            uncertainty = pipeline.options.uncertainty,
            covariance = ?pipeline.options.covariance,
            "feature pipeline ready"
        );
        Ok(pipeline)
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn extractor(&self) -> &MfccExtractor {
        &self.extractor
    }

    pub fn propagator(&self) -> &MomentPropagator {
        &self.propagator
    }

    pub fn stft(&self) -> Option<&Stft> {
        self.stft.as_ref()
    }

    /// Rows of the stacked output.
    pub fn num_features(&self) -> usize {
        self.extractor.spec().num_coefficients() * self.options.blocks()
    }

    /// Stacked features for a point spectrum.
    pub fn process(&self, x: &ComplexMatrix) -> FeatureResult<Matrix> {
        let mut statics = self.extractor.extract(x)?;
        if self.options.cms {
            statics = cms(&statics);
        }
        if !self.options.deltas {
            return Ok(statics);
        }
        let d = deltas(&statics, self.options.delta_window)?;
        if !self.options.accelerations {
            return Matrix::vstack(&[&statics, &d]);
        }
        let a = deltas(&d, self.options.accel_window)?;
        Matrix::vstack(&[&statics, &d, &a])
    }

    /// Stacked means and variances for an uncertain spectrum, propagated in
    /// the configured [`CovarianceMode`].
    pub fn process_uncertain(&self, spectrum: &UncertainSpectrum) -> FeatureResult<UncertainFeatures> {
        let mut statics = self.propagator.propagate(spectrum, self.options.covariance)?;
        if self.options.cms {
            statics = cms_up(&statics)?;
        }
        if !self.options.deltas {
            return Ok(statics);
        }
        let d = deltas_up(&statics, self.options.delta_window)?;
        let blocks = if self.options.accelerations {
            let a = deltas_up(&d, self.options.accel_window)?;
            vec![statics, d, a]
        } else {
            vec![statics, d]
        };
        let means: Vec<&Matrix> = blocks.iter().map(|b| &b.mean).collect();
        let variances: Vec<&Matrix> = blocks.iter().map(|b| &b.variance).collect();
        UncertainFeatures::new(Matrix::vstack(&means)?, Matrix::vstack(&variances)?)
    }

    /// Features for a spectrum in the configured output layout: the point
    /// features of the mean, or `[mean; variance]` with uncertainty enabled.
    pub fn process_spectrum(&self, spectrum: &UncertainSpectrum) -> FeatureResult<Matrix> {
        if self.options.uncertainty {
            self.process_uncertain(spectrum)?.stacked()
        } else {
            self.process(spectrum.mean())
        }
    }

    /// Analyse a waveform and return features in the configured layout.
    ///
    /// The analysed spectrum is exact, so appended variances are zero.
    pub fn process_waveform(&self, signal: &[f64]) -> FeatureResult<Matrix> {
        let stft = self.stft.as_ref().ok_or_else(|| {
            FeatureError::InvalidConfig("pipeline has no waveform analyser".to_string())
        })?;
        let x = stft.analyze(signal)?;
        if self.options.uncertainty {
            self.process_spectrum(&UncertainSpectrum::certain(x))
        } else {
            self.process(&x)
        }
    }
}
