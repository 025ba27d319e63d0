//! Short-time Fourier analysis
//!
//! Turns a waveform into the `[nfft/2+1, frames]` complex spectrum consumed
//! by the extractor. Frames are taken every `window_shift` samples and only
//! complete windows are analysed:
//!
//! ```text
//!   signal  |-----------------------------------------------|
//!   frame 0 |==========|
//!   frame 1      |==========|
//!   frame 2           |==========|
//!            <-shift->
//! ```
//!
//! Each frame is Hamming windowed and zero padded to `nfft` before the FFT.

use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use rustfft::{Fft, FftPlanner};

use crate::config::FrontendConfig;
use crate::matrix::ComplexMatrix;
use crate::types::{Complex, FeatureError, FeatureResult};

/// Framed FFT analyser with a cached forward plan.
#[derive(Clone)]
pub struct Stft {
    window_length: usize,
    window_shift: usize,
    nfft: usize,
    preemph: f64,
    window: Vec<f64>,
    fft: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for Stft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stft")
            .field("window_length", &self.window_length)
            .field("window_shift", &self.window_shift)
            .field("nfft", &self.nfft)
            .field("preemph", &self.preemph)
            .finish()
    }
}

impl Stft {
    pub fn new(
        window_length: usize,
        window_shift: usize,
        nfft: usize,
        preemph: f64,
    ) -> FeatureResult<Self> {
        if window_length == 0 || window_shift == 0 {
            return Err(FeatureError::InvalidConfig(format!(
                "window length and shift must be positive, got {} and {}",
                window_length, window_shift
            )));
        }
        if !nfft.is_power_of_two() || nfft < window_length {
            return Err(FeatureError::InvalidConfig(format!(
                "nfft {} must be a power of two >= window length {}",
                nfft, window_length
            )));
        }
        if !(0.0..1.0).contains(&preemph) {
            return Err(FeatureError::InvalidConfig(format!(
                "pre-emphasis coefficient must be in [0, 1), got {}",
                preemph
            )));
        }
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(nfft);
        Ok(Self {
            window_length,
            window_shift,
            nfft,
            preemph,
            window: hamming_window(window_length),
            fft,
        })
    }

    pub fn from_config(config: &FrontendConfig) -> FeatureResult<Self> {
        Self::new(
            config.window_length(),
            config.window_shift(),
            config.nfft(),
            config.preemph,
        )
    }

    pub fn nfft(&self) -> usize {
        self.nfft
    }

    pub fn window_length(&self) -> usize {
        self.window_length
    }

    pub fn window_shift(&self) -> usize {
        self.window_shift
    }

    /// Number of complete frames in a signal of `len` samples.
    pub fn num_frames(&self, len: usize) -> usize {
        if len < self.window_length {
            0
        } else {
            1 + (len - self.window_length) / self.window_shift
        }
    }

    /// Spectrum of `signal`, `[nfft/2+1, frames]`.
    pub fn analyze(&self, signal: &[f64]) -> FeatureResult<ComplexMatrix> {
        let frames = self.num_frames(signal.len());
        if frames == 0 {
            return Err(FeatureError::SignalTooShort {
                needed: self.window_length,
                actual: signal.len(),
            });
        }
        let emphasized = pre_emphasis(signal, self.preemph);
        let bins = self.nfft / 2 + 1;
        let mut spectrum = ComplexMatrix::filled(bins, frames, Complex::new(0.0, 0.0));
        let mut buffer = vec![Complex::new(0.0, 0.0); self.nfft];
        let mut scratch = vec![Complex::new(0.0, 0.0); self.fft.get_inplace_scratch_len()];

        for l in 0..frames {
            let start = l * self.window_shift;
            let frame = &emphasized[start..start + self.window_length];
            for (slot, (&x, &w)) in buffer.iter_mut().zip(frame.iter().zip(self.window.iter())) {
                *slot = Complex::new(x * w, 0.0);
            }
            for slot in buffer[self.window_length..].iter_mut() {
                *slot = Complex::new(0.0, 0.0);
            }
            self.fft.process_with_scratch(&mut buffer, &mut scratch);
            for (k, &value) in buffer[..bins].iter().enumerate() {
                spectrum.set(k, l, value);
            }
        }
        Ok(spectrum)
    }
}

/// Hamming window `0.54 - 0.46·cos(2πn/(N-1))`.
pub fn hamming_window(length: usize) -> Vec<f64> {
    match length {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let n_minus_1 = (length - 1) as f64;
            (0..length)
                .map(|n| 0.54 - 0.46 * (2.0 * PI * n as f64 / n_minus_1).cos())
                .collect()
        }
    }
}

/// First-order pre-emphasis `y[n] = x[n] - a·x[n-1]`, `y[0] = x[0]`.
pub fn pre_emphasis(signal: &[f64], coeff: f64) -> Vec<f64> {
    if coeff == 0.0 {
        return signal.to_vec();
    }
    let mut out = Vec::with_capacity(signal.len());
    let mut prev = 0.0;
    for (n, &x) in signal.iter().enumerate() {
        out.push(if n == 0 { x } else { x - coeff * prev });
        prev = x;
    }
    out
}
