//! # Front-end Configuration
//!
//! Two ways to configure the front end:
//!
//! - YAML (`upfe.yaml`), deserialized straight into [`FrontendConfig`]
//! - flat `KEY = value` files in the HTK style, via
//!   [`FrontendConfig::from_key_value_text`]
//!
//! Window size and frame rate use HTK units of 100 ns.
//!
//! ## Configuration Search Path
//!
//! [`FrontendConfig::load`] reads the first file found:
//! 1. Path in the `UPFE_CONFIG` environment variable
//! 2. `./upfe.yaml`
//! 3. `~/.config/upfe/config.yaml` (platform user config dir)
//! 4. `/etc/upfe/config.yaml`
//!
//! ## Example Configuration
//!
//! ```yaml
//! sample_freq: 16000.0
//! window_size: 250000.0   # 25 ms
//! target_rate: 100000.0   # 10 ms
//! numchans: 26
//! numceps: 12
//! ceplifter: 22.0
//! usepow: true
//! cms: true
//! deltas: true
//! accelerations: true
//! logging:
//!   level: info
//!   format: compact
//! ```
//!
//! The equivalent HTK-style file:
//!
//! ```text
//! SOURCERATE = 625
//! TARGETKIND = MFCC_Z_D_A
//! WINDOWSIZE = 250000.0
//! TARGETRATE = 100000.0
//! NUMCHANS   = 26
//! NUMCEPS    = 12
//! CEPLIFTER  = 22
//! USEPOWER   = T
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::delta::DeltaWindow;
use crate::filterbank::FilterbankSpec;
use crate::observe::LogConfig;
use crate::propagation::CovarianceMode;
use crate::types::FeatureResult;

/// Error type for configuration operations.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Configuration file not found
    NotFound(String),
    /// Failed to read or write a configuration file
    ReadError(String),
    /// Malformed YAML or key/value input
    ParseError(String),
    /// Well-formed but unusable configuration
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(msg) => write!(f, "config not found: {}", msg),
            ConfigError::ReadError(msg) => write!(f, "failed to read config: {}", msg),
            ConfigError::ParseError(msg) => write!(f, "failed to parse config: {}", msg),
            ConfigError::ValidationError(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Feature front-end settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    /// Sampling frequency in Hz
    pub sample_freq: f64,
    /// Analysis window length in 100 ns units
    pub window_size: f64,
    /// Frame shift in 100 ns units
    pub target_rate: f64,
    /// FFT length; next power of two above the window when absent
    pub nfft: Option<usize>,
    pub numchans: usize,
    pub numceps: usize,
    pub ceplifter: f64,
    /// Power spectrum instead of magnitude spectrum
    pub usepow: bool,
    /// Pre-emphasis coefficient, 0 disables
    pub preemph: f64,
    /// Cepstral mean subtraction
    pub cms: bool,
    pub deltas: bool,
    pub accelerations: bool,
    pub delta_window: usize,
    pub accel_window: usize,
    pub weighted_deltas: bool,
    /// Append feature variances (uncertainty propagation)
    pub uncertainty: bool,
    /// Propagation mode used when `uncertainty` is set
    pub covariance: CovarianceMode,
    pub logging: LogConfig,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            sample_freq: 16000.0,
            window_size: 250_000.0,
            target_rate: 100_000.0,
            nfft: None,
            numchans: 26,
            numceps: 12,
            ceplifter: 22.0,
            usepow: true,
            preemph: 0.97,
            cms: false,
            deltas: false,
            accelerations: false,
            delta_window: 2,
            accel_window: 2,
            weighted_deltas: true,
            uncertainty: false,
            covariance: CovarianceMode::Diagonal,
            logging: LogConfig::default(),
        }
    }
}

impl FrontendConfig {
    /// Load configuration from the default search path.
    ///
    /// Returns the default configuration if no file is found.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("UPFE_CONFIG") {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(ConfigError::NotFound(format!(
                    "UPFE_CONFIG points to {}",
                    path.display()
                )));
            }
            return Self::load_from(&path);
        }

        for path in Self::config_search_paths() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        debug!("no configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Load and validate a YAML file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        let config = Self::parse(&content)?;
        info!(path = %path.display(), "loaded front-end configuration");
        Ok(config)
    }

    /// Parse and validate YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as YAML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            serde_yaml::to_string(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))
    }

    pub fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("./upfe.yaml")];
        if let Some(dirs) = directories::ProjectDirs::from("", "", "upfe") {
            paths.push(dirs.config_dir().join("config.yaml"));
        }
        paths.push(PathBuf::from("/etc/upfe/config.yaml"));
        paths
    }

    /// Parse an HTK-style `KEY = value` file and build a configuration.
    pub fn from_key_value_text(text: &str) -> Result<Self, ConfigError> {
        Self::from_key_values(parse_key_value_text(text)?)
    }

    /// Build a configuration from flat key/value pairs.
    ///
    /// Keys are case-insensitive. The sample rate, window size, frame rate,
    /// channel count, cepstral order and lifter must all be present.
    pub fn from_key_values<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let map: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().trim().to_ascii_lowercase(), v.as_ref().trim().to_string()))
            .collect();

        let mut config = Self {
            nfft: None,
            usepow: false,
            preemph: 0.0,
            ..Default::default()
        };

        config.sample_freq = match (map.get("sample_freq"), map.get("work_fs"), map.get("sourcerate")) {
            (Some(v), _, _) => parse_number("sample_freq", v)?,
            (None, Some(v), _) => parse_number("work_fs", v)?,
            (None, None, Some(v)) => {
                let period: f64 = parse_number("sourcerate", v)?;
                if !(period > 0.0) {
                    return Err(ConfigError::ValidationError(format!(
                        "sourcerate must be positive, got {}",
                        period
                    )));
                }
                1e7 / period
            }
            (None, None, None) => return Err(missing("sample_freq, work_fs or sourcerate")),
        };
        config.window_size = parse_number("windowsize", required(&map, "windowsize")?)?;
        config.target_rate = parse_number("targetrate", required(&map, "targetrate")?)?;
        config.numchans = parse_number("numchans", required(&map, "numchans")?)?;
        config.numceps = parse_number("numceps", required(&map, "numceps")?)?;
        config.ceplifter = parse_number("ceplifter", required(&map, "ceplifter")?)?;

        for (key, value) in &map {
            match key.as_str() {
                "sample_freq" | "work_fs" | "sourcerate" | "windowsize" | "targetrate"
                | "numchans" | "numceps" | "ceplifter" => {}
                "nfft" => config.nfft = Some(parse_number(key, value)?),
                "usepower" | "usepow" => config.usepow = parse_bool(key, value)?,
                "preemcoef" => config.preemph = parse_number(key, value)?,
                "deltawindow" => config.delta_window = parse_number(key, value)?,
                "accwindow" => config.accel_window = parse_number(key, value)?,
                "weighteddeltas" => config.weighted_deltas = parse_bool(key, value)?,
                "unc_prop" => config.uncertainty = parse_bool(key, value)?,
                "diagcov" => {
                    config.covariance = if parse_bool(key, value)? {
                        CovarianceMode::Diagonal
                    } else {
                        CovarianceMode::Full
                    }
                }
                "targetkind" => {
                    let kind = TargetKind::parse(value)?;
                    config.cms = kind.zero_mean;
                    config.deltas = kind.deltas;
                    config.accelerations = kind.accelerations;
                }
                _ => debug!(key = %key, value = %value, "ignoring unknown configuration key"),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_freq.is_finite() && self.sample_freq > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "sample_freq must be positive, got {}",
                self.sample_freq
            )));
        }
        if !(self.window_size > 0.0) || !(self.target_rate > 0.0) {
            return Err(ConfigError::ValidationError(
                "window_size and target_rate must be positive".to_string(),
            ));
        }
        let window_length = self.window_length();
        if window_length == 0 {
            return Err(ConfigError::ValidationError(
                "window_size is shorter than one sample".to_string(),
            ));
        }
        if self.window_shift() == 0 {
            return Err(ConfigError::ValidationError(
                "target_rate is shorter than one sample".to_string(),
            ));
        }
        if let Some(nfft) = self.nfft {
            if !nfft.is_power_of_two() || nfft < window_length {
                return Err(ConfigError::ValidationError(format!(
                    "nfft {} must be a power of two >= window length {}",
                    nfft, window_length
                )));
            }
        }
        if self.numchans < 1 {
            return Err(ConfigError::ValidationError(
                "numchans must be at least 1".to_string(),
            ));
        }
        if !(self.ceplifter >= 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "ceplifter must be non-negative, got {}",
                self.ceplifter
            )));
        }
        if self.delta_window == 0 || self.accel_window == 0 {
            return Err(ConfigError::ValidationError(
                "delta and acceleration windows must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.preemph) {
            return Err(ConfigError::ValidationError(format!(
                "preemph must be in [0, 1), got {}",
                self.preemph
            )));
        }
        Ok(())
    }

    /// Window length in samples, `round(window_size · 1e-7 · fs)`.
    pub fn window_length(&self) -> usize {
        (self.window_size * 1e-7 * self.sample_freq).round() as usize
    }

    /// Frame shift in samples.
    pub fn window_shift(&self) -> usize {
        (self.target_rate * 1e-7 * self.sample_freq).round() as usize
    }

    /// Configured FFT length, or the next power of two >= the window length.
    pub fn nfft(&self) -> usize {
        self.nfft
            .unwrap_or_else(|| self.window_length().max(1).next_power_of_two())
    }

    pub fn filterbank_spec(&self) -> FeatureResult<FilterbankSpec> {
        self.validate()?;
        FilterbankSpec::new(
            self.sample_freq,
            self.nfft(),
            self.numchans,
            self.numceps,
            self.ceplifter,
            self.usepow,
        )
    }

    pub fn delta_window(&self) -> DeltaWindow {
        DeltaWindow {
            window: self.delta_window,
            weighted: self.weighted_deltas,
        }
    }

    pub fn accel_window(&self) -> DeltaWindow {
        DeltaWindow {
            window: self.accel_window,
            weighted: self.weighted_deltas,
        }
    }

    /// Generate example configuration YAML.
    pub fn example_yaml() -> String {
        let config = Self {
            cms: true,
            deltas: true,
            accelerations: true,
            ..Default::default()
        };
        serde_yaml::to_string(&config).unwrap_or_default()
    }
}

/// Feature kind with HTK-style modifiers, e.g. `MFCC_Z_D_A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TargetKind {
    pub zero_mean: bool,
    pub deltas: bool,
    pub accelerations: bool,
}

const KNOWN_KINDS: &[&str] = &[
    "WAVEFORM", "LPC", "LPREFC", "LPCEPSTRA", "LPDELCEP", "IREFC", "MFCC", "FBANK", "MELSPEC",
    "USER", "DISCRETE", "PLP", "ANON",
];
const KNOWN_MODIFIERS: &[&str] = &["E", "N", "D", "A", "C", "Z", "K", "0", "V", "T"];

impl TargetKind {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let upper = text.trim().to_ascii_uppercase();
        let mut tokens = upper.split('_');
        let base = tokens.next().unwrap_or_default();
        if !KNOWN_KINDS.contains(&base) {
            return Err(ConfigError::ParseError(format!("unknown target kind '{}'", base)));
        }
        if base != "MFCC" {
            return Err(ConfigError::ValidationError(format!(
                "unsupported target kind '{}', only MFCC is produced",
                base
            )));
        }
        let mut kind = Self::default();
        for modifier in tokens {
            match modifier {
                "Z" => kind.zero_mean = true,
                "D" => kind.deltas = true,
                "A" => kind.accelerations = true,
                m if KNOWN_MODIFIERS.contains(&m) => {
                    debug!(modifier = m, "target kind modifier has no effect")
                }
                m => {
                    return Err(ConfigError::ParseError(format!(
                        "unknown target kind modifier '{}'",
                        m
                    )))
                }
            }
        }
        Ok(kind)
    }
}

/// Read `KEY = value` lines. `#` starts a comment; an optional `MODULE:`
/// prefix on the key is dropped and surrounding quotes on the value removed.
pub fn parse_key_value_text(text: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut pairs = Vec::new();
    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| {
            ConfigError::ParseError(format!("line {}: expected KEY = value", lineno + 1))
        })?;
        let key = key.rsplit(':').next().unwrap_or(key).trim();
        if key.is_empty() {
            return Err(ConfigError::ParseError(format!("line {}: empty key", lineno + 1)));
        }
        let value = value.trim().trim_matches(|c: char| c == '"' || c == '\'');
        pairs.push((key.to_string(), value.to_string()));
    }
    Ok(pairs)
}

fn missing(what: &str) -> ConfigError {
    ConfigError::ValidationError(format!("missing required parameter {}", what))
}

fn required<'a>(map: &'a HashMap<String, String>, key: &str) -> Result<&'a str, ConfigError> {
    map.get(key).map(String::as_str).ok_or_else(|| missing(key))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    // HTK writes integers as floats at times ("NUMCEPS = 12.0").
    value
        .parse::<T>()
        .ok()
        .or_else(|| {
            value
                .parse::<f64>()
                .ok()
                .filter(|v| v.fract() == 0.0 && *v >= 0.0)
                .and_then(|v| format!("{}", v as u64).parse::<T>().ok())
        })
        .ok_or_else(|| ConfigError::ParseError(format!("{}: invalid number '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "t" | "true" | "1" | "yes" => Ok(true),
        "f" | "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::ParseError(format!("{}: invalid boolean '{}'", key, value))),
    }
}
