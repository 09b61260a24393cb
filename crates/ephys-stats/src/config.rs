//! Configuration for spectral and alignment statistics

use ephys_core::{EphysError, EphysResult};
use serde::{Deserialize, Serialize};

/// Window applied to each trace before the transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaperWindow {
    /// Hann (raised cosine) window
    Hann,
    /// No taper
    Rectangular,
}

/// Taper and sliding-window parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaperConfig {
    pub window: TaperWindow,
    /// Length of the sliding window for time-resolved spectra (seconds)
    pub window_seconds: f64,
}

impl Default for TaperConfig {
    fn default() -> Self {
        TaperConfig {
            window: TaperWindow::Hann,
            window_seconds: 0.4,
        }
    }
}

impl TaperConfig {
    pub fn validate(&self) -> EphysResult<()> {
        if !(self.window_seconds.is_finite() && self.window_seconds > 0.0) {
            return Err(EphysError::ConfigurationError {
                message: format!("Taper window must be positive, got {}", self.window_seconds),
            });
        }
        Ok(())
    }
}

/// Parameters shared by power spectra and spectrograms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralConfig {
    /// Frequency resolution (Hz)
    pub df: f64,
    /// Highest frequency of the grid (Hz)
    pub fmax: f64,
    /// Minimum sampling rate accepted from elements (Hz)
    pub f0: f64,
    /// Trials handed to the transform at once
    pub chunk_trials: usize,
    pub taper: TaperConfig,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        SpectralConfig {
            df: 1.0,
            fmax: 150.0,
            f0: 1000.0,
            chunk_trials: 4,
            taper: TaperConfig::default(),
        }
    }
}

/// Preset configurations
impl SpectralConfig {
    /// LFP spectra up to the gamma band at sampling rate `f0`
    pub fn lfp(f0: f64) -> Self {
        SpectralConfig {
            f0,
            ..Self::default()
        }
    }

    /// Coarse 2 Hz grid up to 100 Hz, untapered
    pub fn coarse(f0: f64) -> Self {
        SpectralConfig {
            df: 2.0,
            fmax: 100.0,
            f0,
            chunk_trials: 16,
            taper: TaperConfig {
                window: TaperWindow::Rectangular,
                window_seconds: 0.25,
            },
        }
    }

    /// Number of grid frequencies
    pub fn num_freqs(&self) -> usize {
        (self.fmax / self.df).round() as usize
    }

    /// Frequency grid `df, 2df, ..., fmax`
    pub fn freqs(&self) -> Vec<f64> {
        (1..=self.num_freqs()).map(|i| i as f64 * self.df).collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> EphysResult<()> {
        if !(self.df.is_finite() && self.df > 0.0) {
            return Err(EphysError::ConfigurationError {
                message: format!("Frequency resolution must be positive, got {}", self.df),
            });
        }

        if !(self.fmax.is_finite() && self.fmax >= self.df) {
            return Err(EphysError::ConfigurationError {
                message: format!(
                    "Maximum frequency {} must be at least df = {}",
                    self.fmax, self.df
                ),
            });
        }

        let steps = self.fmax / self.df;
        if (steps - steps.round()).abs() > 1e-9 * steps.max(1.0) {
            return Err(EphysError::ConfigurationError {
                message: format!(
                    "Maximum frequency {} is not a multiple of df = {}",
                    self.fmax, self.df
                ),
            });
        }

        if !(self.f0.is_finite() && self.f0 > 0.0) {
            return Err(EphysError::ConfigurationError {
                message: format!("Sampling rate must be positive, got {}", self.f0),
            });
        }

        if self.fmax > self.f0 / 2.0 {
            return Err(EphysError::ConfigurationError {
                message: format!(
                    "Maximum frequency {} exceeds the Nyquist frequency {}",
                    self.fmax,
                    self.f0 / 2.0
                ),
            });
        }

        if self.chunk_trials == 0 {
            return Err(EphysError::ConfigurationError {
                message: "Chunk size must be greater than 0".to_string(),
            });
        }

        self.taper.validate()
    }

    /// Export configuration to JSON
    pub fn to_json(&self) -> EphysResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| EphysError::ConfigurationError {
            message: format!("Failed to serialize configuration: {}", e),
        })
    }

    /// Import configuration from JSON
    pub fn from_json(json: &str) -> EphysResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| EphysError::ConfigurationError {
            message: format!("Failed to deserialize configuration: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }
}

/// Parameters of the laminar alignment statistic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentConfig {
    /// Channel column holding the anatomical location string
    pub column: String,
    /// Label appended to the common location prefix to find the reference layer
    pub reference_layer: String,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        AlignmentConfig {
            column: "location".to_string(),
            reference_layer: "4".to_string(),
        }
    }
}

impl AlignmentConfig {
    pub fn validate(&self) -> EphysResult<()> {
        if self.column.is_empty() {
            return Err(EphysError::ConfigurationError {
                message: "Alignment column name is empty".to_string(),
            });
        }
        if self.reference_layer.is_empty() {
            return Err(EphysError::ConfigurationError {
                message: "Reference layer label is empty".to_string(),
            });
        }
        Ok(())
    }

    /// Export configuration to JSON
    pub fn to_json(&self) -> EphysResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| EphysError::ConfigurationError {
            message: format!("Failed to serialize configuration: {}", e),
        })
    }

    /// Import configuration from JSON
    pub fn from_json(json: &str) -> EphysResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| EphysError::ConfigurationError {
            message: format!("Failed to deserialize configuration: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }
}

/// Named frequency band (Hz, inclusive)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    pub name: String,
    pub low_freq: f64,
    pub high_freq: f64,
}

impl FrequencyBand {
    pub fn new(name: &str, low_freq: f64, high_freq: f64) -> EphysResult<Self> {
        let band = FrequencyBand {
            name: name.to_string(),
            low_freq,
            high_freq,
        };
        band.validate()?;
        Ok(band)
    }

    pub fn theta() -> Self {
        FrequencyBand {
            name: "theta".to_string(),
            low_freq: 1.0,
            high_freq: 4.0,
        }
    }

    pub fn alpha_beta() -> Self {
        FrequencyBand {
            name: "alpha_beta".to_string(),
            low_freq: 8.0,
            high_freq: 30.0,
        }
    }

    pub fn gamma() -> Self {
        FrequencyBand {
            name: "gamma".to_string(),
            low_freq: 50.0,
            high_freq: 150.0,
        }
    }

    /// Standard LFP bands
    pub fn lfp_bands() -> Vec<FrequencyBand> {
        vec![Self::theta(), Self::alpha_beta(), Self::gamma()]
    }

    pub fn validate(&self) -> EphysResult<()> {
        let finite = self.low_freq.is_finite() && self.high_freq.is_finite();
        if !(finite && self.low_freq <= self.high_freq) {
            return Err(EphysError::ConfigurationError {
                message: format!(
                    "Band '{}' has invalid bounds [{}, {}]",
                    self.name, self.low_freq, self.high_freq
                ),
            });
        }
        Ok(())
    }
}
