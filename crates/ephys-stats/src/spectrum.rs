//! Power spectra and spectrograms accumulated across sessions
//!
//! Both statistics are channel-aware: their i.i.d. shape is
//! `(channels, frequencies)` and trials stack on the last payload axis.

use crate::config::{FrequencyBand, SpectralConfig};
use crate::persist::ArrayTable;
use crate::statistic::{ChannelStatistic, SampleAxis, Statistic, StatisticData};
use crate::transform::{FftTransform, FrequencyTransform};
use ephys_core::{preprocess, ChannelTable, EphysError, EphysResult, Signal};
use ndarray::{concatenate, s, Array1, ArrayD, ArrayView3, Axis, Ix4};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Relative tolerance when comparing sampling rates
const RATE_TOLERANCE: f64 = 1e-9;

/// Index of the grid frequency closest to `f`
pub fn closest_freq(freqs: &[f64], f: f64) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, &freq) in freqs.iter().enumerate() {
        let distance = (freq - f) * (freq - f);
        if distance < best_distance {
            best = i;
            best_distance = distance;
        }
    }
    best
}

/// Checks shared by every spectral `apply`
fn check_element(
    kind: &'static str,
    config: &SpectralConfig,
    channels: &ChannelTable,
    element: &Signal,
) -> EphysResult<()> {
    if element.channels() != channels {
        return Err(EphysError::IncompatibleElement {
            kind,
            reason: "element channel table differs from the statistic's".to_string(),
        });
    }
    if element.f0() < config.f0 * (1.0 - RATE_TOLERANCE) {
        return Err(EphysError::IncompatibleElement {
            kind,
            reason: format!(
                "element sampled at {} Hz, below the required {} Hz",
                element.f0(),
                config.f0
            ),
        });
    }
    if element.num_trials() == 0 || element.is_empty() {
        return Err(EphysError::IncompatibleElement {
            kind,
            reason: "element has no samples".to_string(),
        });
    }
    Ok(())
}

/// Trial ranges of at most `chunk` trials covering `0..num_trials`
fn trial_chunks(num_trials: usize, chunk: usize) -> impl Iterator<Item = std::ops::Range<usize>> {
    let chunk = chunk.max(1);
    (0..num_trials)
        .step_by(chunk)
        .map(move |start| start..(start + chunk).min(num_trials))
}

/// Induced power spectrum, `(channels, frequencies, trials)`
#[derive(Clone)]
pub struct PowerSpectrum {
    config: SpectralConfig,
    channels: ChannelTable,
    freqs: Vec<f64>,
    data: StatisticData,
    transform: Arc<dyn FrequencyTransform>,
}

/// Persisted non-array state of the spectral statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectralMetadata {
    pub config: SpectralConfig,
    /// Elements folded so far (spectrograms only)
    #[serde(default)]
    pub count: usize,
}

impl fmt::Debug for PowerSpectrum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PowerSpectrum")
            .field("config", &self.config)
            .field("channels", &self.channels.len())
            .field("shape", &self.data.values().map(|v| v.shape().to_vec()))
            .finish()
    }
}

impl PartialEq for PowerSpectrum {
    fn eq(&self, other: &Self) -> bool {
        self.config == other.config && self.channels == other.channels && self.data == other.data
    }
}

impl PowerSpectrum {
    /// Empty spectrum over `channels` using the FFT backend
    pub fn new(config: SpectralConfig, channels: ChannelTable) -> EphysResult<Self> {
        config.validate()?;
        let freqs = config.freqs();
        let data = StatisticData::new(vec![channels.len(), freqs.len()], SampleAxis::Trailing);
        Ok(PowerSpectrum {
            config,
            channels,
            freqs,
            data,
            transform: FftTransform::shared(),
        })
    }

    /// Empty spectrum over the channels of `signal`
    pub fn for_signal(config: SpectralConfig, signal: &Signal) -> EphysResult<Self> {
        Self::new(config, signal.channels().clone())
    }

    /// Replace the frequency transform
    pub fn with_transform(mut self, transform: Arc<dyn FrequencyTransform>) -> Self {
        self.transform = transform;
        self
    }

    /// Reload from `path` and estimate later elements with `transform`
    ///
    /// Transforms are not persisted, so [`Statistic::unpickle`] falls back to
    /// the FFT backend.
    pub fn unpickle_with(path: &Path, transform: Arc<dyn FrequencyTransform>) -> EphysResult<Self> {
        Ok(Self::unpickle(path)?.with_transform(transform))
    }

    pub fn config(&self) -> &SpectralConfig {
        &self.config
    }

    /// Frequency grid `df, 2df, ..., fmax`
    pub fn freqs(&self) -> &[f64] {
        &self.freqs
    }

    pub fn closest_freq(&self, f: f64) -> usize {
        closest_freq(&self.freqs, f)
    }

    fn payload(&self) -> EphysResult<&ArrayD<f64>> {
        self.data.require(Self::KIND)
    }

    /// Mean power over `[fbottom, ftop]`, dropping the frequency axis
    pub fn band_power(&self, fbottom: f64, ftop: f64) -> EphysResult<ArrayD<f64>> {
        let values = self.payload()?;
        let bottom = self.closest_freq(fbottom);
        let top = self.closest_freq(ftop).max(bottom);
        values
            .slice_axis(Axis(1), (bottom..top + 1).into())
            .mean_axis(Axis(1))
            .ok_or(EphysError::EmptyStatistic { kind: Self::KIND })
    }

    /// Mean power over a named band
    pub fn band(&self, band: &FrequencyBand) -> EphysResult<ArrayD<f64>> {
        band.validate()?;
        self.band_power(band.low_freq, band.high_freq)
    }

    /// Power in decibels
    pub fn decibels(&self) -> EphysResult<Self> {
        self.fmap(|values| values.mapv(|v| 10.0 * v.log10()))
    }

    /// Trial-averaged spectrum
    pub fn evoked(&self) -> EphysResult<Self> {
        self.fmap(|values| {
            let last = Axis(values.ndim() - 1);
            values.mean_axis(last).unwrap_or_else(|| values.clone())
        })
    }

    /// Power relative to the per-frequency maximum over channels
    pub fn relative(&self) -> EphysResult<Self> {
        self.fmap(|values| {
            let max = values.fold_axis(Axis(0), f64::NEG_INFINITY, |&a, &b| a.max(b));
            values / &max.insert_axis(Axis(0))
        })
    }

    /// Trial-averaged payload
    pub fn result(&self) -> EphysResult<ArrayD<f64>> {
        let values = self.payload()?;
        values
            .mean_axis(Axis(values.ndim() - 1))
            .ok_or(EphysError::EmptyStatistic { kind: Self::KIND })
    }
}

impl Statistic for PowerSpectrum {
    const KIND: &'static str = "PowerSpectrum";
    type Element = Signal;
    type Metadata = SpectralMetadata;

    fn data(&self) -> &StatisticData {
        &self.data
    }

    fn with_data(&self, data: StatisticData) -> Self {
        PowerSpectrum {
            data,
            ..self.clone()
        }
    }

    fn apply(&self, element: &Signal) -> EphysResult<Self> {
        check_element(Self::KIND, &self.config, &self.channels, element)?;

        let induced = preprocess::remove_evoked(element.view());
        let mut chunks = Vec::new();
        for trials in trial_chunks(element.num_trials(), self.config.chunk_trials) {
            let block = induced.slice(s![.., .., trials]);
            let power = self
                .transform
                .power(block, element.f0(), &self.freqs, &self.config.taper)?;
            chunks.push(power);
        }
        let views: Vec<ArrayView3<'_, f64>> = chunks.iter().map(|c| c.view()).collect();
        let psd = concatenate(Axis(2), &views[..]).map_err(|e| EphysError::IncompatibleElement {
            kind: Self::KIND,
            reason: format!("transform returned inconsistent chunks: {}", e),
        })?;
        debug!(
            kind = Self::KIND,
            trials = element.num_trials(),
            chunks = chunks.len(),
            "power spectrum"
        );

        Ok(self.with_data(self.data.append(Self::KIND, psd.into_dyn())?))
    }

    fn metadata(&self) -> SpectralMetadata {
        SpectralMetadata {
            config: self.config.clone(),
            count: 0,
        }
    }

    fn channels(&self) -> Option<&ChannelTable> {
        Some(&self.channels)
    }

    fn restore(
        metadata: SpectralMetadata,
        data: StatisticData,
        _arrays: &ArrayTable,
        channels: Option<ChannelTable>,
    ) -> EphysResult<Self> {
        let channels = channels.ok_or_else(|| {
            EphysError::persistence(
                std::path::PathBuf::new(),
                "power spectrum without channel table",
            )
        })?;
        let empty = PowerSpectrum::new(metadata.config, channels)?;
        if data.iid_shape() != empty.iid_shape() {
            return Err(EphysError::ShapeMismatch {
                context: "restored power spectrum",
                expected: empty.iid_shape().to_vec(),
                found: data.iid_shape().to_vec(),
            });
        }
        Ok(empty.with_data(data))
    }
}

impl ChannelStatistic for PowerSpectrum {
    fn channel_table(&self) -> &ChannelTable {
        &self.channels
    }

    fn with_channels(&self, channels: ChannelTable, data: StatisticData) -> Self {
        PowerSpectrum {
            channels,
            data,
            ..self.clone()
        }
    }
}

/// Time-resolved induced power, `(channels, frequencies, times, trials)`
#[derive(Clone)]
pub struct Spectrogram {
    config: SpectralConfig,
    channels: ChannelTable,
    freqs: Vec<f64>,
    data: StatisticData,
    times_sum: Option<Array1<f64>>,
    count: usize,
    transform: Arc<dyn FrequencyTransform>,
}

impl fmt::Debug for Spectrogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spectrogram")
            .field("config", &self.config)
            .field("channels", &self.channels.len())
            .field("shape", &self.data.values().map(|v| v.shape().to_vec()))
            .field("count", &self.count)
            .finish()
    }
}

impl PartialEq for Spectrogram {
    fn eq(&self, other: &Self) -> bool {
        self.config == other.config
            && self.channels == other.channels
            && self.data == other.data
            && self.times_sum == other.times_sum
            && self.count == other.count
    }
}

/// Options for [`Spectrogram::result`]
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrogramView {
    /// Normalize by the mean power in this time window: `(p - b) / b`
    pub baseline: Option<(f64, f64)>,
    pub channel_mean: bool,
    pub decibels: bool,
    pub trial_mean: bool,
}

impl Default for SpectrogramView {
    fn default() -> Self {
        SpectrogramView {
            baseline: None,
            channel_mean: true,
            decibels: false,
            trial_mean: true,
        }
    }
}

impl Spectrogram {
    /// Empty spectrogram over `channels` using the FFT backend
    pub fn new(config: SpectralConfig, channels: ChannelTable) -> EphysResult<Self> {
        config.validate()?;
        let freqs = config.freqs();
        let data = StatisticData::new(vec![channels.len(), freqs.len()], SampleAxis::Trailing);
        Ok(Spectrogram {
            config,
            channels,
            freqs,
            data,
            times_sum: None,
            count: 0,
            transform: FftTransform::shared(),
        })
    }

    /// Empty spectrogram over the channels of `signal`
    pub fn for_signal(config: SpectralConfig, signal: &Signal) -> EphysResult<Self> {
        Self::new(config, signal.channels().clone())
    }

    /// Replace the frequency transform
    pub fn with_transform(mut self, transform: Arc<dyn FrequencyTransform>) -> Self {
        self.transform = transform;
        self
    }

    /// Reload from `path` and estimate later elements with `transform`
    ///
    /// Transforms are not persisted, so [`Statistic::unpickle`] falls back to
    /// the FFT backend.
    pub fn unpickle_with(path: &Path, transform: Arc<dyn FrequencyTransform>) -> EphysResult<Self> {
        Ok(Self::unpickle(path)?.with_transform(transform))
    }

    pub fn config(&self) -> &SpectralConfig {
        &self.config
    }

    pub fn freqs(&self) -> &[f64] {
        &self.freqs
    }

    pub fn closest_freq(&self, f: f64) -> usize {
        closest_freq(&self.freqs, f)
    }

    /// Elements folded so far
    pub fn count(&self) -> usize {
        self.count
    }

    /// Mean time axis over all elements
    pub fn times(&self) -> Option<Array1<f64>> {
        self.times_sum
            .as_ref()
            .filter(|_| self.count > 0)
            .map(|sum| sum / self.count as f64)
    }

    /// Payload reduced as requested by `view`
    ///
    /// Baseline normalization uses the samples between the times closest to
    /// the window bounds; channel and trial means drop their axes.
    pub fn result(&self, view: &SpectrogramView) -> EphysResult<ArrayD<f64>> {
        let values = self.data.require(Self::KIND)?;
        let mut tfr = values
            .view()
            .into_dimensionality::<Ix4>()
            .map_err(|e| EphysError::IncompatibleElement {
                kind: Self::KIND,
                reason: e.to_string(),
            })?
            .to_owned();

        if let Some((start, stop)) = view.baseline {
            let times = self.times().ok_or(EphysError::EmptyStatistic { kind: Self::KIND })?;
            let first = nearest(&times, start);
            let last = nearest(&times, stop);
            if first >= last {
                return Err(EphysError::ConfigurationError {
                    message: format!("Baseline window [{}, {}] covers no samples", start, stop),
                });
            }
            let base = tfr
                .slice(s![.., .., first..last, ..])
                .mean_axis(Axis(2))
                .ok_or(EphysError::EmptyStatistic { kind: Self::KIND })?
                .insert_axis(Axis(2));
            tfr = (&tfr - &base) / &base;
        }

        let mut out = tfr.into_dyn();
        if view.decibels {
            out.mapv_inplace(|v| 10.0 * v.log10());
        }
        if view.channel_mean {
            out = out
                .mean_axis(Axis(0))
                .ok_or(EphysError::EmptyStatistic { kind: Self::KIND })?;
        }
        if view.trial_mean {
            let last = Axis(out.ndim() - 1);
            out = out
                .mean_axis(last)
                .ok_or(EphysError::EmptyStatistic { kind: Self::KIND })?;
        }
        Ok(out)
    }
}

fn nearest(times: &Array1<f64>, t: f64) -> usize {
    closest_freq(&times.to_vec(), t)
}

impl Statistic for Spectrogram {
    const KIND: &'static str = "Spectrogram";
    type Element = Signal;
    type Metadata = SpectralMetadata;

    fn data(&self) -> &StatisticData {
        &self.data
    }

    fn with_data(&self, data: StatisticData) -> Self {
        Spectrogram {
            data,
            ..self.clone()
        }
    }

    fn apply(&self, element: &Signal) -> EphysResult<Self> {
        check_element(Self::KIND, &self.config, &self.channels, element)?;

        let times_sum = match &self.times_sum {
            None => element.times().clone(),
            Some(sum) if sum.len() == element.len() => sum + element.times(),
            Some(sum) => {
                return Err(EphysError::IncompatibleElement {
                    kind: Self::KIND,
                    reason: format!(
                        "element has {} samples, expected {}",
                        element.len(),
                        sum.len()
                    ),
                })
            }
        };

        let induced = preprocess::remove_evoked(element.view());
        let mut chunks = Vec::new();
        for trials in trial_chunks(element.num_trials(), self.config.chunk_trials) {
            let block = induced.slice(s![.., .., trials.clone()]);
            let tfr = self
                .transform
                .time_frequency(block, element.f0(), &self.freqs, &self.config.taper)?;
            debug!(kind = Self::KIND, start = trials.start, end = trials.end, "spectrogram chunk");
            chunks.push(tfr);
        }
        let views: Vec<_> = chunks.iter().map(|c| c.view()).collect();
        let tfr = concatenate(Axis(3), &views[..]).map_err(|e| EphysError::IncompatibleElement {
            kind: Self::KIND,
            reason: format!("transform returned inconsistent chunks: {}", e),
        })?;

        Ok(Spectrogram {
            data: self.data.append(Self::KIND, tfr.into_dyn())?,
            times_sum: Some(times_sum),
            count: self.count + 1,
            ..self.clone()
        })
    }

    fn metadata(&self) -> SpectralMetadata {
        SpectralMetadata {
            config: self.config.clone(),
            count: self.count,
        }
    }

    fn extra_arrays(&self) -> ArrayTable {
        let mut arrays = ArrayTable::new();
        if let Some(sum) = &self.times_sum {
            arrays.insert("times_sum", sum.clone().into_dyn());
        }
        arrays
    }

    fn channels(&self) -> Option<&ChannelTable> {
        Some(&self.channels)
    }

    fn restore(
        metadata: SpectralMetadata,
        data: StatisticData,
        arrays: &ArrayTable,
        channels: Option<ChannelTable>,
    ) -> EphysResult<Self> {
        let channels = channels.ok_or_else(|| {
            EphysError::persistence(std::path::PathBuf::new(), "spectrogram without channel table")
        })?;
        let mut restored = Spectrogram::new(metadata.config, channels)?;
        if data.iid_shape() != restored.iid_shape() {
            return Err(EphysError::ShapeMismatch {
                context: "restored spectrogram",
                expected: restored.iid_shape().to_vec(),
                found: data.iid_shape().to_vec(),
            });
        }
        if metadata.count > 0 {
            let sum = arrays
                .require("times_sum")?
                .clone()
                .into_dimensionality::<ndarray::Ix1>()
                .map_err(|e| EphysError::persistence(std::path::PathBuf::new(), e.to_string()))?;
            restored.times_sum = Some(sum);
        }
        restored.count = metadata.count;
        restored.data = data;
        Ok(restored)
    }
}

impl ChannelStatistic for Spectrogram {
    fn channel_table(&self) -> &ChannelTable {
        &self.channels
    }

    fn with_channels(&self, channels: ChannelTable, data: StatisticData) -> Self {
        Spectrogram {
            channels,
            data,
            ..self.clone()
        }
    }
}
