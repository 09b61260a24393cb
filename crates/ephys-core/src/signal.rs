//! Signal: time-addressed (channel × time × trial) container
//!
//! A `Signal` pairs a rank-3 data array with its channel table, sampling
//! interval and explicit per-sample time axis. Every operation except
//! [`Signal::mask_trial`] returns a new value.

use crate::channel::{mask_to_indices, validate_selection, ChannelInfo, ChannelTable};
use crate::error::{EphysError, EphysResult};
use crate::literal::Literal;
use crate::signal_error;
use ndarray::{s, Array1, Array3, ArrayView3, Axis};
use std::ops::Range;
use tracing::{debug, warn};

/// Multi-channel, multi-trial sampled signal
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    channels: ChannelTable,
    data: Array3<f64>,
    dt: f64,
    times: Array1<f64>,
}

impl Signal {
    /// Create a signal, validating shape invariants
    pub fn new(
        channels: ChannelTable,
        data: Array3<f64>,
        dt: f64,
        times: Array1<f64>,
    ) -> EphysResult<Self> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(signal_error!("sampling interval must be positive, got {}", dt));
        }
        let (num_channels, num_samples, _) = data.dim();
        if times.len() != num_samples {
            return Err(EphysError::ShapeMismatch {
                context: "signal time axis",
                expected: vec![num_samples],
                found: vec![times.len()],
            });
        }
        if channels.len() != num_channels {
            return Err(EphysError::ShapeMismatch {
                context: "signal channel table",
                expected: vec![num_channels],
                found: vec![channels.len()],
            });
        }

        Ok(Signal {
            channels,
            data,
            dt,
            times,
        })
    }

    /// Create a signal with a uniform time axis starting at `t0`
    pub fn uniform(
        channels: ChannelTable,
        data: Array3<f64>,
        dt: f64,
        t0: f64,
    ) -> EphysResult<Self> {
        let num_samples = data.dim().1;
        let times = Array1::from_iter((0..num_samples).map(|i| t0 + i as f64 * dt));
        Signal::new(channels, data, dt, times)
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn view(&self) -> ArrayView3<'_, f64> {
        self.data.view()
    }

    /// Consume the signal and return its data array
    pub fn into_data(self) -> Array3<f64> {
        self.data
    }

    /// Sampling interval in seconds
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Sampling rate in Hz
    pub fn f0(&self) -> f64 {
        1.0 / self.dt
    }

    /// Nyquist frequency in Hz
    pub fn f_nyquist(&self) -> f64 {
        self.f0() / 2.0
    }

    /// Nominal duration in seconds (`dt * len`)
    pub fn duration(&self) -> f64 {
        self.dt * self.len() as f64
    }

    pub fn times(&self) -> &Array1<f64> {
        &self.times
    }

    pub fn num_channels(&self) -> usize {
        self.data.dim().0
    }

    /// Number of time samples
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn num_trials(&self) -> usize {
        self.data.dim().2
    }

    /// Index of the sample whose time is closest to `t`
    ///
    /// Samples with a NaN time are skipped and ties resolve to the lowest
    /// index. Callers keep `t` inside the time axis; a NaN `t` maps to 0.
    pub fn sample_at(&self, t: f64) -> usize {
        let mut best = 0;
        let mut best_distance = f64::INFINITY;
        for (i, &time) in self.times.iter().enumerate() {
            let distance = (time - t) * (time - t);
            if distance < best_distance {
                best = i;
                best_distance = distance;
            }
        }
        best
    }

    /// Number of samples needed to cover `duration` seconds
    pub fn time_to_samples(&self, duration: f64) -> usize {
        (duration * self.f0()).ceil().max(0.0) as usize
    }

    /// Extract the interval `[start, stop]`
    ///
    /// The returned time axis is synthesized as
    /// `linspace(start, stop, time_to_samples(stop - start))` rather than
    /// copied from the source. Data is taken from `sample_at(start)` onwards;
    /// samples requested past the end of the recording are zero.
    pub fn slice(&self, start: f64, stop: f64) -> EphysResult<Signal> {
        if !(start.is_finite() && stop.is_finite()) {
            return Err(signal_error!("slice bounds must be finite, got [{}, {}]", start, stop));
        }
        if start > stop {
            return Err(signal_error!("slice start {} is after stop {}", start, stop));
        }

        let num_samples = self.time_to_samples(stop - start);
        let times = Array1::linspace(start, stop, num_samples);
        let first = self.sample_at(start);
        let available = num_samples.min(self.len().saturating_sub(first));
        if available < num_samples {
            warn!(
                start,
                stop,
                missing = num_samples - available,
                "slice runs past the end of the recording; zero filling"
            );
        }

        let mut data = Array3::zeros((self.num_channels(), num_samples, self.num_trials()));
        data.slice_mut(s![.., ..available, ..])
            .assign(&self.data.slice(s![.., first..first + available, ..]));

        debug!(start, stop, first, num_samples, "sliced signal");
        Signal::new(self.channels.clone(), data, self.dt, times)
    }

    /// Extract the unit-length interval `[t, t + 1]`
    pub fn unit_range(&self, t: f64) -> EphysResult<Signal> {
        self.slice(t, t + 1.0)
    }

    /// Zero every sample of `trial` outside `[sample_at(onset), sample_at(offset))`
    ///
    /// This is the only in-place mutation a signal supports. Returns the range
    /// of samples left untouched.
    pub fn mask_trial(
        &mut self,
        trial: usize,
        onset: f64,
        offset: f64,
    ) -> EphysResult<Range<usize>> {
        if trial >= self.num_trials() {
            return Err(signal_error!(
                "trial {} out of range for {} trials",
                trial,
                self.num_trials()
            ));
        }
        let first = self.sample_at(onset);
        let last = self.sample_at(offset).max(first);

        let mut column = self.data.index_axis_mut(Axis(2), trial);
        column.slice_mut(s![.., ..first]).fill(0.0);
        column.slice_mut(s![.., last..]).fill(0.0);
        Ok(first..last)
    }

    /// Keep only channels whose metadata satisfies `predicate`
    pub fn select_channels<F>(&self, predicate: F) -> EphysResult<Signal>
    where
        F: Fn(&ChannelInfo) -> bool,
    {
        self.take_channels(&self.channels.positions(predicate))
    }

    /// Keep only channels whose `column` equals `value`
    pub fn select_where(&self, column: &str, value: &Literal) -> EphysResult<Signal> {
        self.select_channels(|channel| channel.column(column).as_ref() == Some(value))
    }

    /// Keep channels where `mask` is true
    pub fn select_mask(&self, mask: &[bool]) -> EphysResult<Signal> {
        self.take_channels(&mask_to_indices(mask, self.num_channels())?)
    }

    /// Keep the given channel rows; indices must be strictly increasing
    pub fn take_channels(&self, indices: &[usize]) -> EphysResult<Signal> {
        validate_selection(indices, self.num_channels())?;
        Signal::new(
            self.channels.take(indices)?,
            self.data.select(Axis(0), indices),
            self.dt,
            self.times.clone(),
        )
    }

    /// Keep the first `len` samples
    pub fn truncate(&self, len: usize) -> EphysResult<Signal> {
        let len = len.min(self.len());
        Signal::new(
            self.channels.clone(),
            self.data.slice(s![.., ..len, ..]).to_owned(),
            self.dt,
            self.times.slice(s![..len]).to_owned(),
        )
    }

    /// Apply an array transform, keeping channels, `dt` and time axis
    pub fn fmap<F>(&self, f: F) -> EphysResult<Signal>
    where
        F: FnOnce(ArrayView3<'_, f64>) -> Array3<f64>,
    {
        Signal::new(
            self.channels.clone(),
            f(self.data.view()),
            self.dt,
            self.times.clone(),
        )
    }

    /// Event-related potential: mean over trials, kept as a single trial
    pub fn erp(&self) -> EphysResult<Signal> {
        self.fmap(|data| match data.mean_axis(Axis(2)) {
            Some(mean) => mean.insert_axis(Axis(2)),
            None => Array3::zeros((data.dim().0, data.dim().1, 1)),
        })
    }
}
