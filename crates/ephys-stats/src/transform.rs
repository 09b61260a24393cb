//! Frequency transform boundary used by the spectral statistics
//!
//! Statistics hand a `(channel, time, trial)` block to a [`FrequencyTransform`]
//! and receive power with a frequency axis inserted after the channel axis.
//! Errors cross this boundary as `anyhow::Error`.

use crate::config::{TaperConfig, TaperWindow};
use anyhow::{bail, ensure, Result};
use ndarray::{Array3, Array4, ArrayView1, ArrayView3, Axis};
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

/// Black-box spectral estimator
pub trait FrequencyTransform: Send + Sync + fmt::Debug {
    /// Power over the whole epoch: `(C, T, N)` in, `(C, F, N)` out
    fn power(
        &self,
        data: ArrayView3<'_, f64>,
        sampling_rate: f64,
        freqs: &[f64],
        taper: &TaperConfig,
    ) -> Result<Array3<f64>>;

    /// Time-resolved power: `(C, T, N)` in, `(C, F, T, N)` out
    fn time_frequency(
        &self,
        data: ArrayView3<'_, f64>,
        sampling_rate: f64,
        freqs: &[f64],
        taper: &TaperConfig,
    ) -> Result<Array4<f64>>;
}

/// Periodogram and short-time Fourier transform backed by `rustfft`
///
/// Each trace is tapered and zero padded so the bin spacing is no coarser
/// than the requested grid; every grid frequency reads its nearest bin.
#[derive(Debug, Clone, Copy, Default)]
pub struct FftTransform;

impl FftTransform {
    pub fn new() -> Self {
        FftTransform
    }

    /// Shared handle for statistics
    pub fn shared() -> Arc<dyn FrequencyTransform> {
        Arc::new(FftTransform)
    }
}

fn check_grid(sampling_rate: f64, freqs: &[f64]) -> Result<()> {
    ensure!(
        sampling_rate.is_finite() && sampling_rate > 0.0,
        "sampling rate must be positive, got {}",
        sampling_rate
    );
    let nyquist = sampling_rate / 2.0;
    if let Some(f) = freqs.iter().find(|&&f| !(f >= 0.0 && f <= nyquist)) {
        bail!("frequency {} Hz outside [0, {}] Hz", f, nyquist);
    }
    Ok(())
}

fn taper_weights(window: TaperWindow, len: usize) -> Vec<f64> {
    match window {
        TaperWindow::Rectangular => vec![1.0; len],
        TaperWindow::Hann if len < 2 => vec![1.0; len],
        TaperWindow::Hann => (0..len)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / (len - 1) as f64).cos())
            .collect(),
    }
}

/// Tapered one-sided power of a single segment at the grid bins
struct SegmentSpectrum {
    fft: Arc<dyn Fft<f64>>,
    weights: Vec<f64>,
    bins: Vec<usize>,
    scale: f64,
    buffer: Vec<Complex<f64>>,
}

impl SegmentSpectrum {
    fn new(segment_len: usize, sampling_rate: f64, freqs: &[f64], window: TaperWindow) -> Self {
        let min_df = freqs
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .filter(|d| *d > 0.0)
            .fold(f64::INFINITY, f64::min);
        let resolution_len = if min_df.is_finite() {
            (sampling_rate / min_df).ceil() as usize
        } else {
            0
        };
        let nfft = segment_len.max(resolution_len).max(1);

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(nfft);
        let weights = taper_weights(window, segment_len);
        let energy: f64 = weights.iter().map(|w| w * w).sum();
        let bins = freqs
            .iter()
            .map(|f| ((f * nfft as f64 / sampling_rate).round() as usize).min(nfft / 2))
            .collect();

        SegmentSpectrum {
            fft,
            weights,
            bins,
            scale: if energy > 0.0 { 2.0 / (sampling_rate * energy) } else { 0.0 },
            buffer: vec![Complex::new(0.0, 0.0); nfft],
        }
    }

    /// Power at each grid frequency of `segment`, whose samples outside
    /// `[0, len)` are taken as zero starting at `offset`
    fn power_into(&mut self, trace: ArrayView1<'_, f64>, offset: isize, out: &mut [f64]) {
        let len = self.weights.len();
        for value in self.buffer.iter_mut() {
            *value = Complex::new(0.0, 0.0);
        }
        for i in 0..len {
            let source = offset + i as isize;
            if source >= 0 && (source as usize) < trace.len() {
                self.buffer[i] = Complex::new(trace[source as usize] * self.weights[i], 0.0);
            }
        }
        self.fft.process(&mut self.buffer);
        for (slot, &bin) in out.iter_mut().zip(&self.bins) {
            *slot = self.buffer[bin].norm_sqr() * self.scale;
        }
    }
}

impl FrequencyTransform for FftTransform {
    fn power(
        &self,
        data: ArrayView3<'_, f64>,
        sampling_rate: f64,
        freqs: &[f64],
        taper: &TaperConfig,
    ) -> Result<Array3<f64>> {
        check_grid(sampling_rate, freqs)?;
        let (num_channels, num_samples, num_trials) = data.dim();
        ensure!(num_samples > 0, "cannot estimate power of an empty epoch");

        let mut spectrum = SegmentSpectrum::new(num_samples, sampling_rate, freqs, taper.window);
        let mut out = Array3::zeros((num_channels, freqs.len(), num_trials));
        let mut column = vec![0.0; freqs.len()];
        for c in 0..num_channels {
            for n in 0..num_trials {
                let trace = data.index_axis(Axis(0), c);
                spectrum.power_into(trace.index_axis(Axis(1), n), 0, &mut column);
                for (f, &p) in column.iter().enumerate() {
                    out[[c, f, n]] = p;
                }
            }
        }
        Ok(out)
    }

    fn time_frequency(
        &self,
        data: ArrayView3<'_, f64>,
        sampling_rate: f64,
        freqs: &[f64],
        taper: &TaperConfig,
    ) -> Result<Array4<f64>> {
        check_grid(sampling_rate, freqs)?;
        let (num_channels, num_samples, num_trials) = data.dim();
        ensure!(num_samples > 0, "cannot estimate power of an empty epoch");
        let window = ((taper.window_seconds * sampling_rate).round() as usize).max(2);
        let half = (window / 2) as isize;

        let mut spectrum = SegmentSpectrum::new(window, sampling_rate, freqs, taper.window);
        let mut out = Array4::zeros((num_channels, freqs.len(), num_samples, num_trials));
        let mut column = vec![0.0; freqs.len()];
        for c in 0..num_channels {
            for n in 0..num_trials {
                let trace = data.index_axis(Axis(0), c);
                let trace = trace.index_axis(Axis(1), n);
                for t in 0..num_samples {
                    spectrum.power_into(trace, t as isize - half, &mut column);
                    for (f, &p) in column.iter().enumerate() {
                        out[[c, f, t, n]] = p;
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn sine(freq: f64, sampling_rate: f64, samples: usize, trials: usize) -> Array3<f64> {
        Array3::from_shape_fn((2, samples, trials), |(c, t, _)| {
            (c as f64 + 1.0) * (2.0 * PI * freq * t as f64 / sampling_rate).sin()
        })
    }

    fn peak(values: &[f64]) -> usize {
        values
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
            .0
    }

    #[test]
    fn test_power_peaks_at_signal_frequency() {
        let freqs: Vec<f64> = (1..=100).map(|f| f as f64).collect();
        let data = sine(20.0, 1000.0, 1000, 3);
        let power = FftTransform
            .power(data.view(), 1000.0, &freqs, &TaperConfig::default())
            .unwrap();

        assert_eq!(power.dim(), (2, 100, 3));
        for c in 0..2 {
            let spectrum: Vec<f64> = power.slice(ndarray::s![c, .., 0]).to_vec();
            assert_eq!(freqs[peak(&spectrum)], 20.0);
        }
        // Channel 1 has twice the amplitude, four times the power.
        let ratio = power[[1, 19, 0]] / power[[0, 19, 0]];
        assert!((ratio - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_time_frequency_shape_and_peak() {
        let freqs: Vec<f64> = (1..=50).map(|f| 2.0 * f as f64).collect();
        let data = sine(40.0, 500.0, 200, 2);
        let taper = TaperConfig {
            window: TaperWindow::Hann,
            window_seconds: 0.2,
        };
        let tfr = FftTransform.time_frequency(data.view(), 500.0, &freqs, &taper).unwrap();
        assert_eq!(tfr.dim(), (2, 50, 200, 2));
        let mid: Vec<f64> = tfr.slice(ndarray::s![0, .., 100, 1]).to_vec();
        assert_eq!(freqs[peak(&mid)], 40.0);
    }

    #[test]
    fn test_rejects_frequencies_above_nyquist() {
        let data = sine(10.0, 100.0, 100, 1);
        let result = FftTransform.power(data.view(), 100.0, &[10.0, 60.0], &TaperConfig::default());
        assert!(result.unwrap_err().to_string().contains("60"));
    }
}
