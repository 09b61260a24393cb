//! Event-aligned epochs sharing one time axis

use crate::error::{EphysError, EphysResult};
use crate::modality::{Modalities, Modality};
use crate::signal::Signal;
use crate::signal_error;
use ndarray::{Array1, Array2};
use std::ops::Range;

/// Aligned LFP/MUA/spike epochs with per-trial validity windows
///
/// Every present signal has the same time length and trial count. Samples of
/// trial `n` outside `trial_window(n)` were zero padded by the time-lock and
/// do not come from the recording.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeLockedSeries {
    times: Array1<f64>,
    signals: Modalities,
    trial_windows: Vec<Range<usize>>,
}

impl TimeLockedSeries {
    /// Bundle signals whose samples are all valid
    pub fn new(signals: Modalities) -> EphysResult<Self> {
        let (times, num_trials) = Self::common_shape(&signals)?;
        let len = times.len();
        Ok(TimeLockedSeries {
            times,
            signals,
            trial_windows: vec![0..len; num_trials],
        })
    }

    /// Bundle signals with explicit per-trial valid sample ranges
    pub fn with_trial_windows(
        signals: Modalities,
        trial_windows: Vec<Range<usize>>,
    ) -> EphysResult<Self> {
        let (times, num_trials) = Self::common_shape(&signals)?;
        let len = times.len();
        if trial_windows.len() != num_trials {
            return Err(EphysError::ShapeMismatch {
                context: "trial windows",
                expected: vec![num_trials],
                found: vec![trial_windows.len()],
            });
        }
        if let Some(window) = trial_windows.iter().find(|w| w.start > w.end || w.end > len) {
            return Err(signal_error!(
                "trial window {:?} does not fit a time axis of {} samples",
                window,
                len
            ));
        }
        Ok(TimeLockedSeries {
            times,
            signals,
            trial_windows,
        })
    }

    /// Shared time axis and trial count of the present signals
    fn common_shape(signals: &Modalities) -> EphysResult<(Array1<f64>, usize)> {
        signals.require_any()?;
        let mut shape: Option<(usize, usize)> = None;
        let mut times = None;
        for (_, signal) in signals.iter() {
            let current = (signal.len(), signal.num_trials());
            match shape {
                None => {
                    shape = Some(current);
                    times = Some(signal.times().clone());
                }
                Some(expected) if expected != current => {
                    return Err(EphysError::ShapeMismatch {
                        context: "time-locked series (time, trials)",
                        expected: vec![expected.0, expected.1],
                        found: vec![current.0, current.1],
                    })
                }
                Some(_) => {}
            }
        }
        match (times, shape) {
            (Some(times), Some((_, num_trials))) => Ok((times, num_trials)),
            _ => Err(EphysError::MissingSignal),
        }
    }

    pub fn lfp(&self) -> Option<&Signal> {
        self.signals.lfp.as_ref()
    }

    pub fn mua(&self) -> Option<&Signal> {
        self.signals.mua.as_ref()
    }

    pub fn spikes(&self) -> Option<&Signal> {
        self.signals.spikes.as_ref()
    }

    pub fn get(&self, modality: Modality) -> Option<&Signal> {
        self.signals.get(modality)
    }

    pub fn signals(&self) -> &Modalities {
        &self.signals
    }

    /// Shared time axis
    pub fn times(&self) -> &Array1<f64> {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_trials(&self) -> usize {
        self.trial_windows.len()
    }

    /// Valid sample range of `trial`
    pub fn trial_window(&self, trial: usize) -> Option<Range<usize>> {
        self.trial_windows.get(trial).cloned()
    }

    pub fn trial_windows(&self) -> &[Range<usize>] {
        &self.trial_windows
    }

    /// `(time, trial)` booleans, true where the sample was recorded
    pub fn validity_mask(&self) -> Array2<bool> {
        Array2::from_shape_fn((self.len(), self.num_trials()), |(t, n)| {
            self.trial_windows[n].contains(&t)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelTable;
    use ndarray::Array3;

    fn signal(samples: usize, trials: usize) -> Signal {
        Signal::uniform(
            ChannelTable::numbered(2),
            Array3::ones((2, samples, trials)),
            0.01,
            0.0,
        )
        .unwrap()
    }

    #[test]
    fn test_requires_a_signal() {
        assert!(matches!(
            TimeLockedSeries::new(Modalities::new()),
            Err(EphysError::MissingSignal)
        ));
    }

    #[test]
    fn test_rejects_mismatched_shapes() {
        let signals = Modalities::new().with_lfp(signal(10, 3)).with_mua(signal(11, 3));
        assert!(matches!(
            TimeLockedSeries::new(signals),
            Err(EphysError::ShapeMismatch { .. })
        ));

        let signals = Modalities::new().with_lfp(signal(10, 3)).with_spikes(signal(10, 2));
        assert!(TimeLockedSeries::new(signals).is_err());
    }

    #[test]
    fn test_validity_mask() {
        let signals = Modalities::new().with_mua(signal(6, 2));
        let series = TimeLockedSeries::with_trial_windows(signals, vec![1..4, 0..6]).unwrap();
        let mask = series.validity_mask();
        assert_eq!(mask.dim(), (6, 2));
        assert!(!mask[[0, 0]]);
        assert!(mask[[1, 0]] && mask[[3, 0]]);
        assert!(!mask[[4, 0]]);
        assert!(mask.column(1).iter().all(|&v| v));

        assert!(series.lfp().is_none());
        assert_eq!(series.len(), 6);
        assert_eq!(series.times().len(), 6);
    }

    #[test]
    fn test_rejects_bad_windows() {
        let signals = Modalities::new().with_lfp(signal(6, 2));
        assert!(TimeLockedSeries::with_trial_windows(signals.clone(), vec![0..6]).is_err());
        assert!(TimeLockedSeries::with_trial_windows(signals, vec![0..7, 0..6]).is_err());
    }
}
