//! Per-session trial recordings and event time-locking

use crate::error::{EphysError, EphysResult};
use crate::events::EventTable;
use crate::modality::{Modalities, Modality};
use crate::preprocess;
use crate::timelocked::TimeLockedSeries;
use ndarray::Array1;
use std::ops::Range;
use tracing::debug;

/// End of a time-locked window
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LockDuration {
    /// Window closes at the next declared event
    UntilNextEvent,
    /// Window closes a fixed number of seconds after the event
    Fixed(f64),
}

/// LFP, MUA and spike recordings of one condition sharing a trial axis
#[derive(Debug, Clone)]
pub struct ConditionTrials {
    events: EventTable,
    signals: Modalities,
    num_trials: usize,
}

impl ConditionTrials {
    /// Group signals with their event table
    ///
    /// With `zscore_mua` set, MUA is z-scored per channel and trial before
    /// being stored.
    pub fn new(events: EventTable, signals: Modalities, zscore_mua: bool) -> EphysResult<Self> {
        signals.require_any()?;

        let mut num_trials = None;
        for (modality, signal) in signals.iter() {
            match num_trials {
                None => num_trials = Some(signal.num_trials()),
                Some(expected) if expected != signal.num_trials() => {
                    return Err(EphysError::ShapeMismatch {
                        context: match modality {
                            Modality::Lfp => "condition trials (lfp trials)",
                            Modality::Mua => "condition trials (mua trials)",
                            Modality::Spikes => "condition trials (spike trials)",
                        },
                        expected: vec![expected],
                        found: vec![signal.num_trials()],
                    })
                }
                Some(_) => {}
            }
        }
        let num_trials = num_trials.ok_or(EphysError::MissingSignal)?;

        if let Some(event_trials) = events.num_trials() {
            if event_trials != num_trials {
                return Err(EphysError::InvalidEvents {
                    reason: format!(
                        "events cover {} trials, signals have {}",
                        event_trials, num_trials
                    ),
                });
            }
        }

        let mut signals = signals;
        if zscore_mua {
            if let Some(mua) = signals.mua.take() {
                signals.mua = Some(mua.fmap(preprocess::zscore_trials)?);
            }
        }

        Ok(ConditionTrials {
            events,
            signals,
            num_trials,
        })
    }

    pub fn events(&self) -> &EventTable {
        &self.events
    }

    pub fn signals(&self) -> &Modalities {
        &self.signals
    }

    pub fn num_trials(&self) -> usize {
        self.num_trials
    }

    /// Per-trial `(onset, offset)` of a window anchored at `event`
    fn event_bounds(
        &self,
        event: &str,
        duration: LockDuration,
        before: f64,
        after: f64,
    ) -> EphysResult<(Array1<f64>, Array1<f64>)> {
        let onsets = self.events.times(event)?;
        let offsets = match duration {
            LockDuration::UntilNextEvent => self.events.successor(event)?.1.clone(),
            LockDuration::Fixed(seconds) => onsets + seconds,
        };
        Ok((onsets - before, offsets + after))
    }

    /// Cut every present signal into epochs aligned to `event`
    ///
    /// All trials share the axis `[min(onset), max(offset)]`; each trial keeps
    /// only its own `[onset, offset)` window and is zero elsewhere.
    pub fn time_lock(
        &self,
        event: &str,
        duration: LockDuration,
        before: f64,
        after: f64,
    ) -> EphysResult<TimeLockedSeries> {
        let (onsets, offsets) = self.event_bounds(event, duration, before, after)?;
        let first = onsets.iter().copied().fold(f64::INFINITY, f64::min);
        let last = offsets.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        debug!(event, first, last, trials = self.num_trials, "time locking");

        let mut trial_windows: Option<Vec<Range<usize>>> = None;
        let signals = self.signals.try_map(|_, signal| {
            let mut epoch = signal.slice(first, last)?;
            let windows = (0..self.num_trials)
                .map(|trial| epoch.mask_trial(trial, onsets[trial], offsets[trial]))
                .collect::<EphysResult<Vec<_>>>()?;
            trial_windows.get_or_insert(windows);
            Ok(epoch)
        })?;

        match trial_windows {
            Some(windows) => TimeLockedSeries::with_trial_windows(signals, windows),
            None => Err(EphysError::MissingSignal),
        }
    }
}
