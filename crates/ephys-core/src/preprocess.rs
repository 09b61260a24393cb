//! Array transforms applied to signals through [`Signal::fmap`](crate::Signal::fmap)
//!
//! All functions take a `(channel, time, trial)` view and return a new array
//! of the same shape.

use ndarray::{s, Array3, ArrayView3, Axis};

/// Per-channel, per-trial z-score over the time axis
///
/// Each `data[c, :, n]` trace is shifted to zero mean and scaled to unit
/// standard deviation (population, ddof = 0). Constant traces are only
/// mean-subtracted.
pub fn zscore_trials(data: ArrayView3<'_, f64>) -> Array3<f64> {
    let mut out = data.to_owned();
    let (num_channels, _, num_trials) = out.dim();
    for c in 0..num_channels {
        for n in 0..num_trials {
            let mut trace = out.slice_mut(s![c, .., n]);
            let Some(mean) = trace.mean() else { continue };
            let sum_sq = trace.iter().map(|&v| (v - mean) * (v - mean)).sum::<f64>();
            let var = sum_sq / trace.len() as f64;
            let std = var.sqrt();
            if std > 0.0 {
                trace.mapv_inplace(|v| (v - mean) / std);
            } else {
                trace.mapv_inplace(|v| v - mean);
            }
        }
    }
    out
}

/// Subtract the across-trial mean (the evoked component) from every trial
pub fn remove_evoked(data: ArrayView3<'_, f64>) -> Array3<f64> {
    match data.mean_axis(Axis(2)) {
        Some(mean) => &data - &mean.insert_axis(Axis(2)),
        None => data.to_owned(),
    }
}

/// Per-channel, per-trial baseline correction over the whole trace
pub fn baseline_correct(data: ArrayView3<'_, f64>) -> Array3<f64> {
    match data.mean_axis(Axis(1)) {
        Some(mean) => &data - &mean.insert_axis(Axis(1)),
        None => data.to_owned(),
    }
}
