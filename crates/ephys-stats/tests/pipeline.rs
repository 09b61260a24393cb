//! End-to-end: sessions -> time-locked epochs -> keyed summaries -> disk

use ephys_core::{
    ChannelInfo, ChannelTable, ConditionTrials, EventTable, LockDuration, Modalities, Signal,
    TimeLockedSeries,
};
use ephys_stats::alignment::area_key;
use ephys_stats::{
    alignment_summary, AlignmentConfig, PowerSpectrum, SpectralConfig, Statistic, Summary,
    TaperConfig,
};
use ndarray::{array, s, Array3};
use std::f64::consts::PI;
use tempfile::tempdir;

const LAYERS: [&str; 6] = ["23", "23", "4", "4", "5", "6"];

fn channels() -> ChannelTable {
    LAYERS
        .iter()
        .enumerate()
        .map(|(i, layer)| ChannelInfo::new(i as i64).with_location(format!("V1-L{}", layer)))
        .collect()
}

fn recording(trials: usize, phase: f64) -> Signal {
    let data = Array3::from_shape_fn((LAYERS.len(), 1000, trials), |(c, t, n)| {
        let time = t as f64 * 0.001;
        (1.0 + c as f64) * (2.0 * PI * 30.0 * time + phase + n as f64).sin()
    });
    Signal::uniform(channels(), data, 0.001, 0.0).unwrap()
}

fn session(stim: ndarray::Array1<f64>, phase: f64) -> TimeLockedSeries {
    let resp = &stim + 0.4;
    let events = EventTable::new()
        .with_event("stim", stim)
        .unwrap()
        .with_event("resp", resp)
        .unwrap();
    let signals = Modalities::new()
        .with_lfp(recording(3, phase))
        .with_mua(recording(3, phase + 0.5));
    ConditionTrials::new(events, signals, true)
        .unwrap()
        .time_lock("stim", LockDuration::UntilNextEvent, 0.1, 0.0)
        .unwrap()
}

fn spectral_config() -> SpectralConfig {
    SpectralConfig {
        df: 2.0,
        fmax: 100.0,
        f0: 1000.0,
        chunk_trials: 2,
        taper: TaperConfig::default(),
    }
}

fn spectrum_summary() -> Summary<PowerSpectrum> {
    let config = AlignmentConfig::default();
    Summary::new(
        move |signal| area_key(&config, signal),
        |signal| PowerSpectrum::for_signal(spectral_config(), signal),
    )
}

#[test]
fn test_spectra_across_sessions() {
    let sessions = vec![
        session(array![0.2, 0.3, 0.25], 0.0),
        session(array![0.15, 0.35, 0.2], 1.0),
    ];
    assert_eq!(sessions[0].len(), 600);
    assert_eq!(sessions[1].len(), 700);

    let mut summary = spectrum_summary();
    let stats = summary.calculate(&sessions).unwrap();
    assert_eq!(stats.keys().collect::<Vec<_>>(), vec!["lfp/V1", "mua/V1"]);

    let lfp = &stats["lfp/V1"];
    assert_eq!(lfp.values().unwrap().shape(), &[6, 50, 6]);
    let mean = lfp.result().unwrap();
    let thirty = lfp.closest_freq(30.0);
    let peak = (0..50)
        .max_by(|&a, &b| mean[[5, a]].total_cmp(&mean[[5, b]]))
        .unwrap();
    assert_eq!(peak, thirty);

    let dir = tempdir().unwrap();
    summary.pickle(dir.path()).unwrap();
    let config = AlignmentConfig::default();
    let restored = Summary::<PowerSpectrum>::unpickle(
        dir.path(),
        move |signal| area_key(&config, signal),
        |signal| PowerSpectrum::for_signal(spectral_config(), signal),
    )
    .unwrap();
    assert_eq!(restored.stats(), summary.stats());
    assert_eq!(restored.elements_seen(), 2);
}

#[test]
fn test_alignment_across_sessions() {
    let sessions = vec![
        session(array![0.2, 0.3, 0.25], 0.0),
        session(array![0.15, 0.35, 0.2], 1.0),
    ];

    let mut summary = alignment_summary(AlignmentConfig::default()).unwrap();
    summary.calculate(&sessions).unwrap();
    assert_eq!(summary.len(), 2);

    let alignment = summary.get("lfp/V1").unwrap();
    let rows = alignment.values().unwrap();
    assert_eq!(rows.shape(), &[2, 3]);
    assert_eq!(rows.slice(s![0, ..]).to_vec(), vec![0.0, 2.0, 5.0]);
    assert_eq!(alignment.num_times(), Some(600));

    let aligned = alignment.align(1, sessions[1].lfp().unwrap()).unwrap();
    assert_eq!(aligned.num_channels(), 5);
    assert_eq!(aligned.len(), 600);

    let dir = tempdir().unwrap();
    summary.pickle(dir.path()).unwrap();
    assert!(dir.path().join("mua/V1/LaminarAlignment.json").is_file());
}
