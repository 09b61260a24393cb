//! Keyed collections of statistics built across recordings
//!
//! Every element handed to [`Summary::calculate`] exposes named signals. Each
//! signal is routed to the statistic stored under `"<name>/<sub-key>"`, where
//! the sub-key is computed from the signal itself. Statistics are created on
//! first use.

use crate::persist::{self, contains_statistic};
use crate::statistic::Statistic;
use ephys_core::{EphysError, EphysResult, Modalities, Signal, TimeLockedSeries};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Manifest file written next to the per-key directories
pub const MANIFEST_FILE: &str = "summary.json";

/// Element exposing named signals to a [`Summary`]
pub trait SignalBundle {
    fn signals(&self) -> Vec<(String, &Signal)>;
}

impl SignalBundle for Modalities {
    fn signals(&self) -> Vec<(String, &Signal)> {
        self.iter()
            .map(|(modality, signal)| (modality.name().to_string(), signal))
            .collect()
    }
}

impl SignalBundle for TimeLockedSeries {
    fn signals(&self) -> Vec<(String, &Signal)> {
        SignalBundle::signals(TimeLockedSeries::signals(self))
    }
}

impl SignalBundle for BTreeMap<String, Signal> {
    fn signals(&self) -> Vec<(String, &Signal)> {
        self.iter().map(|(name, signal)| (name.clone(), signal)).collect()
    }
}

type SubKey = Box<dyn Fn(&Signal) -> EphysResult<String>>;
type Constructor<S> = Box<dyn Fn(&Signal) -> EphysResult<S>>;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    kind: String,
    keys: Vec<String>,
    elements_seen: usize,
}

/// Map from composite key to statistic
pub struct Summary<S: Statistic<Element = Signal>> {
    signal_key: SubKey,
    constructor: Constructor<S>,
    stats: BTreeMap<String, S>,
    elements_seen: usize,
}

impl<S: Statistic<Element = Signal> + fmt::Debug> fmt::Debug for Summary<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Summary")
            .field("kind", &S::KIND)
            .field("stats", &self.stats)
            .field("elements_seen", &self.elements_seen)
            .finish()
    }
}

impl<S: Statistic<Element = Signal>> Summary<S> {
    /// Empty summary
    ///
    /// `signal_key` computes the sub-key of a signal; `constructor` builds the
    /// empty statistic for a key the first time one of its signals arrives.
    pub fn new<F, G>(signal_key: F, constructor: G) -> Self
    where
        F: Fn(&Signal) -> EphysResult<String> + 'static,
        G: Fn(&Signal) -> EphysResult<S> + 'static,
    {
        Summary {
            signal_key: Box::new(signal_key),
            constructor: Box::new(constructor),
            stats: BTreeMap::new(),
            elements_seen: 0,
        }
    }

    /// Fold every signal of every element into its keyed statistic
    pub fn calculate<'a, B, I>(&mut self, elements: I) -> EphysResult<&BTreeMap<String, S>>
    where
        B: SignalBundle + 'a,
        I: IntoIterator<Item = &'a B>,
    {
        let mut batch = 0;
        for element in elements {
            for (name, signal) in SignalBundle::signals(element) {
                let key = format!("{}/{}", name, (self.signal_key)(signal)?);
                validate_key(&key)?;

                let next = match self.stats.get(&key) {
                    Some(stat) => stat.apply(signal)?,
                    None => {
                        debug!(kind = S::KIND, key = %key, "new summary entry");
                        (self.constructor)(signal)?.apply(signal)?
                    }
                };
                self.stats.insert(key, next);
            }
            self.elements_seen += 1;
            batch += 1;
        }
        info!(
            kind = S::KIND,
            elements = batch,
            keys = self.stats.len(),
            "summary batch folded"
        );
        Ok(&self.stats)
    }

    pub fn stats(&self) -> &BTreeMap<String, S> {
        &self.stats
    }

    pub fn get(&self, key: &str) -> Option<&S> {
        self.stats.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.stats.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Elements folded since construction, including restored ones
    pub fn elements_seen(&self) -> usize {
        self.elements_seen
    }

    pub fn into_stats(self) -> BTreeMap<String, S> {
        self.stats
    }

    /// Persist every entry under `path/<key>` and the manifest last
    pub fn pickle(&self, path: &Path) -> EphysResult<()> {
        persist::prepare_dir(path)?;
        for (key, stat) in &self.stats {
            stat.pickle(&key_dir(path, key))?;
        }

        let manifest = Manifest {
            kind: S::KIND.to_string(),
            keys: self.stats.keys().cloned().collect(),
            elements_seen: self.elements_seen,
        };
        let manifest_path = path.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&manifest).map_err(|e| {
            EphysError::persistence(&manifest_path, format!("failed to serialize manifest: {}", e))
        })?;
        fs::write(&manifest_path, json)?;

        info!(
            kind = S::KIND,
            dir = %path.display(),
            keys = self.stats.len(),
            "persisted summary"
        );
        Ok(())
    }

    /// Restore a summary persisted with [`Summary::pickle`]
    pub fn unpickle<F, G>(path: &Path, signal_key: F, constructor: G) -> EphysResult<Self>
    where
        F: Fn(&Signal) -> EphysResult<String> + 'static,
        G: Fn(&Signal) -> EphysResult<S> + 'static,
    {
        Self::unpickle_with(path, signal_key, constructor, |stat| stat)
    }

    /// Restore a summary, passing every reloaded statistic through `restore`
    ///
    /// Runtime state that is not persisted, such as a custom frequency
    /// transform, is re-attached here.
    pub fn unpickle_with<F, G, H>(
        path: &Path,
        signal_key: F,
        constructor: G,
        mut restore: H,
    ) -> EphysResult<Self>
    where
        F: Fn(&Signal) -> EphysResult<String> + 'static,
        G: Fn(&Signal) -> EphysResult<S> + 'static,
        H: FnMut(S) -> S,
    {
        let manifest_path = path.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(EphysError::persistence(&manifest_path, "summary manifest not found"));
        }
        let manifest: Manifest = serde_json::from_str(&fs::read_to_string(&manifest_path)?)
            .map_err(|e| {
                EphysError::persistence(&manifest_path, format!("invalid manifest: {}", e))
            })?;
        if manifest.kind != S::KIND {
            return Err(EphysError::KindMismatch {
                expected: S::KIND,
                found: manifest.kind,
            });
        }

        let mut found = Vec::new();
        scan_keys(path, path, S::KIND, &mut found)?;
        found.sort();
        let mut expected = manifest.keys;
        expected.sort();
        if found != expected {
            return Err(EphysError::persistence(
                path,
                format!("manifest lists keys {:?} but found {:?}", expected, found),
            ));
        }

        let mut summary = Summary::new(signal_key, constructor);
        for key in found {
            let stat = S::unpickle(&key_dir(path, &key))?;
            summary.stats.insert(key, restore(stat));
        }
        summary.elements_seen = manifest.elements_seen;
        debug!(kind = S::KIND, keys = summary.len(), "restored summary");
        Ok(summary)
    }
}

/// Keys are `/`-separated relative path segments
fn validate_key(key: &str) -> EphysResult<()> {
    let valid = key.split('/').all(|segment| {
        let mut components = Path::new(segment).components();
        matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) && !segment.contains('\\')
    });
    if valid {
        Ok(())
    } else {
        Err(EphysError::ConfigurationError {
            message: format!("Summary key {:?} is not a relative path of non-empty segments", key),
        })
    }
}

fn key_dir(root: &Path, key: &str) -> PathBuf {
    key.split('/').fold(root.to_path_buf(), |dir, segment| dir.join(segment))
}

/// Collect keys of every directory below `root` holding a statistic of `kind`
fn scan_keys(root: &Path, dir: &Path, kind: &str, found: &mut Vec<String>) -> EphysResult<()> {
    for entry in fs::read_dir(dir)? {
        let child = entry?.path();
        if !child.is_dir() {
            continue;
        }
        if contains_statistic(&child, kind) {
            let relative = child
                .strip_prefix(root)
                .map_err(|e| EphysError::persistence(&child, e.to_string()))?;
            let segments = relative
                .components()
                .map(|c| {
                    c.as_os_str()
                        .to_str()
                        .map(str::to_string)
                        .ok_or_else(|| EphysError::persistence(&child, "key is not valid UTF-8"))
                })
                .collect::<EphysResult<Vec<_>>>()?;
            found.push(segments.join("/"));
        }
        scan_keys(root, &child, kind, found)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::ArrayTable;
    use crate::statistic::{SampleAxis, StatisticData};
    use ephys_core::{ChannelInfo, ChannelTable, Literal};
    use ndarray::{arr2, Array3};
    use tempfile::tempdir;

    /// Records `(trials, length)` of every signal folded
    #[derive(Debug, Clone, PartialEq)]
    struct Extent {
        data: StatisticData,
    }

    impl Extent {
        fn new() -> Self {
            Extent {
                data: StatisticData::new(vec![2], SampleAxis::Leading),
            }
        }
    }

    impl Statistic for Extent {
        const KIND: &'static str = "Extent";
        type Element = Signal;
        type Metadata = ();

        fn data(&self) -> &StatisticData {
            &self.data
        }

        fn with_data(&self, data: StatisticData) -> Self {
            Extent { data }
        }

        fn apply(&self, element: &Signal) -> EphysResult<Self> {
            let sample = arr2(&[[element.num_trials() as f64, element.len() as f64]]);
            Ok(self.with_data(self.data.append(Self::KIND, sample.into_dyn())?))
        }

        fn metadata(&self) -> Self::Metadata {}

        fn restore(
            _: (),
            data: StatisticData,
            _: &ArrayTable,
            _: Option<ChannelTable>,
        ) -> EphysResult<Self> {
            Ok(Extent { data })
        }
    }

    fn recording(area: &str, samples: usize, trials: usize) -> Signal {
        let channels: ChannelTable = (0..2)
            .map(|i| ChannelInfo::new(i).with_attribute("area", area))
            .collect();
        Signal::uniform(channels, Array3::zeros((2, samples, trials)), 0.001, 0.0).unwrap()
    }

    fn area(signal: &Signal) -> EphysResult<String> {
        match signal.channels().get(0).and_then(|c| c.column("area")) {
            Some(Literal::Str(area)) => Ok(area),
            _ => Err(EphysError::ChannelSelection {
                reason: "no area column".to_string(),
            }),
        }
    }

    fn summary() -> Summary<Extent> {
        Summary::new(area, |_| Ok(Extent::new()))
    }

    fn bundle(entries: &[(&str, Signal)]) -> BTreeMap<String, Signal> {
        entries
            .iter()
            .map(|(name, signal)| (name.to_string(), signal.clone()))
            .collect()
    }

    #[test]
    fn test_same_sub_key_accumulates_in_order() {
        let first = Modalities::new().with_lfp(recording("V1", 100, 3));
        let second = Modalities::new().with_lfp(recording("V1", 80, 5));

        let mut summary = summary();
        let stats = summary.calculate([&first, &second]).unwrap();
        assert_eq!(stats.len(), 1);

        let payload = stats["lfp/V1"].values().unwrap();
        assert_eq!(payload.shape(), &[2, 2]);
        assert_eq!(payload[[0, 0]], 3.0);
        assert_eq!(payload[[1, 0]], 5.0);
        assert_eq!(payload[[1, 1]], 80.0);
        assert_eq!(summary.elements_seen(), 2);
    }

    #[test]
    fn test_keys_split_by_signal_name_and_sub_key() {
        let mut summary = summary();
        summary
            .calculate(&[
                bundle(&[("lfp", recording("V1", 10, 1)), ("mua", recording("V4", 10, 1))]),
                bundle(&[("lfp", recording("V4", 10, 2))]),
            ])
            .unwrap();
        assert_eq!(summary.keys().collect::<Vec<_>>(), vec!["lfp/V1", "lfp/V4", "mua/V4"]);
        assert!(summary.get("lfp/V4").is_some());
        assert!(summary.get("V4").is_none());
    }

    #[test]
    fn test_invalid_sub_keys_are_rejected() {
        for bad in ["..", "", "/abs", "a\\b"] {
            let mut summary = summary();
            let element = bundle(&[("lfp", recording(bad, 10, 1))]);
            assert!(
                matches!(
                    summary.calculate([&element]),
                    Err(EphysError::ConfigurationError { .. })
                ),
                "accepted {:?}",
                bad
            );
            assert!(summary.is_empty());
        }

        let mut summary = summary();
        let nested = bundle(&[("lfp", recording("V1/L4", 10, 1))]);
        summary.calculate([&nested]).unwrap();
        assert!(summary.get("lfp/V1/L4").is_some());
    }

    #[test]
    fn test_round_trip() {
        let mut summary = summary();
        summary
            .calculate(&[
                bundle(&[("lfp", recording("V1", 10, 1)), ("mua", recording("V1/L4", 12, 2))]),
                bundle(&[("lfp", recording("V1", 10, 4))]),
            ])
            .unwrap();

        let dir = tempdir().unwrap();
        summary.pickle(dir.path()).unwrap();
        assert!(dir.path().join("mua/V1/L4/Extent.json").is_file());

        let restored =
            Summary::<Extent>::unpickle(dir.path(), area, |_| Ok(Extent::new())).unwrap();
        assert_eq!(restored.stats(), summary.stats());
        assert_eq!(restored.elements_seen(), 2);
    }

    #[test]
    fn test_unpickle_checks_manifest() {
        let mut summary = summary();
        summary
            .calculate([&bundle(&[
                ("lfp", recording("V1", 10, 1)),
                ("mua", recording("V2", 10, 1)),
            ])])
            .unwrap();
        let dir = tempdir().unwrap();
        summary.pickle(dir.path()).unwrap();

        fs::remove_dir_all(dir.path().join("mua")).unwrap();
        assert!(matches!(
            Summary::<Extent>::unpickle(dir.path(), area, |_| Ok(Extent::new())),
            Err(EphysError::Persistence { .. })
        ));

        let empty = tempdir().unwrap();
        assert!(Summary::<Extent>::unpickle(empty.path(), area, |_| Ok(Extent::new())).is_err());
    }
}
