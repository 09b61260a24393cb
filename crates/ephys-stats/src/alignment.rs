//! Laminar alignment of electrode channels across sessions
//!
//! Each session contributes one `(first, reference, last)` row of channel ids,
//! where the reference is the median channel of the reference layer. The
//! result re-centres every session on its reference with the mean extents
//! seen across sessions.

use crate::config::AlignmentConfig;
use crate::persist::ArrayTable;
use crate::statistic::{SampleAxis, Statistic, StatisticData};
use crate::summary::Summary;
use ephys_core::{ChannelTable, EphysError, EphysResult, Signal};
use ndarray::{Array2, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rows are `(low, reference, high)` channel ids
const ROW: usize = 3;

/// Accumulated laminar geometry of many sessions
#[derive(Debug, Clone, PartialEq)]
pub struct LaminarAlignment {
    config: AlignmentConfig,
    data: StatisticData,
    num_times: Option<usize>,
}

/// Persisted non-array state of [`LaminarAlignment`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentMetadata {
    pub config: AlignmentConfig,
    pub num_times: Option<usize>,
}

impl Default for LaminarAlignment {
    fn default() -> Self {
        LaminarAlignment {
            config: AlignmentConfig::default(),
            data: StatisticData::new(vec![ROW], SampleAxis::Leading),
            num_times: None,
        }
    }
}

impl LaminarAlignment {
    pub fn new(config: AlignmentConfig) -> EphysResult<Self> {
        config.validate()?;
        Ok(LaminarAlignment {
            config,
            ..Self::default()
        })
    }

    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }

    /// Shortest element length seen so far
    pub fn num_times(&self) -> Option<usize> {
        self.num_times
    }

    /// Per-session `(low, reference, high)` with the mean extents, rounded
    pub fn result(&self) -> EphysResult<Array2<f64>> {
        let rows = self
            .data
            .require(Self::KIND)?
            .view()
            .into_dimensionality::<ndarray::Ix2>()
            .map_err(|e| EphysError::IncompatibleElement {
                kind: Self::KIND,
                reason: e.to_string(),
            })?;

        let reference = rows.column(1);
        let low_distance = (&reference - &rows.column(0)).mean().unwrap_or(0.0);
        let high_distance = (&rows.column(2) - &reference).mean().unwrap_or(0.0);

        let mut result = Array2::zeros((rows.nrows(), ROW));
        for (i, &center) in reference.iter().enumerate() {
            result[[i, 0]] = (center - low_distance).round_ties_even();
            result[[i, 1]] = center.round_ties_even();
            result[[i, 2]] = (center + high_distance).round_ties_even();
        }
        Ok(result)
    }

    /// Channel span of the first session
    pub fn num_channels(&self) -> EphysResult<usize> {
        let result = self.result()?;
        Ok((result[[0, 2]] - result[[0, 0]]).max(0.0) as usize)
    }

    /// Channels of `signal` at positions `[low, high)` of session `i`,
    /// truncated to the shortest length seen
    pub fn align(&self, i: usize, signal: &Signal) -> EphysResult<Signal> {
        let result = self.result()?;
        if i >= result.nrows() {
            return Err(EphysError::IncompatibleElement {
                kind: Self::KIND,
                reason: format!("session {} out of range for {} sessions", i, result.nrows()),
            });
        }
        let (low, high) = (result[[i, 0]], result[[i, 2]]);
        let mask: Vec<bool> = (0..signal.num_channels())
            .map(|c| (c as f64) >= low && (c as f64) < high)
            .collect();

        let aligned = signal.select_mask(&mask)?;
        match self.num_times {
            Some(len) => aligned.truncate(len),
            None => Ok(aligned),
        }
    }
}

/// String values of `column` for every channel
fn channel_locations(channels: &ChannelTable, column: &str) -> EphysResult<Vec<String>> {
    channels
        .iter()
        .map(|channel| match channel.column(column) {
            Some(value) => value.as_str().map(str::to_string).ok_or_else(|| {
                EphysError::IncompatibleElement {
                    kind: LaminarAlignment::KIND,
                    reason: format!("channel {} has non-string {} {}", channel.id, column, value),
                }
            }),
            None => Err(EphysError::IncompatibleElement {
                kind: LaminarAlignment::KIND,
                reason: format!("channel {} has no {}", channel.id, column),
            }),
        })
        .collect()
}

/// Longest prefix shared by every string
pub fn common_prefix(strings: &[String]) -> String {
    let Some(first) = strings.first() else {
        return String::new();
    };
    let mut len = first.len();
    for other in &strings[1..] {
        len = first
            .char_indices()
            .zip(other.chars())
            .take_while(|((_, a), b)| a == b)
            .last()
            .map_or(0, |((i, a), _)| i + a.len_utf8())
            .min(len);
    }
    first[..len].to_string()
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

impl Statistic for LaminarAlignment {
    const KIND: &'static str = "LaminarAlignment";
    type Element = Signal;
    type Metadata = AlignmentMetadata;

    fn data(&self) -> &StatisticData {
        &self.data
    }

    fn with_data(&self, data: StatisticData) -> Self {
        LaminarAlignment {
            data,
            ..self.clone()
        }
    }

    fn apply(&self, element: &Signal) -> EphysResult<Self> {
        let channels = element.channels();
        if channels.is_empty() {
            return Err(EphysError::IncompatibleElement {
                kind: Self::KIND,
                reason: "element has no channels".to_string(),
            });
        }

        let locations = channel_locations(channels, &self.config.column)?;
        let reference = common_prefix(&locations) + &self.config.reference_layer;
        let mut reference_ids: Vec<f64> = channels
            .iter()
            .zip(&locations)
            .filter(|(_, location)| location.contains(&reference))
            .map(|(channel, _)| channel.id as f64)
            .collect();
        if reference_ids.is_empty() {
            return Err(EphysError::IncompatibleElement {
                kind: Self::KIND,
                reason: format!("no channel lies in reference layer '{}'", reference),
            });
        }
        let center = median(&mut reference_ids).round_ties_even();

        let ids = channels.ids();
        let (first, last) = (ids[0] as f64, ids[ids.len() - 1] as f64);
        let row = ArrayD::from_shape_vec(IxDyn(&[1, ROW]), vec![first, center, last])
            .map_err(|e| EphysError::IncompatibleElement {
                kind: Self::KIND,
                reason: e.to_string(),
            })?;
        debug!(reference = %reference, first, center, last, "laminar row");

        let num_times = Some(match self.num_times {
            Some(len) => len.min(element.len()),
            None => element.len(),
        });
        Ok(LaminarAlignment {
            config: self.config.clone(),
            data: self.data.append(Self::KIND, row)?,
            num_times,
        })
    }

    fn metadata(&self) -> AlignmentMetadata {
        AlignmentMetadata {
            config: self.config.clone(),
            num_times: self.num_times,
        }
    }

    fn restore(
        metadata: AlignmentMetadata,
        data: StatisticData,
        _arrays: &ArrayTable,
        _channels: Option<ChannelTable>,
    ) -> EphysResult<Self> {
        if data.iid_shape() != [ROW] || data.sample_axis() != SampleAxis::Leading {
            return Err(EphysError::ShapeMismatch {
                context: "restored laminar alignment",
                expected: vec![ROW],
                found: data.iid_shape().to_vec(),
            });
        }
        Ok(LaminarAlignment {
            config: metadata.config,
            data,
            num_times: metadata.num_times,
        })
    }
}

/// Cortical area of a signal: the leading alphanumeric run of the common
/// location prefix (`"V1-L23"`, `"V1-L4"` give `"V1"`)
pub fn area_key(config: &AlignmentConfig, signal: &Signal) -> EphysResult<String> {
    let locations = channel_locations(signal.channels(), &config.column)?;
    let prefix = common_prefix(&locations);
    let area: String = prefix.chars().take_while(|c| c.is_alphanumeric()).collect();
    if area.is_empty() {
        return Err(EphysError::IncompatibleElement {
            kind: LaminarAlignment::KIND,
            reason: format!("channel locations share no area prefix ({:?})", prefix),
        });
    }
    Ok(area)
}

/// Summary of laminar alignments keyed by signal name and cortical area
pub fn alignment_summary(config: AlignmentConfig) -> EphysResult<Summary<LaminarAlignment>> {
    config.validate()?;
    let key_config = config.clone();
    Ok(Summary::new(
        move |signal| area_key(&key_config, signal),
        move |_| LaminarAlignment::new(config.clone()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ephys_core::ChannelInfo;
    use ndarray::Array3;
    use tempfile::tempdir;

    fn laminar_signal(first_id: i64, layers: &[&str], samples: usize) -> Signal {
        let channels: ChannelTable = layers
            .iter()
            .enumerate()
            .map(|(i, layer)| {
                ChannelInfo::new(first_id + i as i64).with_location(format!("V1-L{}", layer))
            })
            .collect();
        let data =
            Array3::from_shape_fn((layers.len(), samples, 2), |(c, t, _)| (c * 100 + t) as f64);
        Signal::uniform(channels, data, 0.001, 0.0).unwrap()
    }

    #[test]
    fn test_common_prefix() {
        let strings = vec!["V1-L23".to_string(), "V1-L4".to_string(), "V1-L5".to_string()];
        assert_eq!(common_prefix(&strings), "V1-L");
        assert_eq!(common_prefix(&["abc".to_string()]), "abc");
        assert_eq!(common_prefix(&["abc".to_string(), "xyz".to_string()]), "");
        assert_eq!(common_prefix(&[]), "");
    }

    #[test]
    fn test_rows_and_result() {
        let mut alignment = LaminarAlignment::default();
        let first = laminar_signal(0, &["23", "23", "4", "4", "4", "5", "6"], 120);
        let second = laminar_signal(10, &["23", "4", "4", "5", "5", "6"], 100);
        alignment.calculate([&first, &second]).unwrap();

        let rows = alignment.values().unwrap();
        assert_eq!(rows.shape(), &[2, 3]);
        assert_eq!(rows[[0, 1]], 3.0);
        // Median of 11 and 12 is 11.5, rounded half to even.
        assert_eq!(rows[[1, 1]], 12.0);
        assert_eq!(alignment.num_times(), Some(100));

        // Low distances 3 and 2, high distances 3 and 3.
        let result = alignment.result().unwrap();
        assert_eq!(result.row(0).to_vec(), vec![0.0, 3.0, 6.0]);
        assert_eq!(result.row(1).to_vec(), vec![10.0, 12.0, 15.0]);
        assert_eq!(alignment.num_channels().unwrap(), 6);
    }

    #[test]
    fn test_align_selects_positions_and_truncates() {
        let mut alignment = LaminarAlignment::default();
        let first = laminar_signal(0, &["23", "23", "4", "4", "4", "5", "6"], 120);
        let short = laminar_signal(0, &["23", "4", "5"], 80);
        alignment.calculate([&first, &short]).unwrap();

        let aligned = alignment.align(0, &first).unwrap();
        let row = alignment.result().unwrap();
        assert_eq!(aligned.num_channels(), (row[[0, 2]] - row[[0, 0]]) as usize);
        assert_eq!(aligned.len(), 80);
        assert!(alignment.align(5, &first).is_err());
    }

    #[test]
    fn test_rejects_missing_reference_layer() {
        let signal = laminar_signal(0, &["23", "5", "6"], 10);
        assert!(matches!(
            LaminarAlignment::default().apply(&signal),
            Err(EphysError::IncompatibleElement { .. })
        ));

        let unlabeled =
            Signal::uniform(ChannelTable::numbered(2), Array3::zeros((2, 5, 1)), 0.001, 0.0)
                .unwrap();
        assert!(LaminarAlignment::default().apply(&unlabeled).is_err());
    }

    #[test]
    fn test_round_trip() {
        let mut alignment = LaminarAlignment::default();
        alignment
            .calculate([&laminar_signal(4, &["3", "4", "5"], 50)])
            .unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("alignment");
        alignment.pickle(&path).unwrap();
        let restored = LaminarAlignment::unpickle(&path).unwrap();
        assert_eq!(restored, alignment);
    }

    #[test]
    fn test_area_key() {
        let signal = laminar_signal(0, &["23", "4"], 10);
        assert_eq!(area_key(&AlignmentConfig::default(), &signal).unwrap(), "V1");
    }
}
