//! On-disk layout of a persisted statistic
//!
//! A statistic of kind `K` persisted under directory `dir` consists of:
//!
//! - `dir/K.safetensors`: every named numeric array, f64 little-endian
//! - `dir/channels.csv`: the channel table, for channel-aware statistics
//! - `dir/K.json`: the metadata envelope, written last
//!
//! Structured channel values are stored as literal text and parsed back with
//! [`Literal::parse`], never evaluated.

use crate::statistic::{SampleAxis, Statistic, StatisticData};
use ephys_core::{ChannelInfo, ChannelTable, EphysError, EphysResult, Literal};
use ndarray::{ArrayD, IxDyn};
use safetensors::tensor::{Dtype, SafeTensors, TensorView};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the payload array inside the array table
pub const PAYLOAD: &str = "data";

/// File holding the channel table
pub const CHANNELS_FILE: &str = "channels.csv";

/// Named f64 arrays persisted together
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArrayTable {
    arrays: BTreeMap<String, ArrayD<f64>>,
}

impl ArrayTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, array: ArrayD<f64>) {
        self.arrays.insert(name.to_string(), array);
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f64>> {
        self.arrays.get(name)
    }

    /// Array `name`, failing with a persistence error when absent
    pub fn require(&self, name: &str) -> EphysResult<&ArrayD<f64>> {
        self.arrays.get(name).ok_or_else(|| {
            EphysError::persistence(PathBuf::new(), format!("missing array '{}'", name))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.arrays.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    fn remove(&mut self, name: &str) -> Option<ArrayD<f64>> {
        self.arrays.remove(name)
    }
}

/// Metadata envelope stored as `<Kind>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope<M> {
    kind: String,
    iid_shape: Vec<usize>,
    sample_axis: SampleAxis,
    arrays: Vec<String>,
    config: M,
}

/// Path of the metadata envelope for `kind` under `dir`
pub fn metadata_path(dir: &Path, kind: &str) -> PathBuf {
    dir.join(format!("{}.json", kind))
}

fn arrays_path(dir: &Path, kind: &str) -> PathBuf {
    dir.join(format!("{}.safetensors", kind))
}

/// Whether `dir` holds a persisted statistic of `kind`
pub fn contains_statistic(dir: &Path, kind: &str) -> bool {
    metadata_path(dir, kind).is_file()
}

/// Create `dir` unless it exists; an existing non-directory is an error
pub(crate) fn prepare_dir(dir: &Path) -> EphysResult<()> {
    if dir.exists() && !dir.is_dir() {
        return Err(EphysError::persistence(dir, "target exists and is not a directory"));
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Persist `stat` into `dir`
pub fn save<S: Statistic>(stat: &S, dir: &Path) -> EphysResult<()> {
    prepare_dir(dir)?;

    let mut arrays = stat.extra_arrays();
    if let Some(values) = stat.values() {
        arrays.insert(PAYLOAD, values.clone());
    }
    write_arrays(&arrays_path(dir, S::KIND), &arrays)?;

    if let Some(channels) = stat.channels() {
        write_channels(&dir.join(CHANNELS_FILE), channels)?;
    }

    let envelope = Envelope {
        kind: S::KIND.to_string(),
        iid_shape: stat.iid_shape().to_vec(),
        sample_axis: stat.data().sample_axis(),
        arrays: arrays.names().map(str::to_string).collect(),
        config: stat.metadata(),
    };
    let path = metadata_path(dir, S::KIND);
    let json = serde_json::to_string_pretty(&envelope).map_err(|e| {
        EphysError::persistence(&path, format!("failed to serialize metadata: {}", e))
    })?;
    fs::write(&path, json)?;

    info!(kind = S::KIND, dir = %dir.display(), arrays = arrays.len(), "persisted statistic");
    Ok(())
}

/// Restore a statistic of kind `S` from `dir`
pub fn load<S: Statistic>(dir: &Path) -> EphysResult<S> {
    if !dir.is_dir() {
        return Err(EphysError::persistence(dir, "not a directory"));
    }

    let path = metadata_path(dir, S::KIND);
    if !path.is_file() {
        return Err(EphysError::persistence(&path, "metadata file not found"));
    }
    let json = fs::read_to_string(&path)?;
    let raw: serde_json::Value = serde_json::from_str(&json)
        .map_err(|e| EphysError::persistence(&path, format!("invalid metadata: {}", e)))?;
    match raw.get("kind").and_then(serde_json::Value::as_str) {
        Some(kind) if kind == S::KIND => {}
        Some(kind) => {
            return Err(EphysError::KindMismatch {
                expected: S::KIND,
                found: kind.to_string(),
            })
        }
        None => return Err(EphysError::persistence(&path, "metadata has no kind tag")),
    }
    let envelope: Envelope<S::Metadata> = serde_json::from_value(raw)
        .map_err(|e| EphysError::persistence(&path, format!("invalid metadata: {}", e)))?;

    let array_path = arrays_path(dir, S::KIND);
    if !array_path.is_file() {
        return Err(EphysError::persistence(&array_path, "array file not found"));
    }
    let mut arrays = read_arrays(&array_path)?;
    if let Some(missing) = envelope.arrays.iter().find(|name| arrays.get(name).is_none()) {
        return Err(EphysError::persistence(
            &array_path,
            format!("metadata names array '{}' which was not written", missing),
        ));
    }

    let data = match arrays.remove(PAYLOAD) {
        Some(values) => StatisticData::with_values(envelope.iid_shape, envelope.sample_axis, values)
            .map_err(|e| EphysError::persistence(&array_path, e.to_string()))?,
        None => StatisticData::new(envelope.iid_shape, envelope.sample_axis),
    };

    let channel_path = dir.join(CHANNELS_FILE);
    let channels = if channel_path.is_file() {
        Some(read_channels(&channel_path)?)
    } else {
        None
    };

    debug!(kind = S::KIND, dir = %dir.display(), "restoring statistic");
    S::restore(envelope.config, data, &arrays, channels)
}

/// Write `arrays` as a safetensors file
pub fn write_arrays(path: &Path, arrays: &ArrayTable) -> EphysResult<()> {
    let buffers: Vec<(&str, Vec<usize>, Vec<u8>)> = arrays
        .arrays
        .iter()
        .map(|(name, array)| {
            let bytes = array.iter().flat_map(|v| v.to_le_bytes()).collect();
            (name.as_str(), array.shape().to_vec(), bytes)
        })
        .collect();

    let views = buffers
        .iter()
        .map(|(name, shape, bytes)| {
            TensorView::new(Dtype::F64, shape.clone(), bytes)
                .map(|view| (*name, view))
                .map_err(|e| EphysError::persistence(path, format!("array '{}': {}", name, e)))
        })
        .collect::<EphysResult<Vec<_>>>()?;

    let tensors = views.iter().map(|(name, view)| (*name, view));
    safetensors::tensor::serialize_to_file(tensors, &None, path)
        .map_err(|e| EphysError::persistence(path, e.to_string()))
}

/// Read every array of a safetensors file
pub fn read_arrays(path: &Path) -> EphysResult<ArrayTable> {
    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)
        .map_err(|e| EphysError::persistence(path, e.to_string()))?;

    let mut table = ArrayTable::new();
    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F64 {
            return Err(EphysError::persistence(
                path,
                format!("array '{}' has dtype {:?}, expected F64", name, view.dtype()),
            ));
        }
        let values = view
            .data()
            .chunks_exact(8)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                f64::from_le_bytes(word)
            })
            .collect();
        let array = ArrayD::from_shape_vec(IxDyn(view.shape()), values)
            .map_err(|e| EphysError::persistence(path, format!("array '{}': {}", name, e)))?;
        table.insert(&name, array);
    }
    Ok(table)
}

/// Write the channel table as CSV: `id`, `location`, then attribute columns
pub fn write_channels(path: &Path, channels: &ChannelTable) -> EphysResult<()> {
    let csv_error = |e: csv::Error| EphysError::persistence(path, e.to_string());
    let attributes = channels.attribute_columns();

    let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
    let mut header = vec!["id".to_string(), "location".to_string()];
    header.extend(attributes.iter().cloned());
    writer.write_record(&header).map_err(csv_error)?;

    for channel in channels.iter() {
        let mut record = vec![
            channel.id.to_string(),
            channel.location.as_ref().map(Literal::to_string).unwrap_or_default(),
        ];
        for column in &attributes {
            record.push(
                channel
                    .attributes
                    .get(column)
                    .map(Literal::to_string)
                    .unwrap_or_default(),
            );
        }
        writer.write_record(&record).map_err(csv_error)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a channel table written by [`write_channels`]
///
/// Empty cells mean "absent"; every other cell must be a valid literal.
pub fn read_channels(path: &Path) -> EphysResult<ChannelTable> {
    let csv_error = |e: csv::Error| EphysError::persistence(path, e.to_string());
    let mut reader = csv::Reader::from_path(path).map_err(csv_error)?;
    let header = reader.headers().map_err(csv_error)?.clone();
    if header.get(0) != Some("id") || header.get(1) != Some("location") {
        return Err(EphysError::persistence(path, "expected 'id' and 'location' columns"));
    }

    let cell = |text: &str| -> EphysResult<Option<Literal>> {
        if text.is_empty() {
            Ok(None)
        } else {
            Literal::parse(text)
                .map(Some)
                .map_err(|e| EphysError::persistence(path, e.to_string()))
        }
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        let id_text = record.get(0).unwrap_or_default();
        let id = id_text.parse::<i64>().map_err(|e| {
            EphysError::persistence(path, format!("bad channel id {:?}: {}", id_text, e))
        })?;

        let mut channel = ChannelInfo::new(id);
        channel.location = cell(record.get(1).unwrap_or_default())?;
        for (column, text) in header.iter().zip(record.iter()).skip(2) {
            if let Some(value) = cell(text)? {
                channel.attributes.insert(column.to_string(), value);
            }
        }
        rows.push(channel);
    }
    Ok(ChannelTable::new(rows))
}
