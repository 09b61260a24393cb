//! Incrementally accumulated statistics
//!
//! A statistic folds elements one at a time into a payload array whose shape
//! is tied to a fixed i.i.d. shape. Folding is pure: [`Statistic::apply`]
//! returns the next state and leaves the receiver untouched.

use crate::persist::{self, ArrayTable};
use ephys_core::channel::mask_to_indices;
use ephys_core::{ChannelTable, EphysError, EphysResult};
use ndarray::{concatenate, ArrayD, Axis};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Payload axis along which successive elements stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleAxis {
    /// Elements stack on axis 0; the trailing axes equal the i.i.d. shape
    Leading,
    /// Elements stack on the last axis; the leading axes equal the i.i.d. shape
    Trailing,
}

/// Accumulated payload together with its shape contract
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticData {
    iid_shape: Vec<usize>,
    sample_axis: SampleAxis,
    values: Option<ArrayD<f64>>,
}

impl StatisticData {
    /// Empty payload
    pub fn new(iid_shape: Vec<usize>, sample_axis: SampleAxis) -> Self {
        StatisticData {
            iid_shape,
            sample_axis,
            values: None,
        }
    }

    /// Payload with values, checked against the i.i.d. shape
    pub fn with_values(
        iid_shape: Vec<usize>,
        sample_axis: SampleAxis,
        values: ArrayD<f64>,
    ) -> EphysResult<Self> {
        let data = StatisticData::new(iid_shape, sample_axis);
        data.check(&values)?;
        Ok(StatisticData {
            values: Some(values),
            ..data
        })
    }

    pub fn iid_shape(&self) -> &[usize] {
        &self.iid_shape
    }

    pub fn sample_axis(&self) -> SampleAxis {
        self.sample_axis
    }

    pub fn values(&self) -> Option<&ArrayD<f64>> {
        self.values.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_none()
    }

    /// Values, or [`EphysError::EmptyStatistic`] before the first element
    pub fn require(&self, kind: &'static str) -> EphysResult<&ArrayD<f64>> {
        self.values.as_ref().ok_or(EphysError::EmptyStatistic { kind })
    }

    fn check(&self, values: &ArrayD<f64>) -> EphysResult<()> {
        let shape = values.shape();
        let k = self.iid_shape.len();
        let consistent = shape.len() >= k
            && match self.sample_axis {
                SampleAxis::Trailing => shape[..k] == self.iid_shape[..],
                SampleAxis::Leading => shape[shape.len() - k..] == self.iid_shape[..],
            };
        if consistent {
            Ok(())
        } else {
            Err(EphysError::ShapeMismatch {
                context: "statistic payload vs i.i.d. shape",
                expected: self.iid_shape.clone(),
                found: shape.to_vec(),
            })
        }
    }

    /// Stack `sample` onto the payload along the sample axis
    pub fn append(&self, kind: &'static str, sample: ArrayD<f64>) -> EphysResult<StatisticData> {
        self.check(&sample).map_err(|e| EphysError::IncompatibleElement {
            kind,
            reason: e.to_string(),
        })?;
        let values = match &self.values {
            None => sample,
            Some(values) => {
                let axis = match self.sample_axis {
                    SampleAxis::Leading => Axis(0),
                    SampleAxis::Trailing => Axis(values.ndim().saturating_sub(1)),
                };
                concatenate(axis, &[values.view(), sample.view()]).map_err(|e| {
                    EphysError::IncompatibleElement {
                        kind,
                        reason: format!(
                            "cannot stack {:?} onto {:?}: {}",
                            sample.shape(),
                            values.shape(),
                            e
                        ),
                    }
                })?
            }
        };
        Ok(StatisticData {
            iid_shape: self.iid_shape.clone(),
            sample_axis: self.sample_axis,
            values: Some(values),
        })
    }

    /// Same contract, new values
    pub fn replace(&self, values: ArrayD<f64>) -> EphysResult<StatisticData> {
        StatisticData::with_values(self.iid_shape.clone(), self.sample_axis, values)
    }

    /// Restrict the first i.i.d. axis to `indices`
    pub fn select_rows(&self, indices: &[usize]) -> EphysResult<StatisticData> {
        let Some(&rows) = self.iid_shape.first() else {
            return Err(EphysError::ChannelSelection {
                reason: "statistic has a scalar i.i.d. shape".to_string(),
            });
        };
        ephys_core::channel::validate_selection(indices, rows)?;

        let mut iid_shape = self.iid_shape.clone();
        iid_shape[0] = indices.len();
        let values = self.values.as_ref().map(|values| {
            let axis = match self.sample_axis {
                SampleAxis::Trailing => 0,
                SampleAxis::Leading => values.ndim() - self.iid_shape.len(),
            };
            values.select(Axis(axis), indices)
        });
        Ok(StatisticData {
            iid_shape,
            sample_axis: self.sample_axis,
            values,
        })
    }
}

/// Reducer over a sequence of elements with on-disk persistence
///
/// Implementors pick a unique [`Statistic::KIND`] tag; it names the persisted
/// files and is checked before anything is restored.
pub trait Statistic: Sized {
    /// Kind tag, also the stem of the persisted file names
    const KIND: &'static str;

    /// Element folded by [`Statistic::apply`]
    type Element: ?Sized;

    /// Non-array state written to the metadata envelope
    type Metadata: Serialize + DeserializeOwned;

    fn data(&self) -> &StatisticData;

    /// Same statistic with its payload replaced
    fn with_data(&self, data: StatisticData) -> Self;

    /// Next state after folding `element`
    fn apply(&self, element: &Self::Element) -> EphysResult<Self>;

    fn iid_shape(&self) -> &[usize] {
        self.data().iid_shape()
    }

    fn values(&self) -> Option<&ArrayD<f64>> {
        self.data().values()
    }

    /// Fold every element in order and return the final payload
    fn calculate<'a, I>(&mut self, elements: I) -> EphysResult<Option<&ArrayD<f64>>>
    where
        I: IntoIterator<Item = &'a Self::Element>,
        Self::Element: 'a,
    {
        for element in elements {
            *self = self.apply(element)?;
            debug!(
                kind = Self::KIND,
                shape = ?self.values().map(|v| v.shape().to_vec()),
                "folded element"
            );
        }
        Ok(self.values())
    }

    /// Same kind and i.i.d. shape with the payload mapped through `f`
    fn fmap<F>(&self, f: F) -> EphysResult<Self>
    where
        F: FnOnce(&ArrayD<f64>) -> ArrayD<f64>,
    {
        let values = self.data().require(Self::KIND)?;
        Ok(self.with_data(self.data().replace(f(values))?))
    }

    fn metadata(&self) -> Self::Metadata;

    /// Arrays persisted next to the payload
    fn extra_arrays(&self) -> ArrayTable {
        ArrayTable::new()
    }

    /// Channel table persisted as `channels.csv`
    fn channels(&self) -> Option<&ChannelTable> {
        None
    }

    /// Rebuild a statistic from its persisted parts
    fn restore(
        metadata: Self::Metadata,
        data: StatisticData,
        arrays: &ArrayTable,
        channels: Option<ChannelTable>,
    ) -> EphysResult<Self>;

    /// Persist into directory `path`, which must be a directory or absent
    fn pickle(&self, path: &Path) -> EphysResult<()> {
        persist::save(self, path)
    }

    /// Restore a statistic persisted with [`Statistic::pickle`]
    fn unpickle(path: &Path) -> EphysResult<Self> {
        persist::load(path)
    }
}

/// Statistic whose first i.i.d. axis is a channel axis
pub trait ChannelStatistic: Statistic {
    fn channel_table(&self) -> &ChannelTable;

    /// Same statistic over a different channel table and payload
    fn with_channels(&self, channels: ChannelTable, data: StatisticData) -> Self;

    /// Keep channels where `mask` is true, in table and payload together
    fn select_channels(&self, mask: &[bool]) -> EphysResult<Self> {
        let indices = mask_to_indices(mask, self.channel_table().len())?;
        let channels = self.channel_table().take(&indices)?;
        let data = self.data().select_rows(&indices)?;
        Ok(self.with_channels(channels, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array, IxDyn};

    /// Concatenates scalar samples into an `(n, 1)` payload
    #[derive(Debug, Clone, PartialEq)]
    struct ScalarSeries {
        data: StatisticData,
    }

    impl ScalarSeries {
        fn new() -> Self {
            ScalarSeries {
                data: StatisticData::new(vec![1], SampleAxis::Leading),
            }
        }
    }

    impl Statistic for ScalarSeries {
        const KIND: &'static str = "ScalarSeries";
        type Element = f64;
        type Metadata = ();

        fn data(&self) -> &StatisticData {
            &self.data
        }

        fn with_data(&self, data: StatisticData) -> Self {
            ScalarSeries { data }
        }

        fn apply(&self, element: &f64) -> EphysResult<Self> {
            let sample = Array::from_elem(IxDyn(&[1, 1]), *element);
            Ok(self.with_data(self.data.append(Self::KIND, sample)?))
        }

        fn metadata(&self) -> Self::Metadata {}

        fn restore(
            _: (),
            data: StatisticData,
            _: &ArrayTable,
            _: Option<ChannelTable>,
        ) -> EphysResult<Self> {
            Ok(ScalarSeries { data })
        }
    }

    #[test]
    fn test_scalar_elements_stack_in_order() {
        let mut stat = ScalarSeries::new();
        assert!(stat.values().is_none());

        let payload = stat.calculate(&[3.0, 1.0, 2.0]).unwrap().unwrap();
        assert_eq!(payload.shape(), &[3, 1]);
        assert_eq!(payload.iter().copied().collect::<Vec<_>>(), vec![3.0, 1.0, 2.0]);
        assert_eq!(stat.iid_shape(), &[1]);
    }

    #[test]
    fn test_apply_is_pure() {
        let stat = ScalarSeries::new().apply(&1.0).unwrap();
        let next = stat.apply(&2.0).unwrap();
        assert_eq!(stat.values().unwrap().shape(), &[1, 1]);
        assert_eq!(next.values().unwrap().shape(), &[2, 1]);
    }

    #[test]
    fn test_fmap() {
        assert!(matches!(
            ScalarSeries::new().fmap(|v| v.clone()),
            Err(EphysError::EmptyStatistic { kind: "ScalarSeries" })
        ));

        let mut stat = ScalarSeries::new();
        stat.calculate(&[1.0, 2.0]).unwrap();
        let doubled = stat.fmap(|v| v * 2.0).unwrap();
        assert_eq!(doubled.iid_shape(), stat.iid_shape());
        assert_eq!(doubled.values().unwrap()[[1, 0]], 4.0);
        assert_eq!(stat.values().unwrap()[[1, 0]], 2.0);

        let broken = stat.fmap(|_| ArrayD::zeros(IxDyn(&[2, 2])));
        assert!(matches!(broken, Err(EphysError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_trailing_axis_append() {
        let data = StatisticData::new(vec![2, 3], SampleAxis::Trailing);
        let first = data.append("Test", ArrayD::ones(IxDyn(&[2, 3, 4]))).unwrap();
        let second = first.append("Test", ArrayD::zeros(IxDyn(&[2, 3, 1]))).unwrap();
        assert_eq!(second.values().unwrap().shape(), &[2, 3, 5]);

        assert!(matches!(
            second.append("Test", ArrayD::zeros(IxDyn(&[3, 3, 1]))),
            Err(EphysError::IncompatibleElement { kind: "Test", .. })
        ));
        // Matching i.i.d. shape but a different inner axis cannot stack.
        let grid = StatisticData::new(vec![2], SampleAxis::Trailing);
        let grid = grid.append("Test", ArrayD::zeros(IxDyn(&[2, 5, 1]))).unwrap();
        assert!(grid.append("Test", ArrayD::zeros(IxDyn(&[2, 4, 1]))).is_err());
    }

    #[test]
    fn test_select_rows() {
        let values = array![[[1.0], [2.0]], [[3.0], [4.0]], [[5.0], [6.0]]].into_dyn();
        let data = StatisticData::with_values(vec![3, 2], SampleAxis::Trailing, values).unwrap();
        let selected = data.select_rows(&[0, 2]).unwrap();
        assert_eq!(selected.iid_shape(), &[2, 2]);
        assert_eq!(selected.values().unwrap()[[1, 1, 0]], 6.0);
        assert!(data.select_rows(&[2, 0]).is_err());

        let rows = StatisticData::with_values(
            vec![3],
            SampleAxis::Leading,
            ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
        )
        .unwrap();
        let selected = rows.select_rows(&[1]).unwrap();
        assert_eq!(selected.values().unwrap().shape(), &[2, 1]);
        assert_eq!(selected.values().unwrap()[[1, 0]], 5.0);
    }
}
