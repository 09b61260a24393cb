//! Channel table: ordered per-channel metadata for the first data axis

use crate::error::EphysResult;
use crate::literal::Literal;
use crate::selection_error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata for one recorded channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel identifier (electrode contact number)
    pub id: i64,
    /// Anatomical location, e.g. `'V1-L4'` or `('V1', 4)`
    pub location: Option<Literal>,
    /// Additional literal-valued columns
    pub attributes: BTreeMap<String, Literal>,
}

impl ChannelInfo {
    /// Channel with an identifier and no location
    pub fn new(id: i64) -> Self {
        ChannelInfo {
            id,
            location: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Set the location
    pub fn with_location(mut self, location: impl Into<Literal>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Add an extra attribute column value
    pub fn with_attribute(mut self, column: &str, value: impl Into<Literal>) -> Self {
        self.attributes.insert(column.to_string(), value.into());
        self
    }

    /// Location rendered as a plain string, if it is a string literal
    pub fn location_str(&self) -> Option<&str> {
        self.location.as_ref().and_then(Literal::as_str)
    }

    /// Value of a named column; `id` and `location` are addressable too
    pub fn column(&self, column: &str) -> Option<Literal> {
        match column {
            "id" => Some(Literal::Int(self.id)),
            "location" => self.location.clone(),
            other => self.attributes.get(other).cloned(),
        }
    }
}

/// Ordered channel metadata; row `i` describes data channel `i`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelTable {
    rows: Vec<ChannelInfo>,
}

impl ChannelTable {
    /// Build a table from rows in channel order
    pub fn new(rows: Vec<ChannelInfo>) -> Self {
        ChannelTable { rows }
    }

    /// Table of `count` channels with ids `0..count` and no locations
    pub fn numbered(count: usize) -> Self {
        ChannelTable {
            rows: (0..count as i64).map(ChannelInfo::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[ChannelInfo] {
        &self.rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelInfo> {
        self.rows.iter()
    }

    pub fn get(&self, index: usize) -> Option<&ChannelInfo> {
        self.rows.get(index)
    }

    /// Channel identifiers in row order
    pub fn ids(&self) -> Vec<i64> {
        self.rows.iter().map(|row| row.id).collect()
    }

    /// Names of the extra attribute columns present in any row, sorted
    pub fn attribute_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self
            .rows
            .iter()
            .flat_map(|row| row.attributes.keys().cloned())
            .collect();
        columns.sort();
        columns.dedup();
        columns
    }

    /// Row indices whose channel satisfies `predicate`, in order
    pub fn positions<F>(&self, predicate: F) -> Vec<usize>
    where
        F: Fn(&ChannelInfo) -> bool,
    {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| predicate(*row))
            .map(|(i, _)| i)
            .collect()
    }

    /// Sub-table of the given rows; indices must be strictly increasing
    pub fn take(&self, indices: &[usize]) -> EphysResult<ChannelTable> {
        validate_selection(indices, self.len())?;
        Ok(ChannelTable {
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        })
    }

    /// Sub-table of the rows where `mask` is true
    pub fn select_mask(&self, mask: &[bool]) -> EphysResult<ChannelTable> {
        self.take(&mask_to_indices(mask, self.len())?)
    }
}

impl FromIterator<ChannelInfo> for ChannelTable {
    fn from_iter<I: IntoIterator<Item = ChannelInfo>>(iter: I) -> Self {
        ChannelTable::new(iter.into_iter().collect())
    }
}

/// Check that `indices` are in range and strictly increasing
pub fn validate_selection(indices: &[usize], len: usize) -> EphysResult<()> {
    if let Some(&bad) = indices.iter().find(|&&i| i >= len) {
        return Err(selection_error!("index {} out of range for {} channels", bad, len));
    }
    if indices.windows(2).any(|w| w[0] >= w[1]) {
        return Err(selection_error!("indices {:?} are not strictly increasing", indices));
    }
    Ok(())
}

/// Convert a boolean channel mask into row indices
pub fn mask_to_indices(mask: &[bool], len: usize) -> EphysResult<Vec<usize>> {
    if mask.len() != len {
        return Err(selection_error!(
            "mask has {} entries for {} channels",
            mask.len(),
            len
        ));
    }
    Ok(mask
        .iter()
        .enumerate()
        .filter(|&(_, &keep)| keep)
        .map(|(i, _)| i)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EphysError;

    fn laminar_table() -> ChannelTable {
        ["V1-L23", "V1-L4", "V1-L4", "V1-L5"]
            .iter()
            .enumerate()
            .map(|(i, loc)| ChannelInfo::new(i as i64 + 10).with_location(*loc))
            .collect()
    }

    #[test]
    fn test_positions_and_take() {
        let table = laminar_table();
        let l4 = table.positions(|c| c.location_str() == Some("V1-L4"));
        assert_eq!(l4, vec![1, 2]);

        let sub = table.take(&l4).unwrap();
        assert_eq!(sub.ids(), vec![11, 12]);
    }

    #[test]
    fn test_take_rejects_bad_selection() {
        let table = laminar_table();
        assert!(matches!(table.take(&[2, 1]), Err(EphysError::ChannelSelection { .. })));
        assert!(matches!(table.take(&[1, 1]), Err(EphysError::ChannelSelection { .. })));
        assert!(matches!(table.take(&[4]), Err(EphysError::ChannelSelection { .. })));
        assert!(table.select_mask(&[true, false]).is_err());
    }

    #[test]
    fn test_column_access() {
        let channel = ChannelInfo::new(3)
            .with_location("V4-L5")
            .with_attribute("depth_um", 450i64);
        assert_eq!(channel.column("id"), Some(Literal::Int(3)));
        assert_eq!(channel.column("location"), Some(Literal::from("V4-L5")));
        assert_eq!(channel.column("depth_um"), Some(Literal::Int(450)));
        assert_eq!(channel.column("missing"), None);
    }

    #[test]
    fn test_attribute_columns_sorted_and_unique() {
        let table = ChannelTable::new(vec![
            ChannelInfo::new(0).with_attribute("shank", 1i64),
            ChannelInfo::new(1).with_attribute("depth_um", 20i64).with_attribute("shank", 1i64),
        ]);
        assert_eq!(table.attribute_columns(), vec!["depth_um", "shank"]);
    }
}
