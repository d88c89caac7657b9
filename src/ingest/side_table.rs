//! Network identifiers kept beside the feature matrix

use super::{FlowColumn, FlowTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Columns captured into the side table, in output order
pub const SIDE_COLUMNS: [&str; 5] = ["src_ip", "dst_ip", "src_port", "dst_port", "protocol"];

/// One side-table row: identifier column → rendered value
pub type SideRow = BTreeMap<String, String>;

/// Identifier columns of a table, keyed by the row index they came from.
///
/// Never used as model input; carried for audit and attached to predictions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideTable {
    row_index: Vec<usize>,
    columns: Vec<FlowColumn>,
}

impl SideTable {
    /// Capture the identifier columns present in `table`
    pub fn extract(table: &FlowTable) -> Self {
        let columns = SIDE_COLUMNS
            .iter()
            .filter_map(|name| table.column(name).cloned())
            .collect();
        Self { row_index: (0..table.n_rows()).collect(), columns }
    }

    /// Sub-table of the given positions, keeping their original row indices
    pub fn select(&self, positions: &[usize]) -> Self {
        let table = FlowTable::from_parts(self.columns.clone(), self.row_index.len()).take_rows(positions);
        Self {
            row_index: positions.iter().map(|&p| self.row_index[p]).collect(),
            columns: table.into_columns(),
        }
    }

    pub fn len(&self) -> usize {
        self.row_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_index.is_empty()
    }

    /// Identifier columns that were present
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Row index in the originating table of the entry at `position`
    pub fn source_row(&self, position: usize) -> Option<usize> {
        self.row_index.get(position).copied()
    }

    /// Identifiers at `position`; missing cells are left out
    pub fn row(&self, position: usize) -> SideRow {
        self.columns
            .iter()
            .filter_map(|c| c.values.text_at(position).map(|v| (c.name.clone(), v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> FlowTable {
        FlowTable::from_columns(vec![
            FlowColumn::text("src_ip", vec![Some("10.0.0.1".into()), Some("10.0.0.2".into()), None]),
            FlowColumn::numeric("dst_port", vec![Some(80.0), Some(443.0), Some(53.0)]),
            FlowColumn::numeric("flow_duration", vec![Some(1.0), Some(2.0), Some(3.0)]),
        ])
        .unwrap()
    }

    #[test]
    fn test_extract_keeps_identifiers_only() {
        let side = SideTable::extract(&table());
        assert_eq!(side.column_names(), vec!["src_ip", "dst_port"]);
        assert_eq!(side.len(), 3);

        let row = side.row(0);
        assert_eq!(row.get("src_ip").map(String::as_str), Some("10.0.0.1"));
        assert_eq!(row.get("dst_port").map(String::as_str), Some("80"));
        assert!(!side.row(2).contains_key("src_ip"));
    }

    #[test]
    fn test_select_keeps_source_rows() {
        let side = SideTable::extract(&table()).select(&[2, 0]);
        assert_eq!(side.len(), 2);
        assert_eq!(side.source_row(0), Some(2));
        assert_eq!(side.source_row(1), Some(0));
        assert_eq!(side.row(0).get("dst_port").map(String::as_str), Some("53"));
    }

    #[test]
    fn test_table_without_identifiers() {
        let t = FlowTable::from_columns(vec![FlowColumn::numeric("x", vec![Some(1.0)])]).unwrap();
        let side = SideTable::extract(&t);
        assert!(side.column_names().is_empty());
        assert!(side.row(0).is_empty());
        assert_eq!(side.len(), 1);
    }
}
