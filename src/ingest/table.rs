//! Column-oriented flow table
//!
//! Sources arrive with arbitrary column sets, so rows are kept in an owned
//! table of named, optionally-missing columns until the cleaner turns them
//! into a dense `Array2<f64>`.

use crate::error::{FlowError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Values of one column. `None` marks a missing cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValues {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Numeric(v) => v.len(),
            ColumnValues::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnValues::Numeric(_))
    }

    /// All-missing column of the same kind
    fn missing_like(&self, len: usize) -> ColumnValues {
        match self {
            ColumnValues::Numeric(_) => ColumnValues::Numeric(vec![None; len]),
            ColumnValues::Text(_) => ColumnValues::Text(vec![None; len]),
        }
    }

    /// Cell rendered as text, used for side-table snapshots and category codes
    pub fn text_at(&self, row: usize) -> Option<String> {
        match self {
            ColumnValues::Numeric(v) => v.get(row).copied().flatten().map(format_number),
            ColumnValues::Text(v) => v.get(row).cloned().flatten(),
        }
    }

    /// Cell as a float; text cells are parsed, unparseable ones are missing
    pub fn number_at(&self, row: usize) -> Option<f64> {
        match self {
            ColumnValues::Numeric(v) => v.get(row).copied().flatten(),
            ColumnValues::Text(v) => v
                .get(row)
                .and_then(|s| s.as_deref())
                .and_then(|s| s.trim().parse::<f64>().ok()),
        }
    }

    fn take(&self, rows: &[usize]) -> ColumnValues {
        match self {
            ColumnValues::Numeric(v) => ColumnValues::Numeric(rows.iter().map(|&i| v[i]).collect()),
            ColumnValues::Text(v) => ColumnValues::Text(rows.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    fn into_text(self) -> ColumnValues {
        match self {
            ColumnValues::Numeric(v) => {
                ColumnValues::Text(v.into_iter().map(|x| x.map(format_number)).collect())
            }
            text => text,
        }
    }

    fn extend(&mut self, other: ColumnValues) {
        match (self, other) {
            (ColumnValues::Numeric(a), ColumnValues::Numeric(b)) => a.extend(b),
            (ColumnValues::Text(a), ColumnValues::Text(b)) => a.extend(b),
            _ => unreachable!("column kinds are aligned before extending"),
        }
    }

    /// Convert a text column to numeric when every non-empty cell parses as a float.
    /// Accepts `inf`, `Infinity` and `NaN` spellings; NaN cells become missing.
    pub fn coerce_numeric(self) -> ColumnValues {
        match self {
            ColumnValues::Text(values) => {
                let parsed: Option<Vec<Option<f64>>> = values
                    .iter()
                    .map(|cell| match cell.as_deref().map(str::trim) {
                        None | Some("") => Some(None),
                        Some(s) => s.parse::<f64>().ok().map(|x| (!x.is_nan()).then_some(x)),
                    })
                    .collect();
                match parsed {
                    Some(numbers) => ColumnValues::Numeric(numbers),
                    None => ColumnValues::Text(values),
                }
            }
            numeric => numeric,
        }
    }
}

fn format_number(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{}", x)
    }
}

/// A named column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowColumn {
    pub name: String,
    pub values: ColumnValues,
}

impl FlowColumn {
    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self { name: name.into(), values: ColumnValues::Numeric(values) }
    }

    pub fn text(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self { name: name.into(), values: ColumnValues::Text(values) }
    }
}

/// Ordered set of equally-long named columns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowTable {
    columns: Vec<FlowColumn>,
    n_rows: usize,
}

impl FlowTable {
    /// Build a table, checking that every column has the same length
    pub fn from_columns(columns: Vec<FlowColumn>) -> Result<Self> {
        let n_rows = columns.first().map(|c| c.values.len()).unwrap_or(0);
        for col in &columns {
            if col.values.len() != n_rows {
                return Err(FlowError::ShapeError {
                    expected: format!("{} rows", n_rows),
                    actual: format!("{} rows in column '{}'", col.values.len(), col.name),
                });
            }
        }
        Ok(Self { columns, n_rows })
    }

    /// Columns already known to share `n_rows`
    pub(crate) fn from_parts(columns: Vec<FlowColumn>, n_rows: usize) -> Self {
        debug_assert!(columns.iter().all(|c| c.values.len() == n_rows));
        Self { columns, n_rows }
    }

    pub fn into_columns(self) -> Vec<FlowColumn> {
        self.columns
    }

    /// Convert a polars frame. Text columns are coerced to numeric when possible.
    pub fn from_dataframe(df: &DataFrame) -> Result<Self> {
        let mut columns = Vec::with_capacity(df.width());
        for col in df.get_columns() {
            let series = col.as_materialized_series();
            let values = match series.dtype() {
                DataType::String => {
                    let ca = series.str()?;
                    ColumnValues::Text(ca.into_iter().map(|v| v.map(str::to_string)).collect())
                        .coerce_numeric()
                }
                _ => {
                    let cast = series.cast(&DataType::Float64)?;
                    let ca = cast.f64()?;
                    ColumnValues::Numeric(
                        ca.into_iter().map(|v| v.filter(|x| !x.is_nan())).collect(),
                    )
                }
            };
            columns.push(FlowColumn { name: series.name().to_string(), values });
        }
        Self::from_columns(columns)
    }

    /// Convert back to a polars frame
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let columns: Vec<Column> = self
            .columns
            .iter()
            .map(|c| match &c.values {
                ColumnValues::Numeric(v) => Column::new(c.name.as_str().into(), v.clone()),
                ColumnValues::Text(v) => Column::new(c.name.as_str().into(), v.clone()),
            })
            .collect();
        Ok(DataFrame::new(columns)?)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[FlowColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&FlowColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column as floats with NaN for missing cells; text cells are parsed
    pub fn numeric_values(&self, name: &str) -> Option<Vec<f64>> {
        self.column(name).map(|c| {
            (0..self.n_rows)
                .map(|i| c.values.number_at(i).unwrap_or(f64::NAN))
                .collect()
        })
    }

    /// Column rendered as text
    pub fn text_values(&self, name: &str) -> Option<Vec<Option<String>>> {
        self.column(name)
            .map(|c| (0..self.n_rows).map(|i| c.values.text_at(i)).collect())
    }

    /// Append a column. Fails on a length mismatch or a duplicate name.
    pub fn push_column(&mut self, column: FlowColumn) -> Result<()> {
        if self.columns.is_empty() {
            self.n_rows = column.values.len();
        } else if column.values.len() != self.n_rows {
            return Err(FlowError::ShapeError {
                expected: format!("{} rows", self.n_rows),
                actual: format!("{} rows in column '{}'", column.values.len(), column.name),
            });
        }
        if self.contains(&column.name) {
            return Err(FlowError::DataError(format!("duplicate column '{}'", column.name)));
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Option<FlowColumn> {
        let idx = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(idx))
    }

    /// Rename a column in place. Returns false when the source column is absent.
    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        match self.columns.iter_mut().find(|c| c.name == from) {
            Some(col) => {
                col.name = to.to_string();
                true
            }
            None => false,
        }
    }

    /// Keep only the columns for which `keep` returns true
    pub fn retain_columns<F: FnMut(&FlowColumn) -> bool>(&mut self, keep: F) {
        self.columns.retain(keep);
    }

    /// New table holding the given rows, in the given order
    pub fn take_rows(&self, rows: &[usize]) -> FlowTable {
        FlowTable {
            columns: self
                .columns
                .iter()
                .map(|c| FlowColumn { name: c.name.clone(), values: c.values.take(rows) })
                .collect(),
            n_rows: rows.len(),
        }
    }

    /// Concatenate tables over the union of their columns.
    ///
    /// Columns keep first-seen order. Cells of columns a table lacks are
    /// missing. A column that is numeric in one table and text in another
    /// becomes text.
    pub fn concat(tables: Vec<FlowTable>) -> FlowTable {
        let mut names: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        let mut text_columns = HashSet::new();
        for table in &tables {
            for col in &table.columns {
                if seen.insert(col.name.clone()) {
                    names.push(col.name.clone());
                }
                if !col.values.is_numeric() {
                    text_columns.insert(col.name.clone());
                }
            }
        }

        let total: usize = tables.iter().map(|t| t.n_rows).sum();
        let mut merged: Vec<FlowColumn> = names
            .iter()
            .map(|name| {
                let values = if text_columns.contains(name) {
                    ColumnValues::Text(Vec::with_capacity(total))
                } else {
                    ColumnValues::Numeric(Vec::with_capacity(total))
                };
                FlowColumn { name: name.clone(), values }
            })
            .collect();

        for mut table in tables {
            let n = table.n_rows;
            for target in merged.iter_mut() {
                let part = match table.remove_column(&target.name) {
                    Some(col) if target.values.is_numeric() => col.values,
                    Some(col) => col.values.into_text(),
                    None => target.values.missing_like(n),
                };
                target.values.extend(part);
            }
        }

        FlowTable { columns: merged, n_rows: total }
    }
}
