//! Dataset cleaner
//!
//! Turns a canonical [`FlowTable`] into a dense, finite feature matrix:
//!
//! 1. text columns are integer-encoded with a per-column [`CategoryEncoder`]
//! 2. identifier, provenance and index columns are dropped
//! 3. missing and infinite values are imputed with the training median
//! 4. zero-variance columns are dropped
//! 5. values are clipped to `[Q1 - 3·IQR, Q3 + 3·IQR]`
//!
//! Every statistic is computed by [`DatasetCleaner::fit`] on training rows and
//! replayed unchanged by [`DatasetCleaner::transform`].

use super::encoder::CategoryEncoder;
use crate::error::{FlowError, Result};
use crate::ingest::{ColumnValues, FlowColumn, FlowTable, SIDE_COLUMNS, SOURCE_COLUMN};
use crate::utils::stats::{median_sorted, quantile_sorted, sorted_finite};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Network identifiers kept in the side table and never used as features
pub const IDENTIFIER_COLUMNS: [&str; 5] = SIDE_COLUMNS;

/// IQR multiplier for the clipping bounds
pub const IQR_FACTOR: f64 = 3.0;

/// True for columns that never become features
pub fn is_excluded(name: &str, target: &str) -> bool {
    name == target
        || name == SOURCE_COLUMN
        || name == "timestamp"
        || name.starts_with("unnamed")
        || IDENTIFIER_COLUMNS.contains(&name)
}

/// Frozen statistics of one feature column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub name: String,
    pub median: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Fitted cleaning transform
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetCleaner {
    target: String,
    encoders: BTreeMap<String, CategoryEncoder>,
    columns: Vec<ColumnStats>,
    dropped_constant: Vec<String>,
    excluded: Vec<String>,
    is_fitted: bool,
}

impl DatasetCleaner {
    pub fn new(target: impl Into<String>) -> Self {
        Self { target: target.into(), ..Default::default() }
    }

    /// Fit on training rows
    pub fn fit(&mut self, table: &FlowTable) -> Result<&mut Self> {
        if table.n_rows() == 0 {
            return Err(FlowError::PreprocessingError("cannot fit cleaner on an empty table".to_string()));
        }

        let mut encoders = BTreeMap::new();
        let mut columns = Vec::new();
        let mut dropped_constant = Vec::new();
        let mut excluded = Vec::new();

        for col in table.columns() {
            if is_excluded(&col.name, &self.target) {
                if col.name != self.target {
                    excluded.push(col.name.clone());
                }
                continue;
            }

            let raw: Vec<f64> = match &col.values {
                ColumnValues::Numeric(v) => v.iter().map(|x| x.unwrap_or(f64::NAN)).collect(),
                ColumnValues::Text(v) => {
                    let encoder = CategoryEncoder::fit(v);
                    let codes = v.iter().map(|x| encoder.encode(x.as_deref())).collect();
                    encoders.insert(col.name.clone(), encoder);
                    codes
                }
            };

            let median = median_sorted(&sorted_finite(raw.iter().copied())).unwrap_or(0.0);
            let imputed: Vec<f64> = raw.iter().map(|&x| if x.is_finite() { x } else { median }).collect();

            // all-equal, not variance: float variance of a constant column can be nonzero
            if imputed.iter().all(|&v| v == imputed[0]) {
                dropped_constant.push(col.name.clone());
                encoders.remove(&col.name);
                continue;
            }

            let sorted = sorted_finite(imputed);
            let q1 = quantile_sorted(&sorted, 0.25).unwrap_or(median);
            let q3 = quantile_sorted(&sorted, 0.75).unwrap_or(median);
            let iqr = q3 - q1;
            columns.push(ColumnStats {
                name: col.name.clone(),
                median,
                lower: q1 - IQR_FACTOR * iqr,
                upper: q3 + IQR_FACTOR * iqr,
            });
        }

        if columns.is_empty() {
            return Err(FlowError::PreprocessingError(
                "no usable feature columns remain after cleaning".to_string(),
            ));
        }

        if !dropped_constant.is_empty() {
            debug!(columns = ?dropped_constant, "dropped constant columns");
        }
        info!(
            features = columns.len(),
            encoded = encoders.len(),
            constant = dropped_constant.len(),
            excluded = excluded.len(),
            "cleaner fitted"
        );

        self.encoders = encoders;
        self.columns = columns;
        self.dropped_constant = dropped_constant;
        self.excluded = excluded;
        self.is_fitted = true;
        Ok(self)
    }

    /// Apply the frozen parameters. Output columns follow [`Self::feature_columns`].
    pub fn transform(&self, table: &FlowTable) -> Result<Array2<f64>> {
        if !self.is_fitted {
            return Err(FlowError::ModelNotFitted);
        }
        let n = table.n_rows();
        let mut out = Array2::zeros((n, self.columns.len()));

        for (j, stats) in self.columns.iter().enumerate() {
            let mut target = out.column_mut(j);
            match table.column(&stats.name) {
                Some(col) => {
                    let values = self.column_codes(col, n);
                    for (cell, v) in target.iter_mut().zip(values) {
                        let v = if v.is_finite() { v } else { stats.median };
                        *cell = v.clamp(stats.lower, stats.upper);
                    }
                }
                None => target.fill(stats.median.clamp(stats.lower, stats.upper)),
            }
        }
        Ok(out)
    }

    /// Fit on `table` and transform it
    pub fn fit_transform(&mut self, table: &FlowTable) -> Result<Array2<f64>> {
        self.fit(table)?;
        self.transform(table)
    }

    fn column_codes(&self, col: &FlowColumn, n: usize) -> Vec<f64> {
        match self.encoders.get(&col.name) {
            Some(encoder) => (0..n).map(|i| encoder.encode(col.values.text_at(i).as_deref())).collect(),
            None => (0..n).map(|i| col.values.number_at(i).unwrap_or(f64::NAN)).collect(),
        }
    }

    /// Feature columns in matrix order
    pub fn feature_columns(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_stats(&self) -> &[ColumnStats] {
        &self.columns
    }

    pub fn encoders(&self) -> &BTreeMap<String, CategoryEncoder> {
        &self.encoders
    }

    pub fn dropped_constant(&self) -> &[String] {
        &self.dropped_constant
    }

    /// Identifier, provenance and index columns seen at fit time
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    pub fn is_fitted(&self) -> bool {
        self.is_fitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> FlowTable {
        FlowTable::from_columns(vec![
            FlowColumn::numeric("flow_duration", vec![Some(1.0), Some(2.0), None, Some(f64::INFINITY), Some(4.0)]),
            FlowColumn::numeric("constant", vec![Some(7.0); 5]),
            FlowColumn::text("src_ip", vec![Some("10.0.0.1".into()); 5]),
            FlowColumn::text(
                "service",
                vec![Some("http".into()), Some("dns".into()), Some("http".into()), None, Some("ntp".into())],
            ),
            FlowColumn::text("label", vec![Some("A".into()); 5]),
        ])
        .unwrap()
    }

    #[test]
    fn test_constant_and_identifiers_dropped() {
        let mut cleaner = DatasetCleaner::new("label");
        let x = cleaner.fit_transform(&fixture()).unwrap();
        assert_eq!(cleaner.feature_columns(), vec!["flow_duration", "service"]);
        assert_eq!(cleaner.dropped_constant(), &["constant".to_string()]);
        assert_eq!(cleaner.excluded(), &["src_ip".to_string()]);
        assert_eq!(x.dim(), (5, 2));
        assert!(x.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_fractional_constants_dropped() {
        let table = FlowTable::from_columns(vec![
            FlowColumn::numeric("x", (0..10).map(|i| Some(i as f64)).collect()),
            FlowColumn::numeric("tenth", vec![Some(0.1); 10]),
            FlowColumn::numeric("bulk_rate", vec![Some(1234.567); 10]),
            FlowColumn::text("label", vec![Some("A".into()); 10]),
        ])
        .unwrap();
        let mut cleaner = DatasetCleaner::new("label");
        let x = cleaner.fit_transform(&table).unwrap();
        assert_eq!(cleaner.feature_columns(), vec!["x"]);
        assert_eq!(cleaner.dropped_constant(), &["tenth".to_string(), "bulk_rate".to_string()]);
        assert_eq!(x.dim(), (10, 1));
    }

    #[test]
    fn test_missing_and_infinite_use_median() {
        let mut cleaner = DatasetCleaner::new("label");
        let x = cleaner.fit_transform(&fixture()).unwrap();
        // finite values 1, 2, 4 → median 2
        assert_eq!(x[[2, 0]], 2.0);
        assert_eq!(x[[3, 0]], 2.0);
    }

    #[test]
    fn test_unseen_category_and_missing_column() {
        let mut cleaner = DatasetCleaner::new("label");
        cleaner.fit(&fixture()).unwrap();
        let new = FlowTable::from_columns(vec![FlowColumn::text("service", vec![Some("smtp".into())])]).unwrap();
        let x = cleaner.transform(&new).unwrap();
        let stats = &cleaner.column_stats()[1];
        assert_eq!(x[[0, 1]], (-1.0f64).clamp(stats.lower, stats.upper));
        let duration = &cleaner.column_stats()[0];
        assert_eq!(x[[0, 0]], duration.median);
    }

    #[test]
    fn test_clipping_uses_training_bounds() {
        let values: Vec<Option<f64>> = (0..20).map(|i| Some(i as f64)).collect();
        let train = FlowTable::from_columns(vec![FlowColumn::numeric("x", values)]).unwrap();
        let mut cleaner = DatasetCleaner::new("label");
        cleaner.fit(&train).unwrap();
        let stats = cleaner.column_stats()[0].clone();

        let test = FlowTable::from_columns(vec![FlowColumn::numeric("x", vec![Some(-1e9), Some(1e9)])]).unwrap();
        let x = cleaner.transform(&test).unwrap();
        assert_eq!(x[[0, 0]], stats.lower);
        assert_eq!(x[[1, 0]], stats.upper);
    }

    #[test]
    fn test_transform_before_fit() {
        let cleaner = DatasetCleaner::new("label");
        assert!(matches!(cleaner.transform(&fixture()), Err(FlowError::ModelNotFitted)));
    }
}
