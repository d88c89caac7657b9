//! Feature scaling implementations

use crate::error::{FlowError, Result};
use crate::utils::stats::{mean_variance, median_sorted, quantile_sorted, sorted_finite};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type of scaler to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalerType {
    /// Robust scaling using median and IQR
    #[default]
    Robust,
    /// Min-Max scaling: (x - min) / (max - min)
    MinMax,
    /// Standard scaling (z-score normalization): (x - mean) / std
    Standard,
}

impl fmt::Display for ScalerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalerType::Robust => "robust",
            ScalerType::MinMax => "minmax",
            ScalerType::Standard => "standard",
        };
        f.write_str(name)
    }
}

impl FromStr for ScalerType {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "robust" => Ok(ScalerType::Robust),
            "minmax" | "min_max" => Ok(ScalerType::MinMax),
            "standard" => Ok(ScalerType::Standard),
            other => Err(FlowError::InvalidParameter {
                name: "scaler".to_string(),
                value: other.to_string(),
                reason: "expected robust, minmax or standard".to_string(),
            }),
        }
    }
}

/// Parameters for one fitted column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct ScalerParams {
    center: f64, // median, min or mean
    scale: f64,  // IQR, range or std
}

/// Feature scaler, fitted once on training features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    scaler_type: ScalerType,
    params: Vec<ScalerParams>,
    is_fitted: bool,
}

impl Scaler {
    /// Create a new scaler
    pub fn new(scaler_type: ScalerType) -> Self {
        Self { scaler_type, params: Vec::new(), is_fitted: false }
    }

    pub fn scaler_type(&self) -> ScalerType {
        self.scaler_type
    }

    pub fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    pub fn n_features(&self) -> usize {
        self.params.len()
    }

    /// Fit the scaler to the data
    pub fn fit(&mut self, x: &Array2<f64>) -> Result<&mut Self> {
        if x.nrows() == 0 {
            return Err(FlowError::PreprocessingError("cannot fit scaler on zero rows".to_string()));
        }
        self.params = x
            .axis_iter(Axis(1))
            .map(|col| self.compute_params(col.iter().copied()))
            .collect();
        self.is_fitted = true;
        Ok(self)
    }

    /// Transform the data
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.is_fitted {
            return Err(FlowError::ModelNotFitted);
        }
        if x.ncols() != self.params.len() {
            return Err(FlowError::ShapeError {
                expected: format!("{} columns", self.params.len()),
                actual: format!("{} columns", x.ncols()),
            });
        }

        let mut out = x.clone();
        for (mut col, p) in out.axis_iter_mut(Axis(1)).zip(&self.params) {
            col.mapv_inplace(|v| (v - p.center) / p.scale);
        }
        Ok(out)
    }

    /// Fit and transform in one step
    pub fn fit_transform(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }

    /// Inverse transform the data
    pub fn inverse_transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.is_fitted {
            return Err(FlowError::ModelNotFitted);
        }
        let mut out = x.clone();
        for (mut col, p) in out.axis_iter_mut(Axis(1)).zip(&self.params) {
            col.mapv_inplace(|v| v * p.scale + p.center);
        }
        Ok(out)
    }

    fn compute_params(&self, values: impl Iterator<Item = f64>) -> ScalerParams {
        let sorted = sorted_finite(values);
        let (center, scale) = match self.scaler_type {
            ScalerType::Robust => {
                let median = median_sorted(&sorted).unwrap_or(0.0);
                let q1 = quantile_sorted(&sorted, 0.25).unwrap_or(0.0);
                let q3 = quantile_sorted(&sorted, 0.75).unwrap_or(0.0);
                (median, q3 - q1)
            }
            ScalerType::MinMax => {
                let min = sorted.first().copied().unwrap_or(0.0);
                let max = sorted.last().copied().unwrap_or(0.0);
                (min, max - min)
            }
            ScalerType::Standard => {
                let (mean, var) = mean_variance(&sorted);
                (mean, var.sqrt())
            }
        };
        ScalerParams {
            center,
            scale: if scale == 0.0 || !scale.is_finite() { 1.0 } else { scale },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_standard_scaler() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let mut scaler = Scaler::new(ScalerType::Standard);
        let result = scaler.fit_transform(&x).unwrap();
        let mean = result.column(0).mean().unwrap();
        assert!(mean.abs() < 1e-10); // Mean should be ~0
    }

    #[test]
    fn test_minmax_scaler() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let mut scaler = Scaler::new(ScalerType::MinMax);
        let result = scaler.fit_transform(&x).unwrap();
        assert!((result[[0, 0]] - 0.0).abs() < 1e-10);
        assert!((result[[4, 0]] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_robust_scaler_zero_iqr() {
        let x = array![[1.0, 3.0], [2.0, 3.0], [3.0, 3.0], [4.0, 3.0], [5.0, 3.0]];
        let mut scaler = Scaler::new(ScalerType::Robust);
        let result = scaler.fit_transform(&x).unwrap();
        // median 3, IQR 2
        assert_eq!(result[[4, 0]], 1.0);
        // zero IQR falls back to a unit scale
        assert_eq!(result[[0, 1]], 0.0);
    }

    #[test]
    fn test_inverse_transform() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let mut scaler = Scaler::new(ScalerType::Standard);
        let scaled = scaler.fit_transform(&x).unwrap();
        let restored = scaler.inverse_transform(&scaled).unwrap();
        for (o, r) in x.iter().zip(restored.iter()) {
            assert!((o - r).abs() < 1e-10);
        }
    }

    #[test]
    fn test_column_count_mismatch() {
        let mut scaler = Scaler::new(ScalerType::Robust);
        scaler.fit(&array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        assert!(scaler.transform(&array![[1.0]]).is_err());
    }

    #[test]
    fn test_parse_scaler_type() {
        assert_eq!("MinMax".parse::<ScalerType>().unwrap(), ScalerType::MinMax);
        assert!("zscore".parse::<ScalerType>().is_err());
    }
}
