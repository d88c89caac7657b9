//! Supervised feature selection
//!
//! Provides the selection strategies used between scaling and model search:
//! - Mutual information top-K
//! - ANOVA F-statistic top-K
//! - Recursive feature elimination driven by random-forest importances
//! - No selection
//!
//! Selected columns always keep their original relative order.

use crate::error::{FlowError, Result};
use crate::training::{Classifier, ForestParams, RandomForest};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Trees in the forest that ranks features during elimination
pub const RFE_ESTIMATORS: usize = 50;

/// Feature selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Top-K by mutual information with the label
    #[default]
    MutualInfo,
    /// Top-K by ANOVA F-statistic
    FClassif,
    /// Recursive elimination with a random forest
    Rfe,
    /// Keep every column
    None,
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SelectionStrategy::MutualInfo => "mutual_info",
            SelectionStrategy::FClassif => "f_classif",
            SelectionStrategy::Rfe => "rfe",
            SelectionStrategy::None => "none",
        };
        f.write_str(name)
    }
}

impl FromStr for SelectionStrategy {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mutual_info" | "mi" => Ok(SelectionStrategy::MutualInfo),
            "f_classif" | "anova" => Ok(SelectionStrategy::FClassif),
            "rfe" => Ok(SelectionStrategy::Rfe),
            "none" => Ok(SelectionStrategy::None),
            other => Err(FlowError::InvalidParameter {
                name: "selection".to_string(),
                value: other.to_string(),
                reason: "expected mutual_info, f_classif, rfe or none".to_string(),
            }),
        }
    }
}

/// Feature selector for dimensionality reduction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSelector {
    strategy: SelectionStrategy,
    k: usize,
    step: usize,
    seed: u64,
    selected_features: Option<Vec<usize>>,
    feature_scores: Option<Vec<f64>>,
    n_features_in: Option<usize>,
}

impl FeatureSelector {
    /// Create a new feature selector keeping up to `k` columns
    pub fn new(strategy: SelectionStrategy, k: usize) -> Self {
        Self {
            strategy,
            k,
            step: 1,
            seed: 42,
            selected_features: None,
            feature_scores: None,
            n_features_in: None,
        }
    }

    /// Features removed per elimination round
    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step.max(1);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// Fit the selector on training features and class indices
    pub fn fit(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize) -> Result<()> {
        let n_features = x.ncols();
        if x.nrows() != y.len() {
            return Err(FlowError::ShapeError {
                expected: format!("{} labels", x.nrows()),
                actual: format!("{} labels", y.len()),
            });
        }
        if n_features == 0 {
            return Err(FlowError::PreprocessingError("no features to select from".to_string()));
        }
        let k = self.k.min(n_features).max(1);

        let (selected, scores) = match self.strategy {
            SelectionStrategy::None => ((0..n_features).collect(), vec![1.0; n_features]),
            SelectionStrategy::MutualInfo => {
                let scores: Vec<f64> = x
                    .axis_iter(Axis(1))
                    .map(|col| mutual_information(col, y, n_classes))
                    .collect();
                (top_k(&scores, k), scores)
            }
            SelectionStrategy::FClassif => {
                let scores: Vec<f64> = x
                    .axis_iter(Axis(1))
                    .map(|col| anova_f(col, y, n_classes))
                    .collect();
                (top_k(&scores, k), scores)
            }
            SelectionStrategy::Rfe => self.fit_rfe(x, y, n_classes, k)?,
        };

        debug!(strategy = %self.strategy, n_in = n_features, n_out = selected.len(), "feature selector fitted");
        self.feature_scores = Some(scores);
        self.selected_features = Some(selected);
        self.n_features_in = Some(n_features);
        Ok(())
    }

    /// Transform data by selecting features
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let selected = self.selected_features.as_ref().ok_or(FlowError::ModelNotFitted)?;
        if Some(x.ncols()) != self.n_features_in {
            return Err(FlowError::ShapeError {
                expected: format!("{} columns", self.n_features_in.unwrap_or(0)),
                actual: format!("{} columns", x.ncols()),
            });
        }
        Ok(x.select(Axis(1), selected))
    }

    /// Fit and transform in one step
    pub fn fit_transform(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize) -> Result<Array2<f64>> {
        self.fit(x, y, n_classes)?;
        self.transform(x)
    }

    /// Selected column indices, ascending
    pub fn selected_indices(&self) -> Option<&[usize]> {
        self.selected_features.as_deref()
    }

    /// Per-column scores from the last fit
    pub fn scores(&self) -> Option<&[f64]> {
        self.feature_scores.as_deref()
    }

    /// Selected names from the full input name list
    pub fn selected_names(&self, names: &[String]) -> Option<Vec<String>> {
        let indices = self.selected_features.as_ref()?;
        Some(indices.iter().filter_map(|&i| names.get(i).cloned()).collect())
    }

    // Repeatedly drop the least important remaining features
    fn fit_rfe(
        &self,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        k: usize,
    ) -> Result<(Vec<usize>, Vec<f64>)> {
        let n_features = x.ncols();
        let mut remaining: Vec<usize> = (0..n_features).collect();
        let mut ranking = vec![1usize; n_features];
        let mut rank = n_features;

        while remaining.len() > k {
            let sub = x.select(Axis(1), &remaining);
            let mut forest = RandomForest::new(ForestParams {
                n_estimators: RFE_ESTIMATORS,
                seed: self.seed,
                ..ForestParams::default()
            });
            forest.fit(&sub, y, n_classes, None)?;
            let importances = forest
                .feature_importances()
                .ok_or_else(|| FlowError::PreprocessingError("forest exposed no importances".to_string()))?;

            let mut order: Vec<usize> = (0..remaining.len()).collect();
            order.sort_by(|&a, &b| importances[a].total_cmp(&importances[b]).then(b.cmp(&a)));

            let n_drop = self.step.min(remaining.len() - k);
            let mut drop: Vec<usize> = order.into_iter().take(n_drop).collect();
            for &pos in &drop {
                ranking[remaining[pos]] = rank;
                rank = rank.saturating_sub(1);
            }
            drop.sort_unstable_by(|a, b| b.cmp(a));
            for pos in drop {
                remaining.remove(pos);
            }
        }

        let scores = ranking.iter().map(|&r| 1.0 / r as f64).collect();
        Ok((remaining, scores))
    }
}

/// Indices of the `k` highest scores, earliest first on ties, returned ascending
fn top_k(scores: &[f64], k: usize) -> Vec<usize> {
    let mut indexed: Vec<usize> = (0..scores.len()).collect();
    indexed.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    let mut selected: Vec<usize> = indexed.into_iter().take(k).collect();
    selected.sort_unstable();
    selected
}

// Mutual information between a binned continuous feature and class labels
fn mutual_information(x: ArrayView1<f64>, y: &[usize], n_classes: usize) -> f64 {
    let n = x.len() as f64;
    if n < 2.0 {
        return 0.0;
    }

    let n_bins = (n.sqrt() as usize).clamp(2, 20);
    let x_bins = discretize(x, n_bins);

    let mut joint: HashMap<(usize, usize), usize> = HashMap::new();
    let mut x_counts = vec![0usize; n_bins];
    let mut y_counts = vec![0usize; n_classes.max(1)];
    for (&xb, &yc) in x_bins.iter().zip(y) {
        *joint.entry((xb, yc)).or_insert(0) += 1;
        x_counts[xb] += 1;
        if let Some(c) = y_counts.get_mut(yc) {
            *c += 1;
        }
    }

    let mut mi = 0.0;
    for (&(xb, yc), &count) in &joint {
        let p_xy = count as f64 / n;
        let p_x = x_counts[xb] as f64 / n;
        let p_y = y_counts.get(yc).copied().unwrap_or(0) as f64 / n;
        if p_xy > 0.0 && p_x > 0.0 && p_y > 0.0 {
            mi += p_xy * (p_xy / (p_x * p_y)).ln();
        }
    }
    mi.max(0.0)
}

// Equal-width binning
fn discretize(x: ArrayView1<f64>, n_bins: usize) -> Vec<usize> {
    let min_val = x.iter().copied().fold(f64::INFINITY, f64::min);
    let max_val = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max_val - min_val;
    if !(range > 0.0) {
        return vec![0; x.len()];
    }
    let bin_width = range / n_bins as f64;
    x.iter()
        .map(|&v| (((v - min_val) / bin_width) as usize).min(n_bins - 1))
        .collect()
}

// One-way ANOVA F between class groups
fn anova_f(x: ArrayView1<f64>, y: &[usize], n_classes: usize) -> f64 {
    let n = x.len();
    let mut sums = vec![0.0; n_classes];
    let mut counts = vec![0usize; n_classes];
    for (&v, &c) in x.iter().zip(y) {
        if c < n_classes {
            sums[c] += v;
            counts[c] += 1;
        }
    }
    let groups = counts.iter().filter(|&&c| c > 0).count();
    if groups < 2 || n <= groups {
        return 0.0;
    }

    let grand_mean = x.iter().sum::<f64>() / n as f64;
    let means: Vec<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(&s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
        .collect();

    let ss_between: f64 = means
        .iter()
        .zip(&counts)
        .map(|(&m, &c)| c as f64 * (m - grand_mean).powi(2))
        .sum();
    let ss_within: f64 = x
        .iter()
        .zip(y)
        .filter(|(_, &c)| c < n_classes)
        .map(|(&v, &c)| (v - means[c]).powi(2))
        .sum();

    let df_between = (groups - 1) as f64;
    let df_within = (n - groups) as f64;
    if ss_within <= 0.0 {
        return if ss_between > 0.0 { f64::MAX } else { 0.0 };
    }
    (ss_between / df_between) / (ss_within / df_within)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn informative() -> (Array2<f64>, Vec<usize>) {
        // column 1 separates the classes, columns 0 and 2 are noise
        let x = array![
            [0.3, 0.0, 5.0],
            [0.1, 0.1, 4.0],
            [0.2, 0.0, 5.0],
            [0.4, 0.1, 4.0],
            [0.1, 9.0, 5.0],
            [0.3, 9.1, 4.0],
            [0.2, 9.0, 5.0],
            [0.4, 9.1, 4.0],
        ];
        (x, vec![0, 0, 0, 0, 1, 1, 1, 1])
    }

    #[test]
    fn test_f_classif_picks_separating_column() {
        let (x, y) = informative();
        let mut selector = FeatureSelector::new(SelectionStrategy::FClassif, 1);
        let out = selector.fit_transform(&x, &y, 2).unwrap();
        assert_eq!(selector.selected_indices().unwrap(), &[1]);
        assert_eq!(out.ncols(), 1);
    }

    #[test]
    fn test_mutual_info_keeps_order() {
        let (x, y) = informative();
        let mut selector = FeatureSelector::new(SelectionStrategy::MutualInfo, 2);
        selector.fit(&x, &y, 2).unwrap();
        let idx = selector.selected_indices().unwrap();
        assert!(idx.contains(&1));
        assert!(idx.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_k_larger_than_columns() {
        let (x, y) = informative();
        let mut selector = FeatureSelector::new(SelectionStrategy::MutualInfo, 50);
        selector.fit(&x, &y, 2).unwrap();
        assert_eq!(selector.selected_indices().unwrap(), &[0, 1, 2]);
    }

    #[test]
    fn test_none_keeps_everything() {
        let (x, y) = informative();
        let mut selector = FeatureSelector::new(SelectionStrategy::None, 1);
        let out = selector.fit_transform(&x, &y, 2).unwrap();
        assert_eq!(out, x);
    }

    #[test]
    fn test_rfe_reduces_to_k() {
        let (x, y) = informative();
        let mut selector = FeatureSelector::new(SelectionStrategy::Rfe, 1);
        selector.fit(&x, &y, 2).unwrap();
        assert_eq!(selector.selected_indices().unwrap(), &[1]);
    }

    #[test]
    fn test_transform_requires_fit() {
        let (x, _) = informative();
        let selector = FeatureSelector::new(SelectionStrategy::FClassif, 1);
        assert!(selector.transform(&x).is_err());
    }
}
