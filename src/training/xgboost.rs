//! XGBoost-style gradient boosting with second-order approximation
//!
//! Differences from [`GradientBoostingClassifier`](super::gradient_boosting::GradientBoostingClassifier):
//! - splits are scored with gradient and hessian sums:
//!   Gain = 0.5 * [GL²/(HL+λ) + GR²/(HR+λ) - (GL+GR)²/(HL+HR+λ)], kept only above γ
//! - regularized leaf weights: w* = -G / (H + λ), soft-thresholded by α
//! - per-tree column subsampling (`colsample_bytree`) and a minimum child weight
//!
//! Multiclass uses the softmax objective with one tree per class per round.

use super::decision_tree::check_width;
use super::models::Classifier;
use crate::error::{FlowError, Result};
use ndarray::{Array2, ArrayView1, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// XGBoost configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct XGBoostConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_weight: f64,
    /// L2 regularization on leaf weights
    pub reg_lambda: f64,
    /// L1 regularization on leaf weights
    pub reg_alpha: f64,
    /// Minimum loss reduction to make a split
    pub gamma: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub random_state: u64,
}

impl Default for XGBoostConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            reg_alpha: 0.0,
            gamma: 0.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            random_state: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum XGBNode {
    Leaf { weight: f64 },
    Split { feature: usize, threshold: f64, left: Box<XGBNode>, right: Box<XGBNode> },
}

impl XGBNode {
    fn predict(&self, sample: &ArrayView1<f64>) -> f64 {
        match self {
            XGBNode::Leaf { weight } => *weight,
            XGBNode::Split { feature, threshold, left, right } => {
                if sample[*feature] <= *threshold {
                    left.predict(sample)
                } else {
                    right.predict(sample)
                }
            }
        }
    }

    fn count_splits(&self, counts: &mut [f64]) {
        if let XGBNode::Split { feature, left, right, .. } = self {
            counts[*feature] += 1.0;
            left.count_splits(counts);
            right.count_splits(counts);
        }
    }
}

/// Exact greedy tree over `rows`, splitting only on `features`
fn build_tree(
    x: &Array2<f64>,
    grad: &[f64],
    hess: &[f64],
    rows: &[usize],
    features: &[usize],
    depth: usize,
    config: &XGBoostConfig,
) -> XGBNode {
    let g_sum: f64 = rows.iter().map(|&i| grad[i]).sum();
    let h_sum: f64 = rows.iter().map(|&i| hess[i]).sum();
    let weight = leaf_weight(g_sum, h_sum, config.reg_lambda, config.reg_alpha);

    if depth >= config.max_depth || rows.len() < 2 || h_sum < config.min_child_weight {
        return XGBNode::Leaf { weight };
    }

    let best = features
        .par_iter()
        .filter_map(|&f| best_split_for_feature(x, grad, hess, rows, f, config))
        .collect::<Vec<_>>()
        .into_iter()
        // lowest feature index wins ties
        .fold(None, |acc: Option<(usize, f64, f64)>, cand| match acc {
            Some(a) if a.2 > cand.2 || (a.2 == cand.2 && a.0 < cand.0) => Some(a),
            _ => Some(cand),
        });

    match best {
        Some((feature, threshold, gain)) if gain > config.gamma => {
            let (l, r): (Vec<usize>, Vec<usize>) = rows.iter().partition(|&&i| x[[i, feature]] <= threshold);
            if l.is_empty() || r.is_empty() {
                return XGBNode::Leaf { weight };
            }
            XGBNode::Split {
                feature,
                threshold,
                left: Box::new(build_tree(x, grad, hess, &l, features, depth + 1, config)),
                right: Box::new(build_tree(x, grad, hess, &r, features, depth + 1, config)),
            }
        }
        _ => XGBNode::Leaf { weight },
    }
}

fn leaf_weight(g_sum: f64, h_sum: f64, lambda: f64, alpha: f64) -> f64 {
    // soft threshold for L1
    let g = if g_sum > alpha {
        g_sum - alpha
    } else if g_sum < -alpha {
        g_sum + alpha
    } else {
        return 0.0;
    };
    -g / (h_sum + lambda)
}

// (feature, threshold, gain) of the best split on one feature
fn best_split_for_feature(
    x: &Array2<f64>,
    grad: &[f64],
    hess: &[f64],
    rows: &[usize],
    feature: usize,
    config: &XGBoostConfig,
) -> Option<(usize, f64, f64)> {
    let mut order = rows.to_vec();
    order.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

    let g_total: f64 = order.iter().map(|&i| grad[i]).sum();
    let h_total: f64 = order.iter().map(|&i| hess[i]).sum();
    let lambda = config.reg_lambda;
    let parent = g_total * g_total / (h_total + lambda);

    let (mut g_left, mut h_left) = (0.0, 0.0);
    let mut best: Option<(f64, f64)> = None;
    for pos in 0..order.len() - 1 {
        g_left += grad[order[pos]];
        h_left += hess[order[pos]];
        let here = x[[order[pos], feature]];
        let next = x[[order[pos + 1], feature]];
        if here == next {
            continue;
        }
        let g_right = g_total - g_left;
        let h_right = h_total - h_left;
        if h_left < config.min_child_weight || h_right < config.min_child_weight {
            continue;
        }
        let gain = 0.5 * (g_left * g_left / (h_left + lambda) + g_right * g_right / (h_right + lambda) - parent);
        if best.map_or(true, |(_, g)| gain > g) {
            best = Some((here + (next - here) / 2.0, gain));
        }
    }
    best.map(|(threshold, gain)| (feature, threshold, gain))
}

/// Seeded sorted subset of `0..n` of size `ceil(n * ratio)`
fn subsample(rng: &mut Xoshiro256PlusPlus, n: usize, ratio: f64) -> Vec<usize> {
    let size = (((n as f64) * ratio).ceil() as usize).clamp(1, n.max(1));
    let mut indices: Vec<usize> = (0..n).collect();
    if size < n {
        indices.shuffle(rng);
        indices.truncate(size);
        indices.sort_unstable();
    }
    indices
}

fn softmax_rows(scores: &mut Array2<f64>) {
    for mut row in scores.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
}

fn check_ratio(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(FlowError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: "must be in (0, 1]".to_string(),
        })
    }
}

/// XGBoost classifier with the multiclass softmax objective
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XGBoostClassifier {
    config: XGBoostConfig,
    /// `trees[round][class]`
    trees: Vec<Vec<XGBNode>>,
    n_classes: usize,
    n_features: usize,
}

impl XGBoostClassifier {
    pub fn new(config: XGBoostConfig) -> Self {
        Self { config, trees: Vec::new(), n_classes: 0, n_features: 0 }
    }

    pub fn config(&self) -> &XGBoostConfig {
        &self.config
    }

    fn raw_scores(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut scores = Array2::zeros((x.nrows(), self.n_classes));
        for (i, row) in x.outer_iter().enumerate() {
            for round in &self.trees {
                for (k, tree) in round.iter().enumerate() {
                    scores[[i, k]] += self.config.learning_rate * tree.predict(&row);
                }
            }
        }
        scores
    }
}

impl Classifier for XGBoostClassifier {
    /// Sample weights are not used by this learner
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize, _sample_weight: Option<&[f64]>) -> Result<()> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        if n_samples != y.len() || n_samples == 0 {
            return Err(FlowError::ShapeError {
                expected: format!("{} labels", n_samples),
                actual: format!("{} labels", y.len()),
            });
        }
        check_ratio("subsample", self.config.subsample)?;
        check_ratio("colsample_bytree", self.config.colsample_bytree)?;

        let mut scores = Array2::zeros((n_samples, n_classes));
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);
        let mut rounds = Vec::with_capacity(self.config.n_estimators);

        for _ in 0..self.config.n_estimators {
            let mut proba = scores.clone();
            softmax_rows(&mut proba);
            let rows = subsample(&mut rng, n_samples, self.config.subsample);
            let columns: Vec<Vec<usize>> = (0..n_classes)
                .map(|_| subsample(&mut rng, n_features, self.config.colsample_bytree))
                .collect();

            let round: Vec<XGBNode> = (0..n_classes)
                .into_par_iter()
                .map(|k| {
                    let grad: Vec<f64> = (0..n_samples)
                        .map(|i| proba[[i, k]] - if y[i] == k { 1.0 } else { 0.0 })
                        .collect();
                    let hess: Vec<f64> = (0..n_samples).map(|i| (proba[[i, k]] * (1.0 - proba[[i, k]])).max(1e-7)).collect();
                    build_tree(x, &grad, &hess, &rows, &columns[k], 0, &self.config)
                })
                .collect();

            for (k, tree) in round.iter().enumerate() {
                for (i, row) in x.outer_iter().enumerate() {
                    scores[[i, k]] += self.config.learning_rate * tree.predict(&row);
                }
            }
            rounds.push(round);
        }

        self.trees = rounds;
        self.n_classes = n_classes;
        self.n_features = n_features;
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        if self.n_classes == 0 {
            return Err(FlowError::ModelNotFitted);
        }
        check_width(x, self.n_features)?;
        let mut scores = self.raw_scores(x);
        softmax_rows(&mut scores);
        Ok(Some(scores))
    }

    /// Split-count importances, normalized to sum to one
    fn feature_importances(&self) -> Option<Vec<f64>> {
        if self.n_classes == 0 {
            return None;
        }
        let mut counts = vec![0.0; self.n_features];
        for tree in self.trees.iter().flatten() {
            tree.count_splits(&mut counts);
        }
        let total: f64 = counts.iter().sum();
        if total > 0.0 {
            counts.iter_mut().for_each(|c| *c /= total);
        }
        Some(counts)
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::gradient_boosting::log_loss;

    fn create_classification_data() -> (Array2<f64>, Vec<usize>) {
        let x = Array2::from_shape_vec((90, 2), (0..180).map(|i| (i % 90) as f64 * 0.1).collect()).unwrap();
        let y = x
            .rows()
            .into_iter()
            .map(|row| {
                let s = row[0] + row[1];
                if s < 3.0 { 0 } else if s < 6.0 { 1 } else { 2 }
            })
            .collect();
        (x, y)
    }

    #[test]
    fn test_xgboost_classifier() {
        let (x, y) = create_classification_data();
        let config = XGBoostConfig { n_estimators: 20, max_depth: 3, ..Default::default() };

        let mut model = XGBoostClassifier::new(config);
        model.fit(&x, &y, 3, None).unwrap();

        let predictions = model.predict(&x).unwrap();
        let correct = y.iter().zip(&predictions).filter(|(a, b)| a == b).count();
        let accuracy = correct as f64 / y.len() as f64;
        assert!(accuracy > 0.9, "Accuracy ({}) should be above 90%", accuracy);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let (x, y) = create_classification_data();
        let mut model = XGBoostClassifier::new(XGBoostConfig { n_estimators: 5, ..Default::default() });
        model.fit(&x, &y, 3, None).unwrap();
        let proba = model.predict_proba(&x).unwrap().unwrap();
        assert_eq!(proba.dim(), (90, 3));
        for row in proba.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_loss_decreases_with_rounds() {
        let (x, y) = create_classification_data();
        let mut short = XGBoostClassifier::new(XGBoostConfig { n_estimators: 2, ..Default::default() });
        let mut long = XGBoostClassifier::new(XGBoostConfig { n_estimators: 20, ..Default::default() });
        short.fit(&x, &y, 3, None).unwrap();
        long.fit(&x, &y, 3, None).unwrap();
        let a = log_loss(&short.predict_proba(&x).unwrap().unwrap(), &y);
        let b = log_loss(&long.predict_proba(&x).unwrap().unwrap(), &y);
        assert!(b < a);
    }

    #[test]
    fn test_row_and_column_sampling_is_seeded() {
        let (x, y) = create_classification_data();
        let config = XGBoostConfig { n_estimators: 5, subsample: 0.8, colsample_bytree: 0.5, ..Default::default() };
        let mut a = XGBoostClassifier::new(config);
        let mut b = XGBoostClassifier::new(config);
        a.fit(&x, &y, 3, None).unwrap();
        b.fit(&x, &y, 3, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_large_gamma_keeps_single_leaf() {
        let (x, y) = create_classification_data();
        let mut model = XGBoostClassifier::new(XGBoostConfig { n_estimators: 3, gamma: 1e9, ..Default::default() });
        model.fit(&x, &y, 3, None).unwrap();
        let importances = model.feature_importances().unwrap();
        assert!(importances.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_leaf_weight_soft_threshold() {
        assert_eq!(leaf_weight(0.5, 1.0, 1.0, 1.0), 0.0);
        assert_eq!(leaf_weight(3.0, 1.0, 1.0, 1.0), -1.0);
        assert_eq!(leaf_weight(-3.0, 1.0, 1.0, 0.0), 1.5);
    }

    #[test]
    fn test_invalid_colsample() {
        let (x, y) = create_classification_data();
        let mut model = XGBoostClassifier::new(XGBoostConfig { colsample_bytree: 0.0, ..Default::default() });
        assert!(matches!(model.fit(&x, &y, 3, None), Err(FlowError::InvalidParameter { .. })));
    }

    #[test]
    fn test_predict_before_fit() {
        let (x, _) = create_classification_data();
        let model = XGBoostClassifier::new(XGBoostConfig::default());
        assert!(matches!(model.predict_proba(&x), Err(FlowError::ModelNotFitted)));
    }
}
